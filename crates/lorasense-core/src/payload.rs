//! JSON report sent over the radio
//!
//! The receiving gateway feeds Home Assistant and expects exactly
//! `{"id":"<node>","t":<temp>,"h":<humidity>,"v":<battery>}` with two decimals.

use core::fmt::Write;

use thiserror_no_std::Error;

use crate::sensors::ClimateReading;

/// Largest payload the node will transmit.
pub const PAYLOAD_CAPACITY: usize = 96;

pub type PayloadBuffer = heapless::String<PAYLOAD_CAPACITY>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Payload exceeds the 96 byte radio buffer")]
    TooLong,
    #[error("Payload value is not a finite number: {0}")]
    NotFinite(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Payload<'a> {
    pub node_id: &'a str,
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub battery_v: f32,
}

impl<'a> Payload<'a> {
    pub fn new(node_id: &'a str, reading: ClimateReading, battery_v: f32) -> Self {
        Self {
            node_id,
            temperature_c: reading.temperature_c,
            humidity_pct: reading.humidity_pct,
            battery_v,
        }
    }

    /// Serialize into compact JSON.
    ///
    /// The node id is written verbatim; configuration validation guarantees
    /// it needs no escaping.
    pub fn to_json(&self) -> Result<PayloadBuffer, PayloadError> {
        for (name, value) in [
            ("t", self.temperature_c),
            ("h", self.humidity_pct),
            ("v", self.battery_v),
        ] {
            if !value.is_finite() {
                return Err(PayloadError::NotFinite(name));
            }
        }

        let mut json = PayloadBuffer::new();
        write!(
            json,
            "{{\"id\":\"{}\",\"t\":{:.2},\"h\":{:.2},\"v\":{:.2}}}",
            self.node_id, self.temperature_c, self.humidity_pct, self.battery_v
        )
        .map_err(|_| PayloadError::TooLong)?;

        Ok(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_matches_gateway_format() {
        let reading = ClimateReading {
            temperature_c: 22.5,
            humidity_pct: 50.2,
        };
        let json = Payload::new("GarageTemp", reading, 4.1179).to_json().unwrap();
        assert_eq!(
            json.as_str(),
            r#"{"id":"GarageTemp","t":22.50,"h":50.20,"v":4.12}"#
        );
    }

    #[test]
    fn test_json_with_failed_sensor_and_negative_values() {
        let json = Payload::new("Shed", ClimateReading::ZERO, 3.7)
            .to_json()
            .unwrap();
        assert_eq!(json.as_str(), r#"{"id":"Shed","t":0.00,"h":0.00,"v":3.70}"#);

        let reading = ClimateReading {
            temperature_c: -12.34,
            humidity_pct: 99.9,
        };
        let json = Payload::new("Shed", reading, 0.0).to_json().unwrap();
        assert_eq!(json.as_str(), r#"{"id":"Shed","t":-12.34,"h":99.90,"v":0.00}"#);
    }

    #[test]
    fn test_json_rejects_nan() {
        let reading = ClimateReading {
            temperature_c: f32::NAN,
            humidity_pct: 40.0,
        };
        assert_eq!(
            Payload::new("Shed", reading, 4.0).to_json(),
            Err(PayloadError::NotFinite("t"))
        );
    }

    #[test]
    fn test_json_overflow_is_reported() {
        let reading = ClimateReading {
            temperature_c: 1.0e30,
            humidity_pct: 1.0e30,
        };
        assert_eq!(
            Payload::new("Shed", reading, 1.0e30).to_json(),
            Err(PayloadError::TooLong)
        );
    }
}
