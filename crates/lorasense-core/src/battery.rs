//! Battery voltage measurement
//!
//! The cell is connected to an ADC pin through a resistor divider. The
//! conversion is a straight line through the origin plus an optional offset
//! for boards whose ADC reads low.

use thiserror_no_std::Error;

use crate::config::BatteryConfig;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryError {
    #[error("ADC conversion failed: {0}")]
    Adc(&'static str),
}

/// Source of raw battery ADC counts.
pub trait BatteryProbe {
    fn read_raw(&mut self) -> Result<u16, BatteryError>;
}

/// Single-cell LiPo open-circuit voltage vs. remaining capacity.
const LIPO_CURVE: [(f32, u8); 11] = [
    (3.30, 0),
    (3.50, 5),
    (3.61, 10),
    (3.69, 20),
    (3.75, 30),
    (3.79, 40),
    (3.83, 50),
    (3.87, 60),
    (3.95, 70),
    (4.07, 85),
    (4.20, 100),
];

/// Convert a raw ADC count into the battery voltage.
///
/// Counts above `full_scale` are clamped.
pub fn voltage_from_raw(raw: u16, config: &BatteryConfig) -> f32 {
    let raw = raw.min(config.full_scale);
    (raw as f32 / config.full_scale as f32) * config.reference_v * config.divider_ratio
        + config.offset_v
}

/// Estimate the state of charge from a voltage by linear interpolation on
/// [`LIPO_CURVE`].
pub fn percent_from_voltage(voltage: f32) -> u8 {
    let (first_v, first_pct) = LIPO_CURVE[0];
    if voltage <= first_v {
        return first_pct;
    }

    for window in LIPO_CURVE.windows(2) {
        let (lo_v, lo_pct) = window[0];
        let (hi_v, hi_pct) = window[1];
        if voltage <= hi_v {
            let fraction = (voltage - lo_v) / (hi_v - lo_v);
            let pct = lo_pct as f32 + fraction * (hi_pct - lo_pct) as f32;
            return (pct + 0.5) as u8;
        }
    }

    100
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryStatus {
    pub voltage: f32,
    pub percent: u8,
}

impl BatteryStatus {
    /// Reported when the ADC read fails.
    pub const UNKNOWN: Self = Self {
        voltage: 0.0,
        percent: 0,
    };

    pub fn from_raw(raw: u16, config: &BatteryConfig) -> Self {
        let voltage = voltage_from_raw(raw, config);
        Self {
            voltage,
            percent: percent_from_voltage(voltage),
        }
    }
}

/// Read the probe and convert, falling back to [`BatteryStatus::UNKNOWN`].
pub fn measure<B: BatteryProbe>(probe: &mut B, config: &BatteryConfig) -> BatteryStatus {
    match probe.read_raw() {
        Ok(raw) => {
            let status = BatteryStatus::from_raw(raw, config);
            log::debug!(
                "Battery raw={} -> {:.2}V ({}%)",
                raw,
                status.voltage,
                status.percent
            );
            status
        }
        Err(e) => {
            log::error!("Battery read failed: {}", e);
            BatteryStatus::UNKNOWN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(Result<u16, BatteryError>);

    impl BatteryProbe for FixedProbe {
        fn read_raw(&mut self) -> Result<u16, BatteryError> {
            self.0
        }
    }

    #[test]
    fn test_voltage_conversion() {
        let config = BatteryConfig::default();
        assert_eq!(voltage_from_raw(0, &config), 0.0);
        assert!((voltage_from_raw(4095, &config) - 6.6).abs() < 1e-4);
        // 2555 counts is a typical full cell on this board
        assert!((voltage_from_raw(2555, &config) - 4.118).abs() < 0.01);
    }

    #[test]
    fn test_voltage_clamps_and_offsets() {
        let config = BatteryConfig {
            offset_v: 0.1,
            ..BatteryConfig::default()
        };
        assert!((voltage_from_raw(u16::MAX, &config) - 6.7).abs() < 1e-4);
    }

    #[test]
    fn test_percent_curve() {
        assert_eq!(percent_from_voltage(2.9), 0);
        assert_eq!(percent_from_voltage(3.30), 0);
        assert_eq!(percent_from_voltage(3.83), 50);
        assert_eq!(percent_from_voltage(4.20), 100);
        assert_eq!(percent_from_voltage(5.0), 100);

        let mid = percent_from_voltage(4.0);
        assert!(mid > 70 && mid < 85);
    }

    #[test]
    fn test_measure_falls_back_on_error() {
        let config = BatteryConfig::default();
        let status = measure(&mut FixedProbe(Err(BatteryError::Adc("busy"))), &config);
        assert_eq!(status, BatteryStatus::UNKNOWN);

        let status = measure(&mut FixedProbe(Ok(2555)), &config);
        assert!(status.voltage > 4.0);
        assert!(status.percent > 85);
    }
}
