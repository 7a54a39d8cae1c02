mod dht22;

pub use dht22::{DHT22_MIN_INTERVAL_MS, Dht22, decode_frame};

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("Sensor {sensor} timed out waiting for {stage}")]
    Timeout {
        sensor: &'static str,
        stage: &'static str,
    },
    #[error("Sensor {sensor} checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum {
        sensor: &'static str,
        expected: u8,
        actual: u8,
    },
    #[error("Sensor {sensor} reported an implausible value: {details}")]
    OutOfRange {
        sensor: &'static str,
        details: &'static str,
    },
    #[error("Sensor {sensor} pin error: {details}")]
    Pin {
        sensor: &'static str,
        details: &'static str,
    },
}

/// One temperature/humidity measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
}

impl ClimateReading {
    /// Substitute sent when the sensor fails, so the receiver still gets the
    /// battery report.
    pub const ZERO: Self = Self {
        temperature_c: 0.0,
        humidity_pct: 0.0,
    };
}

/// Trait for sensors that produce a temperature/humidity pair.
pub trait ClimateSensor {
    /// Perform one measurement.
    fn read(&mut self) -> impl Future<Output = Result<ClimateReading, SensorError>>;
}
