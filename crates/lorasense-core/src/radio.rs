//! Radio link seam
//!
//! The node only ever transmits: one packet per wake cycle, with at most one
//! immediate retry. The LoRa driver itself lives in the firmware crate.

use thiserror_no_std::Error;

use crate::config::{CodingRate, RadioSettings};

/// SX127x FIFO size.
pub const MAX_PACKET_LEN: usize = 255;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    #[error("Radio initialization failed: {0}")]
    Init(&'static str),
    #[error("Radio transmission failed: {0}")]
    Transmit(&'static str),
    #[error("Radio could not enter sleep: {0}")]
    Sleep(&'static str),
    #[error("Radio used before initialization")]
    NotReady,
    #[error("Packet of {0} bytes does not fit the radio FIFO")]
    TooLarge(usize),
}

/// Transmit-only point-to-point radio.
pub trait Radio {
    /// Bring the transceiver up. Calling it on a running radio is a no-op.
    fn begin(&mut self) -> impl Future<Output = Result<(), RadioError>>;

    /// Send one packet and wait for the transmission to finish.
    fn transmit(&mut self, packet: &[u8]) -> impl Future<Output = Result<(), RadioError>>;

    /// Put the transceiver into its lowest power state.
    fn sleep(&mut self) -> impl Future<Output = Result<(), RadioError>>;
}

/// LoRa time on air in microseconds for an explicit-header packet.
///
/// Follows the Semtech SX127x datasheet formula; low data rate optimisation
/// is assumed on whenever a symbol lasts 16 ms or longer.
pub fn time_on_air_us(settings: &RadioSettings, payload_len: usize) -> u32 {
    let sf = settings.spreading_factor.value() as i64;
    let bw = settings.bandwidth.hz() as i64;
    let symbol_us = ((1i64 << sf) * 1_000_000) / bw;

    let low_data_rate = if symbol_us >= 16_000 { 1 } else { 0 };
    let cr = match settings.coding_rate {
        CodingRate::Cr4_5 => 1,
        CodingRate::Cr4_6 => 2,
        CodingRate::Cr4_7 => 3,
        CodingRate::Cr4_8 => 4,
    };
    let crc = if settings.crc_on { 1 } else { 0 };

    let numerator = 8 * payload_len as i64 - 4 * sf + 28 + 16 * crc;
    let denominator = 4 * (sf - 2 * low_data_rate);
    let blocks = if numerator > 0 {
        (numerator + denominator - 1) / denominator
    } else {
        0
    };
    let payload_symbols = 8 + blocks * (cr + 4);

    // (preamble + 4.25) symbols, kept in quarter symbols to stay integral
    let preamble_us = ((settings.preamble_len as i64 * 4 + 17) * symbol_us) / 4;

    (preamble_us + payload_symbols * symbol_us) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Bandwidth, SpreadingFactor};

    #[test]
    fn test_time_on_air_default_settings() {
        // SF7/125k: 1.024 ms symbols, 48 byte payload -> 78 payload symbols
        let settings = RadioSettings::default();
        assert_eq!(time_on_air_us(&settings, 48), 92_416);
    }

    #[test]
    fn test_time_on_air_grows_with_spreading_factor() {
        let fast = RadioSettings::default();
        let slow = RadioSettings {
            spreading_factor: SpreadingFactor::Sf12,
            bandwidth: Bandwidth::Khz125,
            ..RadioSettings::default()
        };
        let fast_us = time_on_air_us(&fast, 48);
        let slow_us = time_on_air_us(&slow, 48);
        assert!(slow_us > 15 * fast_us);
        // 32.768 ms symbols, low data rate optimisation engaged
        assert_eq!(slow_us, 2_301_952);
    }
}
