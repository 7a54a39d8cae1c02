//! Bit-banged DHT22 (AM2302) driver
//!
//! The sensor talks over a single open-drain line with a pull-up. The host
//! pulls the line low for >1 ms, releases it, and the sensor answers with an
//! 80 µs low / 80 µs high preamble followed by 40 bits. Each bit is a ~50 µs
//! low followed by a high pulse of ~26 µs (`0`) or ~70 µs (`1`).
//!
//! Pulse lengths are measured by counting 1 µs polling steps. Since every
//! bit's high time is compared with the low time that precedes it, the
//! polling overhead cancels out and no calibrated timer is needed.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use log::debug;

use super::{ClimateReading, ClimateSensor, SensorError};

const SENSOR: &str = "DHT22";

/// The sensor needs two seconds between conversions.
pub const DHT22_MIN_INTERVAL_MS: u32 = 2000;

const START_LOW_US: u32 = 1_100;
const RELEASE_US: u32 = 10;
const MAX_PULSE_TICKS: u32 = 1_000;
const FRAME_BITS: usize = 40;

/// DHT22 on an open-drain GPIO.
///
/// `P` must be configured as open drain with input enabled, so that
/// `set_high` releases the line and `is_high` reads the sensor.
pub struct Dht22<P, D> {
    pin: P,
    delay: D,
}

impl<P, D> Dht22<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    pub fn new(pin: P, delay: D) -> Self {
        Self { pin, delay }
    }

    /// Run one complete transaction and decode the result.
    ///
    /// Timing sensitive: on a multitasking target call this with interrupts
    /// masked.
    pub fn measure(&mut self) -> Result<ClimateReading, SensorError> {
        let frame = self.read_frame()?;
        debug!("DHT22 raw frame: {:02x?}", frame);
        decode_frame(frame)
    }

    fn read_frame(&mut self) -> Result<[u8; 5], SensorError> {
        self.pin.set_low().map_err(|_| SensorError::Pin {
            sensor: SENSOR,
            details: "failed to drive start pulse",
        })?;
        self.delay.delay_us(START_LOW_US);

        self.pin.set_high().map_err(|_| SensorError::Pin {
            sensor: SENSOR,
            details: "failed to release line",
        })?;
        self.delay.delay_us(RELEASE_US);

        self.expect_pulse(true, "response start")?;
        self.expect_pulse(false, "response low")?;
        self.expect_pulse(true, "response high")?;

        let mut frame = [0u8; 5];
        for bit in 0..FRAME_BITS {
            let low = self.expect_pulse(false, "bit start")?;
            let high = self.expect_pulse(true, "bit level")?;
            if high > low {
                frame[bit / 8] |= 0x80 >> (bit % 8);
            }
        }

        Ok(frame)
    }

    /// Count polling steps while the line stays at `level`.
    fn expect_pulse(&mut self, level: bool, stage: &'static str) -> Result<u32, SensorError> {
        let mut ticks = 0;
        loop {
            let is_high = self.pin.is_high().map_err(|_| SensorError::Pin {
                sensor: SENSOR,
                details: "failed to sample line",
            })?;
            if is_high != level {
                return Ok(ticks);
            }

            ticks += 1;
            if ticks >= MAX_PULSE_TICKS {
                return Err(SensorError::Timeout {
                    sensor: SENSOR,
                    stage,
                });
            }
            self.delay.delay_us(1);
        }
    }
}

impl<P, D> ClimateSensor for Dht22<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    async fn read(&mut self) -> Result<ClimateReading, SensorError> {
        self.measure()
    }
}

/// Decode and check a raw 5-byte DHT22 frame.
///
/// Bytes 0-1 hold humidity and bytes 2-3 temperature, both in tenths, with
/// bit 15 of the temperature as sign. Byte 4 is the low byte of the sum of
/// the first four.
pub fn decode_frame(frame: [u8; 5]) -> Result<ClimateReading, SensorError> {
    let expected = frame[..4]
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte));
    if expected != frame[4] {
        return Err(SensorError::Checksum {
            sensor: SENSOR,
            expected,
            actual: frame[4],
        });
    }

    let raw_humidity = u16::from_be_bytes([frame[0], frame[1]]);
    let raw_temperature = u16::from_be_bytes([frame[2] & 0x7F, frame[3]]);

    let humidity_pct = raw_humidity as f32 / 10.0;
    let mut temperature_c = raw_temperature as f32 / 10.0;
    if frame[2] & 0x80 != 0 {
        temperature_c = -temperature_c;
    }

    if !(0.0..=100.0).contains(&humidity_pct) {
        return Err(SensorError::OutOfRange {
            sensor: SENSOR,
            details: "humidity outside 0..=100 %",
        });
    }
    if !(-40.0..=80.0).contains(&temperature_c) {
        return Err(SensorError::OutOfRange {
            sensor: SENSOR,
            details: "temperature outside -40..=80 C",
        });
    }

    Ok(ClimateReading {
        temperature_c,
        humidity_pct,
    })
}
