//! Battery divider on GPIO35 (ADC1, 11 dB attenuation)

use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcPin};
use esp_hal::peripherals::{ADC1, GPIO35};

use lorasense_core::battery::{BatteryError, BatteryProbe};

pub type BatteryAdc = Adc<'static, ADC1<'static>, Blocking>;
pub type BatteryPin = AdcPin<GPIO35<'static>, ADC1<'static>>;

/// Conversions averaged per reading.
const SAMPLES: u32 = 8;
/// Polls per conversion before giving up.
const MAX_POLLS: u32 = 10_000;

pub struct AdcBattery {
    adc: BatteryAdc,
    pin: BatteryPin,
}

impl AdcBattery {
    pub fn new(adc: BatteryAdc, pin: BatteryPin) -> Self {
        Self { adc, pin }
    }

    fn convert(&mut self) -> Result<u16, BatteryError> {
        for _ in 0..MAX_POLLS {
            match self.adc.read_oneshot(&mut self.pin) {
                Ok(raw) => return Ok(raw),
                Err(nb::Error::WouldBlock) => continue,
                Err(nb::Error::Other(_)) => return Err(BatteryError::Adc("conversion error")),
            }
        }
        Err(BatteryError::Adc("conversion timed out"))
    }
}

impl BatteryProbe for AdcBattery {
    fn read_raw(&mut self) -> Result<u16, BatteryError> {
        let mut sum = 0u32;
        for _ in 0..SAMPLES {
            sum += self.convert()? as u32;
        }
        Ok((sum / SAMPLES) as u16)
    }
}
