//! DHT22 on GPIO13

use esp_hal::delay::Delay;
use esp_hal::gpio::{DriveMode, Flex, InputConfig, OutputConfig, Pull};

use lorasense_core::sensors::{ClimateReading, ClimateSensor, Dht22, SensorError};

pub struct DhtSensor {
    inner: Dht22<Flex<'static>, Delay>,
}

impl DhtSensor {
    /// Configure the pin as an open-drain line with the pull-up enabled and
    /// leave it released (high).
    pub fn new(mut pin: Flex<'static>) -> Self {
        pin.apply_output_config(&OutputConfig::default().with_drive_mode(DriveMode::OpenDrain));
        pin.apply_input_config(&InputConfig::default().with_pull(Pull::Up));
        pin.set_high();
        pin.set_output_enable(true);
        pin.set_input_enable(true);

        Self {
            inner: Dht22::new(pin, Delay::new()),
        }
    }
}

impl ClimateSensor for DhtSensor {
    async fn read(&mut self) -> Result<ClimateReading, SensorError> {
        // Bit timing is measured in microseconds, keep interrupts out
        critical_section::with(|_| self.inner.measure())
    }
}
