use esp_hal::gpio::Output;

use lorasense_core::cycle::StatusLed;

/// Blue LED on GPIO25.
pub struct BoardLed(Output<'static>);

impl BoardLed {
    pub fn new(pin: Output<'static>) -> Self {
        Self(pin)
    }
}

impl StatusLed for BoardLed {
    fn set(&mut self, on: bool) {
        if on {
            self.0.set_high();
        } else {
            self.0.set_low();
        }
    }
}
