//! SSD1306 OLED on I2C0 (SDA 21, SCL 22, address 0x3C)

use esp_hal::Blocking;
use esp_hal::i2c::master::I2c;
use log::debug;
use ssd1306::mode::BufferedGraphicsMode;
use ssd1306::prelude::*;
use ssd1306::{I2CDisplayInterface, Ssd1306};

use lorasense_core::display::{DisplayError, Screen, StatusDisplay, render};

type Panel = Ssd1306<
    I2CInterface<I2c<'static, Blocking>>,
    DisplaySize128x64,
    BufferedGraphicsMode<DisplaySize128x64>,
>;

/// The panel is mounted upside down in the enclosure, hence the rotation.
pub struct OledDisplay {
    panel: Panel,
    initialized: bool,
}

impl OledDisplay {
    pub fn new(i2c: I2c<'static, Blocking>) -> Self {
        let interface = I2CDisplayInterface::new(i2c);
        let panel = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate180)
            .into_buffered_graphics_mode();

        Self {
            panel,
            initialized: false,
        }
    }

    /// Run the init sequence once per boot, right before the first screen.
    fn ensure_initialized(&mut self) -> Result<(), DisplayError> {
        if self.initialized {
            return Ok(());
        }
        self.panel.init().map_err(|e| {
            log::error!("SSD1306 init error: {:?}", e);
            DisplayError::Bus("SSD1306 did not acknowledge init")
        })?;
        self.initialized = true;
        debug!("OLED initialized");
        Ok(())
    }
}

impl StatusDisplay for OledDisplay {
    fn show(&mut self, screen: &Screen) -> Result<(), DisplayError> {
        self.ensure_initialized()?;
        self.panel
            .set_display_on(true)
            .map_err(|_| DisplayError::Bus("display on command failed"))?;

        render(screen, &mut self.panel).map_err(|e| {
            log::error!("Draw error: {:?}", e);
            DisplayError::Bus("drawing into the panel buffer failed")
        })?;
        self.panel.flush().map_err(|e| {
            log::error!("Flush error: {:?}", e);
            DisplayError::Bus("frame transfer failed")
        })
    }

    fn power_off(&mut self) -> Result<(), DisplayError> {
        // Also sent when nothing was shown, the panel keeps its last state
        // across deep sleep
        self.panel
            .set_display_on(false)
            .map_err(|_| DisplayError::Bus("display off command failed"))
    }
}
