//! Status screens for the 128x64 OLED
//!
//! Each screen is up to four lines of 6x10 text, 15 px apart, the layout
//! the node has always used. Rendering works on any monochrome
//! `DrawTarget`: the SSD1306 driver on the device, the [`Framebuffer`] in the
//! simulator and tests.
//!
//! [`Framebuffer`]: crate::framebuffer::Framebuffer

use core::fmt::Write;

use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};
use thiserror_no_std::Error;

use crate::battery::BatteryStatus;
use crate::sensors::ClimateReading;

pub const DISPLAY_WIDTH_PX: u32 = 128;
pub const DISPLAY_HEIGHT_PX: u32 = 64;

/// Vertical distance between text lines.
pub const LINE_SPACING_PX: i32 = 15;

pub const MAX_LINES: usize = 4;

pub type Line = heapless::String<24>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayError {
    #[error("Display bus error: {0}")]
    Bus(&'static str),
}

/// What the node shows during one wake cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Screen {
    /// Shown right after wake, before the sensor settles
    Reading { boot: u32 },
    /// Payload went out
    Sent {
        reading: ClimateReading,
        sensor_ok: bool,
        battery: BatteryStatus,
        retried: bool,
    },
    /// Both transmission attempts failed
    SendFailed {
        reading: ClimateReading,
        sensor_ok: bool,
        battery: BatteryStatus,
    },
    /// The transceiver did not come up
    RadioInitFailed,
}

impl Screen {
    pub fn lines(&self) -> heapless::Vec<Line, MAX_LINES> {
        let mut lines = heapless::Vec::new();

        match *self {
            Screen::Reading { boot } => {
                let _ = lines.push(line(format_args!("Reading Sensor...")));
                let _ = lines.push(line(format_args!("Boot #{}", boot)));
            }
            Screen::Sent {
                reading,
                sensor_ok,
                battery,
                retried,
            } => {
                let title = if retried {
                    "Sent Data (retry):"
                } else {
                    "Sent Data:"
                };
                let _ = lines.push(line(format_args!("{}", title)));
                push_measurements(&mut lines, reading, sensor_ok, battery);
            }
            Screen::SendFailed {
                reading,
                sensor_ok,
                battery,
            } => {
                let _ = lines.push(line(format_args!("Send Failed!")));
                push_measurements(&mut lines, reading, sensor_ok, battery);
            }
            Screen::RadioInitFailed => {
                let _ = lines.push(line(format_args!("LoRa Init Failed!")));
                let _ = lines.push(line(format_args!("Sleeping...")));
            }
        }

        lines
    }
}

fn line(args: core::fmt::Arguments<'_>) -> Line {
    let mut text = Line::new();
    // Overlong lines are cut off, as the panel would do anyway
    let _ = text.write_fmt(args);
    text
}

fn push_measurements(
    lines: &mut heapless::Vec<Line, MAX_LINES>,
    reading: ClimateReading,
    sensor_ok: bool,
    battery: BatteryStatus,
) {
    if sensor_ok {
        let _ = lines.push(line(format_args!("T: {:.2}C", reading.temperature_c)));
        let _ = lines.push(line(format_args!("H: {:.2}%", reading.humidity_pct)));
    } else {
        let _ = lines.push(line(format_args!("T: ERR")));
        let _ = lines.push(line(format_args!("H: ERR")));
    }
    let _ = lines.push(line(format_args!(
        "Bat: {:.2}V {}%",
        battery.voltage, battery.percent
    )));
}

/// Clear `target` and draw `screen` onto it.
pub fn render<D>(screen: &Screen, target: &mut D) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    let style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);

    target.clear(BinaryColor::Off)?;
    for (row, text) in screen.lines().iter().enumerate() {
        Text::with_baseline(
            text.as_str(),
            Point::new(0, row as i32 * LINE_SPACING_PX),
            style,
            Baseline::Top,
        )
        .draw(target)?;
    }

    Ok(())
}

/// Physical status display.
pub trait StatusDisplay {
    /// Draw a screen and push it to the panel.
    fn show(&mut self, screen: &Screen) -> Result<(), DisplayError>;

    /// Switch the panel off until the next `show`.
    fn power_off(&mut self) -> Result<(), DisplayError>;
}
