//! Desktop simulator for the lorasense sensor node.
//!
//! Runs the real wake cycle from `lorasense-core` against synthetic hardware:
//! a DHT22 that follows a daily temperature curve, a slowly discharging
//! LiPo, and a radio whose failures follow a script. Screens are rendered
//! into the core framebuffer and printed to the log; with the `window`
//! feature they also appear in an SDL2 window.
//!
//! Time is simulated. Sensor settle time and deep sleep advance a virtual
//! clock instead of blocking, unless `LORASENSE_SIM_SPEEDUP` asks for real
//! (scaled) waiting.
//!
//! # Environment
//!
//! | Variable                     | Meaning                                      |
//! |------------------------------|----------------------------------------------|
//! | `LORASENSE_*`                | Node settings, as for the firmware           |
//! | `LORASENSE_SIM_CYCLES`       | Wake cycles to run (default 14)              |
//! | `LORASENSE_SIM_RADIO`        | Radio script, one char per cycle (see below) |
//! | `LORASENSE_SIM_SENSOR`       | Sensor script, `.` ok / `x` failed read      |
//! | `LORASENSE_SIM_STATE`        | File standing in for RTC memory              |
//! | `LORASENSE_SIM_SPEEDUP`      | Real-time divisor for waits, 0 = no waiting  |
//!
//! Radio script characters: `.` delivered, `r` first attempt fails, `x` both
//! attempts fail, `i` transceiver does not start. Scripts repeat.

use std::cell::Cell;
use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use embassy_futures::block_on;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_hal_async::delay::DelayNs;
use log::{debug, error, info, warn};

use lorasense_core::battery::{BatteryError, BatteryProbe};
use lorasense_core::config::{ENV_PREFIX, NodeConfig};
use lorasense_core::cycle::StatusLed;
use lorasense_core::display::{DisplayError, Screen, StatusDisplay, render};
use lorasense_core::framebuffer::Framebuffer;
use lorasense_core::radio::{Radio, RadioError};
use lorasense_core::retained::{RETAINED_LEN, RetainedState};
use lorasense_core::sensors::{ClimateReading, ClimateSensor, SensorError};
use lorasense_core::{NextWake, Node, run_cycle};

const SIM_PREFIX: &str = "LORASENSE_SIM_";
const DEFAULT_CYCLES: u32 = 14;

/// Simulated seconds since the first power-on, shared by all fake parts.
#[derive(Clone, Default)]
struct Clock(Rc<Cell<f64>>);

impl Clock {
    fn now(&self) -> f64 {
        self.0.get()
    }

    fn advance(&self, secs: f64) {
        self.0.set(self.0.get() + secs);
    }
}

/// Repeating script of per-cycle behaviour characters.
struct Script {
    chars: Vec<char>,
    position: usize,
}

impl Script {
    fn parse(text: &str) -> Self {
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        Self {
            chars: if chars.is_empty() { vec!['.'] } else { chars },
            position: 0,
        }
    }

    fn next(&mut self) -> char {
        let c = self.chars[self.position % self.chars.len()];
        self.position += 1;
        c
    }
}

// ---------------------------------------------------------------------------
// Synthetic hardware
// ---------------------------------------------------------------------------

/// Garage climate: 14 °C ± 6 over a day, humidity moving the other way.
struct SyntheticDht {
    clock: Clock,
    script: Script,
}

impl ClimateSensor for SyntheticDht {
    async fn read(&mut self) -> Result<ClimateReading, SensorError> {
        if self.script.next() == 'x' {
            return Err(SensorError::Timeout {
                sensor: "DHT22",
                stage: "response start",
            });
        }

        let day = self.clock.now() / 86_400.0 * std::f64::consts::TAU;
        let wobble = (self.clock.now() / 1_700.0).sin();
        Ok(ClimateReading {
            temperature_c: (14.0 + 6.0 * day.sin() + 0.3 * wobble) as f32,
            humidity_pct: (62.0 - 12.0 * day.sin() + 1.5 * wobble) as f32,
        })
    }
}

/// LiPo losing about 20 mV per simulated day, read through the 1:2 divider.
struct SyntheticBattery {
    clock: Clock,
    config: NodeConfig,
}

impl BatteryProbe for SyntheticBattery {
    fn read_raw(&mut self) -> Result<u16, BatteryError> {
        let days = self.clock.now() / 86_400.0;
        let volts = (4.15 - 0.02 * days).max(3.2);
        let battery = &self.config.battery;
        let raw = (volts - battery.offset_v as f64) / battery.divider_ratio as f64
            / battery.reference_v as f64
            * battery.full_scale as f64;
        Ok(raw.clamp(0.0, battery.full_scale as f64) as u16)
    }
}

struct ScriptedRadio {
    script: Script,
    /// Behaviour of the current cycle, drawn on `begin`
    current: char,
    attempts: u32,
    started: bool,
}

impl ScriptedRadio {
    fn new(script: Script) -> Self {
        Self {
            script,
            current: '.',
            attempts: 0,
            started: false,
        }
    }
}

impl Radio for ScriptedRadio {
    async fn begin(&mut self) -> Result<(), RadioError> {
        self.current = self.script.next();
        self.attempts = 0;
        if self.current == 'i' {
            self.started = false;
            return Err(RadioError::Init("scripted init failure"));
        }
        self.started = true;
        Ok(())
    }

    async fn transmit(&mut self, packet: &[u8]) -> Result<(), RadioError> {
        if !self.started {
            return Err(RadioError::NotReady);
        }
        self.attempts += 1;
        let fails = match self.current {
            'x' => true,
            'r' => self.attempts == 1,
            _ => false,
        };
        if fails {
            return Err(RadioError::Transmit("scripted transmit failure"));
        }

        info!("[air] {}", String::from_utf8_lossy(packet));
        Ok(())
    }

    async fn sleep(&mut self) -> Result<(), RadioError> {
        self.started = false;
        debug!("[radio] sleeping");
        Ok(())
    }
}

/// Framebuffer-backed OLED. Each shown screen is logged as text art.
struct SimOled {
    framebuffer: Framebuffer,
    #[cfg(feature = "window")]
    window: window::OledWindow,
}

impl SimOled {
    fn new() -> Self {
        Self {
            framebuffer: Framebuffer::new(),
            #[cfg(feature = "window")]
            window: window::OledWindow::new(),
        }
    }

    fn present(&mut self) {
        let mut art = String::new();
        if self.framebuffer.write_ascii(&mut art).is_ok() {
            info!("[oled]\n{}", art.trim_end());
        }

        #[cfg(feature = "window")]
        self.window.present(&mut self.framebuffer);
        #[cfg(not(feature = "window"))]
        {
            let mut sink = NullTarget;
            if let Err(e) = self.framebuffer.flush(&mut sink) {
                match e {}
            }
        }
    }
}

/// Accepts and drops pixels, so the framebuffer's change tracking resets
/// the same way it does with a real panel.
#[cfg(not(feature = "window"))]
struct NullTarget;

#[cfg(not(feature = "window"))]
impl OriginDimensions for NullTarget {
    fn size(&self) -> Size {
        Size::new(
            lorasense_core::display::DISPLAY_WIDTH_PX,
            lorasense_core::display::DISPLAY_HEIGHT_PX,
        )
    }
}

#[cfg(not(feature = "window"))]
impl DrawTarget for NullTarget {
    type Color = BinaryColor;
    type Error = std::convert::Infallible;

    fn draw_iter<I>(&mut self, _pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        Ok(())
    }
}

impl StatusDisplay for SimOled {
    fn show(&mut self, screen: &Screen) -> Result<(), DisplayError> {
        if let Err(e) = render(screen, &mut self.framebuffer) {
            match e {}
        }
        self.present();
        Ok(())
    }

    fn power_off(&mut self) -> Result<(), DisplayError> {
        if let Err(e) = self.framebuffer.clear(BinaryColor::Off) {
            match e {}
        }
        #[cfg(feature = "window")]
        self.window.present(&mut self.framebuffer);
        debug!("[oled] off");
        Ok(())
    }
}

struct SimLed;

impl StatusLed for SimLed {
    fn set(&mut self, on: bool) {
        debug!("[led] {}", if on { "on" } else { "off" });
    }
}

/// Advances the clock; sleeps for real only when a speedup is configured.
struct SimDelay {
    clock: Clock,
    speedup: u32,
}

impl SimDelay {
    fn wait(&self, duration: Duration) {
        self.clock.advance(duration.as_secs_f64());
        if self.speedup > 0 {
            std::thread::sleep(duration / self.speedup);
        }
    }
}

impl DelayNs for SimDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.wait(Duration::from_nanos(ns as u64));
    }
}

#[cfg(feature = "window")]
mod window {
    use embedded_graphics::pixelcolor::BinaryColor;
    use embedded_graphics::prelude::*;
    use embedded_graphics_simulator::{
        BinaryColorTheme, OutputSettingsBuilder, SimulatorDisplay, Window,
    };
    use lorasense_core::display::{DISPLAY_HEIGHT_PX, DISPLAY_WIDTH_PX};
    use lorasense_core::framebuffer::Framebuffer;

    /// Pixel scale factor for the simulator window.
    const WINDOW_SCALE: u32 = 4;

    pub struct OledWindow {
        display: SimulatorDisplay<BinaryColor>,
        window: Window,
    }

    impl OledWindow {
        pub fn new() -> Self {
            let display =
                SimulatorDisplay::new(Size::new(DISPLAY_WIDTH_PX, DISPLAY_HEIGHT_PX));
            let settings = OutputSettingsBuilder::new()
                .theme(BinaryColorTheme::OledBlue)
                .scale(WINDOW_SCALE)
                .build();
            let window = Window::new("lorasense OLED", &settings);
            Self { display, window }
        }

        pub fn present(&mut self, framebuffer: &mut Framebuffer) {
            if let Err(e) = framebuffer.flush(&mut self.display) {
                match e {}
            }
            self.window.update(&self.display);
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn node_config_from_env() -> NodeConfig {
    let mut config = NodeConfig::default();

    let mut vars: Vec<(String, String)> = env::vars()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX) && !key.starts_with(SIM_PREFIX))
        .collect();
    vars.sort();

    for (key, value) in vars {
        match config.apply(&key, &value) {
            Ok(()) => info!("Setting {}={}", key, value),
            Err(e) => warn!("Ignoring {}={}: {}", key, value, e),
        }
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration ({}), falling back to defaults", e);
        return NodeConfig::default();
    }
    config
}

fn sim_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    let key = format!("{SIM_PREFIX}{name}");
    match env::var(&key) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={}", key, value);
            default
        }),
        Err(_) => default,
    }
}

// ---------------------------------------------------------------------------
// Retained memory
// ---------------------------------------------------------------------------

/// Stand-in for RTC fast memory: a file when configured, otherwise a block
/// that lives as long as the process.
struct RetainedStore {
    path: Option<PathBuf>,
    block: [u8; RETAINED_LEN],
}

impl RetainedStore {
    fn open(path: Option<PathBuf>) -> Self {
        let mut block = [0u8; RETAINED_LEN];
        if let Some(path) = &path {
            match fs::read(path) {
                Ok(bytes) if bytes.len() == RETAINED_LEN => block.copy_from_slice(&bytes),
                Ok(bytes) => warn!(
                    "{} holds {} bytes, expected {}; cold boot",
                    path.display(),
                    bytes.len(),
                    RETAINED_LEN
                ),
                Err(e) => info!("No retained state at {} ({}); cold boot", path.display(), e),
            }
        }
        Self { path, block }
    }

    fn load(&self) -> RetainedState {
        RetainedState::load(&self.block)
    }

    fn store(&mut self, state: &RetainedState) {
        self.block = state.to_bytes();
        if let Some(path) = &self.path
            && let Err(e) = fs::write(path, self.block)
        {
            error!("Failed to persist retained state to {}: {}", path.display(), e);
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting lorasense simulator");

    let config = node_config_from_env();
    info!("{}", config.summary());

    let cycles: u32 = sim_var("CYCLES", DEFAULT_CYCLES);
    let speedup: u32 = sim_var("SPEEDUP", 0);
    let radio_script: String = sim_var("RADIO", String::from("."));
    let sensor_script: String = sim_var("SENSOR", String::from("."));
    let state_path = env::var_os(format!("{SIM_PREFIX}STATE")).map(PathBuf::from);

    let clock = Clock::default();
    let mut store = RetainedStore::open(state_path);
    let mut delay = SimDelay {
        clock: clock.clone(),
        speedup,
    };
    let mut node = Node {
        sensor: SyntheticDht {
            clock: clock.clone(),
            script: Script::parse(&sensor_script),
        },
        battery: SyntheticBattery {
            clock: clock.clone(),
            config: config.clone(),
        },
        radio: ScriptedRadio::new(Script::parse(&radio_script)),
        display: SimOled::new(),
        led: SimLed,
    };

    let mut delivered = 0u32;
    for _ in 0..cycles {
        // Like a reset after deep sleep, only the retained block carries over
        let mut retained = store.load();
        let report = block_on(run_cycle(&mut node, &mut retained, &config, &mut delay));
        store.store(&retained);

        if report.outcome.delivered() {
            delivered += 1;
        }

        let mut line = String::new();
        let _ = write!(
            line,
            "boot {:>4} | {:?} | display {} | failures in a row {}",
            report.boot,
            report.outcome,
            if report.display_shown { "on " } else { "off" },
            retained.consecutive_failures
        );
        info!("{}", line);

        match report.next_wake {
            NextWake::DeepSleep(duration) | NextWake::Poll(duration) => delay.wait(duration),
        }
    }

    info!(
        "Simulated {} cycles over {:.1} h, {} delivered",
        cycles,
        clock.now() / 3600.0,
        delivered
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_repeats_and_defaults() {
        let mut script = Script::parse(". r\nx");
        let drawn: String = (0..5).map(|_| script.next()).collect();
        assert_eq!(drawn, ".rx.r");

        let mut empty = Script::parse("  ");
        assert_eq!(empty.next(), '.');
    }

    #[test]
    fn test_battery_discharges_through_divider() {
        let clock = Clock::default();
        let config = NodeConfig::default();
        let mut battery = SyntheticBattery {
            clock: clock.clone(),
            config: config.clone(),
        };

        let fresh = battery.read_raw().unwrap();
        let volts = lorasense_core::battery::voltage_from_raw(fresh, &config.battery);
        assert!((volts - 4.15).abs() < 0.01);

        clock.advance(30.0 * 86_400.0);
        assert!(battery.read_raw().unwrap() < fresh);
    }

    #[test]
    fn test_scripted_cycles_update_retained_store() {
        let config = NodeConfig::default();
        let clock = Clock::default();
        let mut store = RetainedStore::open(None);
        let mut delay = SimDelay {
            clock: clock.clone(),
            speedup: 0,
        };
        let mut node = Node {
            sensor: SyntheticDht {
                clock: clock.clone(),
                script: Script::parse("."),
            },
            battery: SyntheticBattery {
                clock: clock.clone(),
                config: config.clone(),
            },
            radio: ScriptedRadio::new(Script::parse(".x")),
            display: SimOled::new(),
            led: SimLed,
        };

        for _ in 0..2 {
            let mut retained = store.load();
            block_on(run_cycle(&mut node, &mut retained, &config, &mut delay));
            store.store(&retained);
        }

        let state = store.load();
        assert_eq!(state.boot_count, 2);
        assert_eq!(state.consecutive_failures, 1);
        // Settle, linger and failure pauses all went to the virtual clock
        assert!(clock.now() >= 4.0);
    }
}
