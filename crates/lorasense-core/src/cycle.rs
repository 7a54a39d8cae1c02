//! One wake cycle of the node
//!
//! Everything between reset and the next sleep runs through [`run_cycle`]:
//! measure, report over the radio with a single immediate retry, and show
//! the result on the OLED when the [`CyclePlan`] asks for it. The display is
//! the largest consumer after the radio, so in deep-sleep mode it only comes
//! on for the first boot, every `every_n_boots`-th boot, and after a failed
//! cycle.

use core::time::Duration;

use embedded_hal_async::delay::DelayNs;
use log::{debug, error, info, warn};

use crate::battery::{self, BatteryProbe, BatteryStatus};
use crate::config::{NodeConfig, PowerMode};
use crate::display::{Screen, StatusDisplay};
use crate::payload::Payload;
use crate::radio::{self, Radio};
use crate::retained::RetainedState;
use crate::sensors::{ClimateReading, ClimateSensor};

/// On-board status LED, lit while the radio transmits.
pub trait StatusLed {
    fn set(&mut self, on: bool);
}

/// The peripherals one cycle works with.
pub struct Node<S, B, R, D, L> {
    pub sensor: S,
    pub battery: B,
    pub radio: R,
    pub display: D,
    pub led: L,
}

/// Per-boot decisions made before any hardware is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePlan {
    pub boot: u32,
    pub show_display: bool,
    /// Power everything down at the end of the cycle
    pub shut_down: bool,
}

impl CyclePlan {
    pub fn for_boot(boot: u32, retained: &RetainedState, config: &NodeConfig) -> Self {
        let show_display = match config.power_mode {
            PowerMode::AlwaysOn => true,
            PowerMode::DeepSleep => {
                let every = config.display.every_n_boots;
                boot == 1
                    || (every > 0 && boot % every == 0)
                    || (config.display.on_failure && retained.previous_failed())
            }
        };

        Self {
            boot,
            show_display,
            shut_down: config.power_mode == PowerMode::DeepSleep,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The payload went out, possibly on the second attempt
    Delivered { retried: bool },
    /// Both attempts failed
    SendFailed,
    /// The transceiver could not be started, nothing was sent
    RadioInitFailed,
    /// The payload could not be built, nothing was sent
    PayloadRejected,
}

impl CycleOutcome {
    pub fn delivered(self) -> bool {
        matches!(self, CycleOutcome::Delivered { .. })
    }
}

/// How the node waits for the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextWake {
    /// Timer wake from deep sleep; the next cycle starts from reset
    DeepSleep(Duration),
    /// Stay powered and run again after the interval
    Poll(Duration),
}

impl NextWake {
    pub fn for_config(config: &NodeConfig) -> Self {
        match config.power_mode {
            PowerMode::DeepSleep => {
                NextWake::DeepSleep(Duration::from_secs(config.sleep_minutes as u64 * 60))
            }
            PowerMode::AlwaysOn => NextWake::Poll(Duration::from_secs(config.poll_seconds as u64)),
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            NextWake::DeepSleep(d) | NextWake::Poll(d) => d,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub boot: u32,
    pub outcome: CycleOutcome,
    /// What was reported; zeros when the sensor failed
    pub reading: ClimateReading,
    pub sensor_ok: bool,
    pub battery: BatteryStatus,
    pub display_shown: bool,
    pub next_wake: NextWake,
}

fn show<D: StatusDisplay>(display: &mut D, screen: &Screen) {
    // A dead panel never stops the report from going out
    if let Err(e) = display.show(screen) {
        warn!("Display update failed: {}", e);
    }
}

/// Run one complete wake cycle and update the retained state.
pub async fn run_cycle<S, B, R, D, L, T>(
    node: &mut Node<S, B, R, D, L>,
    retained: &mut RetainedState,
    config: &NodeConfig,
    delay: &mut T,
) -> CycleReport
where
    S: ClimateSensor,
    B: BatteryProbe,
    R: Radio,
    D: StatusDisplay,
    L: StatusLed,
    T: DelayNs,
{
    let boot = retained.begin_boot();
    let plan = CyclePlan::for_boot(boot, retained, config);
    info!("--- Boot #{} ---", boot);
    debug!("Cycle plan: {:?}", plan);

    if plan.show_display {
        show(&mut node.display, &Screen::Reading { boot });
    }

    delay.delay_ms(config.sensor_settle_ms).await;

    let (reading, sensor_ok) = match node.sensor.read().await {
        Ok(reading) => {
            info!(
                "Temperature: {:.2}C, humidity: {:.2}%",
                reading.temperature_c, reading.humidity_pct
            );
            (reading, true)
        }
        Err(e) => {
            error!("Failed to read from DHT sensor: {}", e);
            (ClimateReading::ZERO, false)
        }
    };

    let battery = battery::measure(&mut node.battery, &config.battery);
    info!("Battery: {:.2}V ({}%)", battery.voltage, battery.percent);

    let outcome = transmit_report(node, config, &plan, reading, battery, delay).await;

    if plan.show_display
        && let Some(screen) = result_screen(outcome, reading, sensor_ok, battery)
    {
        show(&mut node.display, &screen);
        delay.delay_ms(config.display_linger_ms).await;
    }

    if plan.shut_down {
        if let Err(e) = node.radio.sleep().await {
            warn!("Radio did not enter sleep: {}", e);
        }
        if let Err(e) = node.display.power_off() {
            warn!("Display did not power off: {}", e);
        }
        node.led.set(false);
    }

    retained.record(outcome.delivered());
    let next_wake = NextWake::for_config(config);
    info!(
        "Cycle done: {:?}, next wake in {}s",
        outcome,
        next_wake.duration().as_secs()
    );

    CycleReport {
        boot,
        outcome,
        reading,
        sensor_ok,
        battery,
        display_shown: plan.show_display,
        next_wake,
    }
}

async fn transmit_report<S, B, R, D, L, T>(
    node: &mut Node<S, B, R, D, L>,
    config: &NodeConfig,
    plan: &CyclePlan,
    reading: ClimateReading,
    battery: BatteryStatus,
    delay: &mut T,
) -> CycleOutcome
where
    R: Radio,
    D: StatusDisplay,
    L: StatusLed,
    T: DelayNs,
{
    if let Err(e) = node.radio.begin().await {
        error!("Starting LoRa failed: {}", e);
        delay.delay_ms(config.radio_fail_delay_ms).await;
        if plan.show_display {
            show(&mut node.display, &Screen::RadioInitFailed);
        }
        return CycleOutcome::RadioInitFailed;
    }

    let json = match Payload::new(&config.node_id, reading, battery.voltage).to_json() {
        Ok(json) => json,
        Err(e) => {
            error!("Payload rejected: {}", e);
            return CycleOutcome::PayloadRejected;
        }
    };

    info!(
        "Sending packet ({} bytes, ~{} ms on air): {}",
        json.len(),
        radio::time_on_air_us(&config.radio, json.len()) / 1000,
        json
    );

    node.led.set(true);
    let outcome = match node.radio.transmit(json.as_bytes()).await {
        Ok(()) => CycleOutcome::Delivered { retried: false },
        Err(e) => {
            warn!("Send failed ({}), retrying once", e);
            match node.radio.transmit(json.as_bytes()).await {
                Ok(()) => CycleOutcome::Delivered { retried: true },
                Err(e) => {
                    error!("Retry failed: {}", e);
                    CycleOutcome::SendFailed
                }
            }
        }
    };
    node.led.set(false);

    outcome
}

/// Screen shown at the end of the cycle. The init failure screen is shown
/// as soon as the failure happens.
fn result_screen(
    outcome: CycleOutcome,
    reading: ClimateReading,
    sensor_ok: bool,
    battery: BatteryStatus,
) -> Option<Screen> {
    match outcome {
        CycleOutcome::Delivered { retried } => Some(Screen::Sent {
            reading,
            sensor_ok,
            battery,
            retried,
        }),
        CycleOutcome::SendFailed | CycleOutcome::PayloadRejected => Some(Screen::SendFailed {
            reading,
            sensor_ok,
            battery,
        }),
        CycleOutcome::RadioInitFailed => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::BatteryError;
    use crate::display::DisplayError;
    use crate::radio::RadioError;
    use crate::sensors::SensorError;
    use embassy_futures::block_on;

    struct MockSensor(Result<ClimateReading, SensorError>);

    impl ClimateSensor for MockSensor {
        async fn read(&mut self) -> Result<ClimateReading, SensorError> {
            self.0
        }
    }

    struct MockBattery(u16);

    impl BatteryProbe for MockBattery {
        fn read_raw(&mut self) -> Result<u16, BatteryError> {
            Ok(self.0)
        }
    }

    /// Fails `begin` when asked to, and fails the first `failing_sends`
    /// transmissions.
    #[derive(Default)]
    struct MockRadio {
        begin_fails: bool,
        begins: u8,
        failing_sends: u8,
        attempts: u8,
        sent: heapless::Vec<heapless::Vec<u8, 96>, 4>,
        asleep: bool,
    }

    impl Radio for MockRadio {
        async fn begin(&mut self) -> Result<(), RadioError> {
            self.begins += 1;
            if self.begin_fails {
                Err(RadioError::Init("no response on SPI"))
            } else {
                Ok(())
            }
        }

        async fn transmit(&mut self, packet: &[u8]) -> Result<(), RadioError> {
            self.attempts += 1;
            if self.failing_sends > 0 {
                self.failing_sends -= 1;
                return Err(RadioError::Transmit("tx timeout"));
            }
            let _ = self
                .sent
                .push(heapless::Vec::from_slice(packet).unwrap_or_default());
            Ok(())
        }

        async fn sleep(&mut self) -> Result<(), RadioError> {
            self.asleep = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockDisplay {
        shown: heapless::Vec<Screen, 4>,
        off: bool,
        broken: bool,
    }

    impl StatusDisplay for MockDisplay {
        fn show(&mut self, screen: &Screen) -> Result<(), DisplayError> {
            if self.broken {
                return Err(DisplayError::Bus("NACK"));
            }
            self.off = false;
            let _ = self.shown.push(*screen);
            Ok(())
        }

        fn power_off(&mut self) -> Result<(), DisplayError> {
            self.off = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockLed {
        on: bool,
        blinks: u32,
    }

    impl StatusLed for MockLed {
        fn set(&mut self, on: bool) {
            if on && !self.on {
                self.blinks += 1;
            }
            self.on = on;
        }
    }

    #[derive(Default)]
    struct MockDelay {
        total_ns: u64,
    }

    impl DelayNs for MockDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.total_ns += ns as u64;
        }
    }

    type TestNode = Node<MockSensor, MockBattery, MockRadio, MockDisplay, MockLed>;

    fn node() -> TestNode {
        Node {
            sensor: MockSensor(Ok(ClimateReading {
                temperature_c: 22.5,
                humidity_pct: 50.2,
            })),
            battery: MockBattery(2555),
            radio: MockRadio::default(),
            display: MockDisplay::default(),
            led: MockLed::default(),
        }
    }

    fn run(node: &mut TestNode, retained: &mut RetainedState, config: &NodeConfig) -> CycleReport {
        block_on(run_cycle(node, retained, config, &mut MockDelay::default()))
    }

    fn sent_text(node: &TestNode, index: usize) -> &str {
        core::str::from_utf8(&node.radio.sent[index]).unwrap_or("<invalid utf-8>")
    }

    #[test]
    fn test_first_boot_delivers_and_shows_display() {
        let config = NodeConfig::default();
        let mut retained = RetainedState::new();
        let mut node = node();
        let mut delay = MockDelay::default();

        let report = block_on(run_cycle(&mut node, &mut retained, &config, &mut delay));

        assert_eq!(report.boot, 1);
        assert_eq!(report.outcome, CycleOutcome::Delivered { retried: false });
        assert!(report.sensor_ok);
        assert!(report.display_shown);
        assert_eq!(
            sent_text(&node, 0),
            r#"{"id":"GarageTemp","t":22.50,"h":50.20,"v":4.12}"#
        );
        assert_eq!(node.display.shown[0], Screen::Reading { boot: 1 });
        assert!(matches!(
            node.display.shown[1],
            Screen::Sent { retried: false, .. }
        ));
        assert_eq!(node.led.blinks, 1);
        assert!(!node.led.on);
        assert!(node.radio.asleep);
        assert!(node.display.off);
        assert_eq!(
            report.next_wake,
            NextWake::DeepSleep(Duration::from_secs(300))
        );
        assert_eq!(retained.boot_count, 1);
        assert!(retained.last_delivered);
        // Settle time plus the result screen linger
        assert_eq!(delay.total_ns, 3_000_000_000);
    }

    #[test]
    fn test_dark_cycle_skips_linger() {
        let config = NodeConfig::default();
        let mut retained = RetainedState::new();
        retained.boot_count = 1;
        retained.last_delivered = true;
        let mut node = node();
        let mut delay = MockDelay::default();

        block_on(run_cycle(&mut node, &mut retained, &config, &mut delay));

        assert_eq!(delay.total_ns, 2_000_000_000);
    }

    #[test]
    fn test_display_stays_dark_between_scheduled_boots() {
        let config = NodeConfig::default();
        let mut retained = RetainedState::new();
        retained.boot_count = 1;
        retained.last_delivered = true;
        let mut node = node();

        let report = run(&mut node, &mut retained, &config);

        assert_eq!(report.boot, 2);
        assert!(!report.display_shown);
        assert!(node.display.shown.is_empty());
        // Still switched off before sleeping
        assert!(node.display.off);
        assert_eq!(node.radio.sent.len(), 1);
    }

    #[test]
    fn test_display_schedule() {
        let config = NodeConfig::default();
        let ok = RetainedState {
            last_delivered: true,
            ..RetainedState::new()
        };
        let failed = RetainedState {
            consecutive_failures: 1,
            ..RetainedState::new()
        };

        assert!(CyclePlan::for_boot(1, &ok, &config).show_display);
        assert!(!CyclePlan::for_boot(11, &ok, &config).show_display);
        assert!(CyclePlan::for_boot(12, &ok, &config).show_display);
        assert!(CyclePlan::for_boot(24, &ok, &config).show_display);
        assert!(CyclePlan::for_boot(5, &failed, &config).show_display);

        let mut quiet = NodeConfig::default();
        quiet.display.every_n_boots = 0;
        quiet.display.on_failure = false;
        assert!(CyclePlan::for_boot(1, &ok, &quiet).show_display);
        assert!(!CyclePlan::for_boot(12, &ok, &quiet).show_display);
        assert!(!CyclePlan::for_boot(5, &failed, &quiet).show_display);

        let mut always_on = NodeConfig::default();
        always_on.power_mode = PowerMode::AlwaysOn;
        let plan = CyclePlan::for_boot(7, &ok, &always_on);
        assert!(plan.show_display);
        assert!(!plan.shut_down);
    }

    #[test]
    fn test_single_retry_recovers() {
        let config = NodeConfig::default();
        let mut retained = RetainedState::new();
        let mut node = node();
        node.radio.failing_sends = 1;

        let report = run(&mut node, &mut retained, &config);

        assert_eq!(report.outcome, CycleOutcome::Delivered { retried: true });
        assert_eq!(node.radio.attempts, 2);
        assert!(matches!(
            node.display.shown[1],
            Screen::Sent { retried: true, .. }
        ));
        assert!(!retained.previous_failed());
    }

    #[test]
    fn test_second_failure_gives_up() {
        let config = NodeConfig::default();
        let mut retained = RetainedState::new();
        let mut node = node();
        node.radio.failing_sends = 3;

        let report = run(&mut node, &mut retained, &config);

        assert_eq!(report.outcome, CycleOutcome::SendFailed);
        // Exactly one retry, never more
        assert_eq!(node.radio.attempts, 2);
        assert!(matches!(node.display.shown[1], Screen::SendFailed { .. }));
        assert!(!node.led.on);
        assert_eq!(retained.consecutive_failures, 1);
    }

    #[test]
    fn test_failed_cycle_lights_display_next_time() {
        let config = NodeConfig::default();
        let mut retained = RetainedState::new();
        retained.boot_count = 2;
        let mut failing = node();
        failing.radio.failing_sends = 2;

        let report = run(&mut failing, &mut retained, &config);
        assert!(!report.display_shown);
        assert_eq!(report.outcome, CycleOutcome::SendFailed);

        let mut next = node();
        let report = run(&mut next, &mut retained, &config);
        assert_eq!(report.boot, 4);
        assert!(report.display_shown);
        assert_eq!(report.outcome, CycleOutcome::Delivered { retried: false });
        assert!(!retained.previous_failed());
    }

    #[test]
    fn test_radio_init_failure_waits_and_skips_transmit() {
        let config = NodeConfig::default();
        let mut retained = RetainedState::new();
        let mut node = node();
        node.radio.begin_fails = true;
        let mut delay = MockDelay::default();

        let report = block_on(run_cycle(&mut node, &mut retained, &config, &mut delay));

        assert_eq!(report.outcome, CycleOutcome::RadioInitFailed);
        assert_eq!(node.radio.attempts, 0);
        assert_eq!(node.led.blinks, 0);
        assert_eq!(
            node.display.shown.as_slice(),
            [Screen::Reading { boot: 1 }, Screen::RadioInitFailed]
        );
        // Settle time plus the failure pause, no linger
        assert_eq!(delay.total_ns, 3_000_000_000);
        assert!(retained.previous_failed());
    }

    #[test]
    fn test_non_finite_reading_is_rejected() {
        let config = NodeConfig::default();
        let mut retained = RetainedState::new();
        let mut node = node();
        node.sensor = MockSensor(Ok(ClimateReading {
            temperature_c: f32::NAN,
            humidity_pct: 50.2,
        }));
        let mut delay = MockDelay::default();

        let report = block_on(run_cycle(&mut node, &mut retained, &config, &mut delay));

        assert_eq!(report.outcome, CycleOutcome::PayloadRejected);
        assert_eq!(node.radio.attempts, 0);
        assert_eq!(node.led.blinks, 0);
        assert!(node.radio.asleep);
        assert_eq!(node.display.shown[0], Screen::Reading { boot: 1 });
        assert!(matches!(node.display.shown[1], Screen::SendFailed { .. }));
        assert_eq!(delay.total_ns, 3_000_000_000);
        assert!(retained.previous_failed());
    }

    #[test]
    fn test_radio_recovers_on_next_poll() {
        let mut config = NodeConfig::default();
        config.power_mode = PowerMode::AlwaysOn;
        let mut retained = RetainedState::new();
        let mut node = node();
        node.radio.begin_fails = true;

        let report = run(&mut node, &mut retained, &config);
        assert_eq!(report.outcome, CycleOutcome::RadioInitFailed);

        node.radio.begin_fails = false;
        let report = run(&mut node, &mut retained, &config);
        assert_eq!(report.boot, 2);
        assert_eq!(report.outcome, CycleOutcome::Delivered { retried: false });
        assert_eq!(node.radio.begins, 2);
        assert_eq!(node.radio.sent.len(), 1);
        assert!(!retained.previous_failed());
    }

    #[test]
    fn test_sensor_failure_reports_zeros() {
        let config = NodeConfig::default();
        let mut retained = RetainedState::new();
        let mut node = node();
        node.sensor = MockSensor(Err(SensorError::Timeout {
            sensor: "DHT22",
            stage: "response start",
        }));

        let report = run(&mut node, &mut retained, &config);

        assert!(!report.sensor_ok);
        assert_eq!(report.reading, ClimateReading::ZERO);
        assert_eq!(report.outcome, CycleOutcome::Delivered { retried: false });
        assert_eq!(
            sent_text(&node, 0),
            r#"{"id":"GarageTemp","t":0.00,"h":0.00,"v":4.12}"#
        );
        assert!(matches!(
            node.display.shown[1],
            Screen::Sent {
                sensor_ok: false,
                ..
            }
        ));
    }

    #[test]
    fn test_broken_display_does_not_block_report() {
        let config = NodeConfig::default();
        let mut retained = RetainedState::new();
        let mut node = node();
        node.display.broken = true;

        let report = run(&mut node, &mut retained, &config);

        assert_eq!(report.outcome, CycleOutcome::Delivered { retried: false });
        assert_eq!(node.radio.sent.len(), 1);
    }

    #[test]
    fn test_always_on_keeps_peripherals_up() {
        let mut config = NodeConfig::default();
        config.power_mode = PowerMode::AlwaysOn;
        config.poll_seconds = 30;
        let mut retained = RetainedState::new();
        let mut node = node();

        let report = run(&mut node, &mut retained, &config);

        assert_eq!(report.next_wake, NextWake::Poll(Duration::from_secs(30)));
        assert!(!node.radio.asleep);
        assert!(!node.display.off);
    }
}
