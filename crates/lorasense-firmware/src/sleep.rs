//! Deep sleep with a timer wakeup

use core::time::Duration;

use esp_hal::rtc_cntl::sleep::TimerWakeupSource;
use esp_hal::rtc_cntl::{Rtc, wakeup_cause};
use esp_hal::system::SleepSource;
use log::info;

/// Log why the chip is running. A timer wake is the normal cycle, anything
/// else is a fresh power-on or a reset.
pub fn log_wake_cause() -> SleepSource {
    let cause = wakeup_cause();
    match cause {
        SleepSource::Timer => info!("Woke from deep sleep"),
        other => info!("Started without a timer wake ({:?})", other),
    }
    cause
}

/// Power down until the timer fires. Execution restarts from reset.
pub fn enter_deep_sleep(rtc: &mut Rtc<'_>, duration: Duration) -> ! {
    info!("Going to sleep for {}s", duration.as_secs());
    let timer = TimerWakeupSource::new(duration);
    rtc.sleep_deep(&[&timer])
}
