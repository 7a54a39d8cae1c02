//! Build-time node configuration
//!
//! `build.rs` forwards `LORASENSE_*` variables (environment or `.env`) to the
//! compiler, so the image carries its settings without any flash storage.

use log::{error, info, warn};
use lorasense_core::NodeConfig;
use lorasense_core::config::CONFIG_KEYS;

macro_rules! overrides {
    ($($key:literal),* $(,)?) => {
        [$(($key, option_env!(concat!("LORASENSE_", $key)))),*]
    };
}

/// Every setting baked into this build, `None` where the default applies.
const BUILD_OVERRIDES: [(&str, Option<&str>); 15] = overrides![
    "NODE_ID",
    "POWER_MODE",
    "SLEEP_MINUTES",
    "POLL_SECONDS",
    "DISPLAY_EVERY",
    "DISPLAY_ON_FAILURE",
    "LORA_FREQUENCY_HZ",
    "LORA_SF",
    "LORA_BW_KHZ",
    "LORA_CR",
    "LORA_TX_POWER",
    "LORA_PREAMBLE",
    "BATTERY_DIVIDER",
    "BATTERY_OFFSET_V",
    "SENSOR_SETTLE_MS",
];

const fn same_key(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

// `build.rs` forwards exactly `CONFIG_KEYS`; every one of them must be read here
const _: () = {
    assert!(BUILD_OVERRIDES.len() == CONFIG_KEYS.len());
    let mut i = 0;
    while i < CONFIG_KEYS.len() {
        assert!(
            same_key(BUILD_OVERRIDES[i].0, CONFIG_KEYS[i]),
            "BUILD_OVERRIDES is out of step with CONFIG_KEYS"
        );
        i += 1;
    }
};

/// Defaults with the build overrides applied.
///
/// A bad override is logged and skipped. If the result fails validation as a
/// whole, the node runs on the defaults rather than not at all.
pub fn load() -> NodeConfig {
    let mut config = NodeConfig::default();

    for (key, value) in BUILD_OVERRIDES {
        let Some(value) = value else {
            continue;
        };
        match config.apply(key, value) {
            Ok(()) => info!("Setting {}={}", key, value),
            Err(e) => warn!("Ignoring setting {}={}: {}", key, value, e),
        }
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration ({}), falling back to defaults", e);
        return NodeConfig::default();
    }

    config
}
