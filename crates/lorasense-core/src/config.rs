//! Node configuration
//!
//! Defaults reproduce the field-deployed node (TTGO LoRa32 V1.6 in a garage).
//! Overrides arrive as `KEY=value` text pairs: the firmware gets them from
//! build-time environment variables, the simulator from the process
//! environment. Both paths go through [`NodeConfig::apply`] and
//! [`NodeConfig::validate`].

use core::fmt::Write;
use core::str::FromStr;

use thiserror_no_std::Error;

use crate::sensors::DHT22_MIN_INTERVAL_MS;

/// Longest accepted node identifier.
pub const MAX_NODE_ID_LEN: usize = 31;

/// Prefix of every environment variable that configures the node.
pub const ENV_PREFIX: &str = "LORASENSE_";

/// Every key understood by [`NodeConfig::apply`].
pub const CONFIG_KEYS: [&str; 15] = [
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

pub type NodeId = heapless::String<32>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown configuration key '{0}'")]
    UnknownKey(heapless::String<24>),
    #[error("Invalid value for {key}: {details}")]
    InvalidValue {
        key: &'static str,
        details: &'static str,
    },
    #[error("{key} out of range: {details}")]
    OutOfRange {
        key: &'static str,
        details: &'static str,
    },
}

/// How the node spends the time between two wake cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    /// Run one cycle, then enter deep sleep until the RTC timer fires.
    DeepSleep,
    /// Stay powered and poll every `poll_seconds` (bench / USB powered).
    AlwaysOn,
}

impl FromStr for PowerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "deep-sleep" | "deep_sleep" | "sleep" => Ok(Self::DeepSleep),
            "always-on" | "always_on" | "poll" => Ok(Self::AlwaysOn),
            _ => Err(ConfigError::InvalidValue {
                key: "POWER_MODE",
                details: "expected 'deep-sleep' or 'always-on'",
            }),
        }
    }
}

/// When the OLED is switched on in deep-sleep mode.
///
/// The panel draws a few milliamps while lit, so on battery it is only shown
/// on the first boot, periodically, and after a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayPolicy {
    /// Show the display on every Nth boot. `0` disables the periodic rule.
    pub every_n_boots: u32,
    /// Show the display in the cycle following a failed transmission.
    pub on_failure: bool,
}

impl Default for DisplayPolicy {
    fn default() -> Self {
        Self {
            every_n_boots: 12,
            on_failure: true,
        }
    }
}

/// SF6 is left out: it needs implicit-header packets, and the gateway only
/// decodes explicit headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadingFactor {
    Sf7,
    Sf8,
    Sf9,
    Sf10,
    Sf11,
    Sf12,
}

impl SpreadingFactor {
    pub const fn value(self) -> u8 {
        match self {
            Self::Sf7 => 7,
            Self::Sf8 => 8,
            Self::Sf9 => 9,
            Self::Sf10 => 10,
            Self::Sf11 => 11,
            Self::Sf12 => 12,
        }
    }

    pub const fn from_value(value: u8) -> Option<Self> {
        match value {
            7 => Some(Self::Sf7),
            8 => Some(Self::Sf8),
            9 => Some(Self::Sf9),
            10 => Some(Self::Sf10),
            11 => Some(Self::Sf11),
            12 => Some(Self::Sf12),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    Khz62,
    Khz125,
    Khz250,
    Khz500,
}

impl Bandwidth {
    pub const fn hz(self) -> u32 {
        match self {
            Self::Khz62 => 62_500,
            Self::Khz125 => 125_000,
            Self::Khz250 => 250_000,
            Self::Khz500 => 500_000,
        }
    }
}

impl FromStr for Bandwidth {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "62" | "62.5" => Ok(Self::Khz62),
            "125" => Ok(Self::Khz125),
            "250" => Ok(Self::Khz250),
            "500" => Ok(Self::Khz500),
            _ => Err(ConfigError::InvalidValue {
                key: "LORA_BW_KHZ",
                details: "expected 62.5, 125, 250 or 500",
            }),
        }
    }
}

/// LoRa forward error correction rate `4/x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingRate {
    Cr4_5,
    Cr4_6,
    Cr4_7,
    Cr4_8,
}

impl FromStr for CodingRate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let denominator = s.trim().strip_prefix("4/").unwrap_or(s.trim());
        match denominator {
            "5" => Ok(Self::Cr4_5),
            "6" => Ok(Self::Cr4_6),
            "7" => Ok(Self::Cr4_7),
            "8" => Ok(Self::Cr4_8),
            _ => Err(ConfigError::InvalidValue {
                key: "LORA_CR",
                details: "expected 4/5, 4/6, 4/7 or 4/8",
            }),
        }
    }
}

/// Point-to-point LoRa modulation. Defaults match the receiver gateway
/// (SF7, 125 kHz, 4/5, 8 symbol preamble, no CRC, private sync word).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioSettings {
    pub frequency_hz: u32,
    pub spreading_factor: SpreadingFactor,
    pub bandwidth: Bandwidth,
    pub coding_rate: CodingRate,
    pub preamble_len: u16,
    pub crc_on: bool,
    pub tx_power_dbm: i8,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            frequency_hz: 868_000_000,
            spreading_factor: SpreadingFactor::Sf7,
            bandwidth: Bandwidth::Khz125,
            coding_rate: CodingRate::Cr4_5,
            preamble_len: 8,
            crc_on: false,
            tx_power_dbm: 17,
        }
    }
}

/// Battery divider calibration for the ADC pin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryConfig {
    /// Raw ADC count at the reference voltage (12-bit)
    pub full_scale: u16,
    /// ADC reference voltage in volts
    pub reference_v: f32,
    /// Ratio of the resistor divider between battery and ADC pin
    pub divider_ratio: f32,
    /// Constant correction added after conversion
    pub offset_v: f32,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            full_scale: 4095,
            reference_v: 3.3,
            divider_ratio: 2.0,
            offset_v: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub node_id: NodeId,
    pub power_mode: PowerMode,
    pub sleep_minutes: u32,
    pub poll_seconds: u32,
    pub display: DisplayPolicy,
    pub radio: RadioSettings,
    pub battery: BatteryConfig,
    /// Wait between power-up and the DHT22 read
    pub sensor_settle_ms: u32,
    /// Pause after a radio bring-up failure before going back to sleep
    pub radio_fail_delay_ms: u32,
    /// How long the result screen stays up before shutdown
    pub display_linger_ms: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let mut node_id = NodeId::new();
        // "GarageTemp" always fits
        let _ = node_id.push_str("GarageTemp");

        Self {
            node_id,
            power_mode: PowerMode::DeepSleep,
            sleep_minutes: 5,
            poll_seconds: 30,
            display: DisplayPolicy::default(),
            radio: RadioSettings::default(),
            battery: BatteryConfig::default(),
            sensor_settle_ms: 2000,
            radio_fail_delay_ms: 1000,
            display_linger_ms: 1000,
        }
    }
}

impl NodeConfig {
    /// Replace the node identifier.
    ///
    /// The id is embedded verbatim in the JSON payload, so only
    /// `[A-Za-z0-9_-]` is accepted.
    pub fn set_node_id(&mut self, id: &str) -> Result<(), ConfigError> {
        validate_node_id(id)?;
        self.node_id.clear();
        self.node_id
            .push_str(id)
            .map_err(|_| ConfigError::OutOfRange {
                key: "NODE_ID",
                details: "longer than 31 characters",
            })
    }

    /// Apply a single `KEY=value` override.
    ///
    /// Keys may carry the [`ENV_PREFIX`]. Values are trimmed.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let key = key.trim();
        let key = key.strip_prefix(ENV_PREFIX).unwrap_or(key);
        let value = value.trim();

        match key {
            "NODE_ID" => self.set_node_id(value)?,
            "POWER_MODE" => self.power_mode = value.parse()?,
            "SLEEP_MINUTES" => self.sleep_minutes = parse_number(value, "SLEEP_MINUTES")?,
            "POLL_SECONDS" => self.poll_seconds = parse_number(value, "POLL_SECONDS")?,
            "DISPLAY_EVERY" => {
                self.display.every_n_boots = parse_number(value, "DISPLAY_EVERY")?
            }
            "DISPLAY_ON_FAILURE" => {
                self.display.on_failure = parse_bool(value, "DISPLAY_ON_FAILURE")?
            }
            "LORA_FREQUENCY_HZ" => {
                self.radio.frequency_hz = parse_number(value, "LORA_FREQUENCY_HZ")?
            }
            "LORA_SF" => {
                let sf: u8 = parse_number(value, "LORA_SF")?;
                self.radio.spreading_factor =
                    SpreadingFactor::from_value(sf).ok_or(ConfigError::OutOfRange {
                        key: "LORA_SF",
                        details: "spreading factor must be 7..=12",
                    })?;
            }
            "LORA_BW_KHZ" => self.radio.bandwidth = value.parse()?,
            "LORA_CR" => self.radio.coding_rate = value.parse()?,
            "LORA_TX_POWER" => self.radio.tx_power_dbm = parse_number(value, "LORA_TX_POWER")?,
            "LORA_PREAMBLE" => self.radio.preamble_len = parse_number(value, "LORA_PREAMBLE")?,
            "BATTERY_DIVIDER" => {
                self.battery.divider_ratio = parse_number(value, "BATTERY_DIVIDER")?
            }
            "BATTERY_OFFSET_V" => {
                self.battery.offset_v = parse_number(value, "BATTERY_OFFSET_V")?
            }
            "SENSOR_SETTLE_MS" => {
                self.sensor_settle_ms = parse_number(value, "SENSOR_SETTLE_MS")?
            }
            other => {
                let mut name = heapless::String::new();
                for c in other.chars() {
                    if name.push(c).is_err() {
                        break;
                    }
                }
                return Err(ConfigError::UnknownKey(name));
            }
        }

        Ok(())
    }

    /// Check cross-field limits that single-value parsing cannot catch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_node_id(&self.node_id)?;

        if !(1..=24 * 60).contains(&self.sleep_minutes) {
            return Err(ConfigError::OutOfRange {
                key: "SLEEP_MINUTES",
                details: "must be between 1 and 1440",
            });
        }
        if !(1..=86_400).contains(&self.poll_seconds) {
            return Err(ConfigError::OutOfRange {
                key: "POLL_SECONDS",
                details: "must be between 1 and 86400",
            });
        }
        if self.power_mode == PowerMode::AlwaysOn
            && (self.poll_seconds as u64) * 1000 < DHT22_MIN_INTERVAL_MS as u64
        {
            return Err(ConfigError::OutOfRange {
                key: "POLL_SECONDS",
                details: "DHT22 needs at least 2 s between reads",
            });
        }
        if !(137_000_000..=1_020_000_000).contains(&self.radio.frequency_hz) {
            return Err(ConfigError::OutOfRange {
                key: "LORA_FREQUENCY_HZ",
                details: "SX127x covers 137 MHz to 1020 MHz",
            });
        }
        if !(2..=20).contains(&self.radio.tx_power_dbm) {
            return Err(ConfigError::OutOfRange {
                key: "LORA_TX_POWER",
                details: "PA_BOOST output must be between 2 and 20 dBm",
            });
        }
        if self.radio.preamble_len < 6 {
            return Err(ConfigError::OutOfRange {
                key: "LORA_PREAMBLE",
                details: "preamble must be at least 6 symbols",
            });
        }
        if !(self.battery.divider_ratio.is_finite() && self.battery.divider_ratio > 0.0) {
            return Err(ConfigError::OutOfRange {
                key: "BATTERY_DIVIDER",
                details: "divider ratio must be positive",
            });
        }
        if !self.battery.offset_v.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "BATTERY_OFFSET_V",
                details: "offset must be a finite number",
            });
        }
        if self.battery.full_scale == 0 || self.battery.reference_v <= 0.0 {
            return Err(ConfigError::OutOfRange {
                key: "BATTERY",
                details: "ADC full scale and reference must be positive",
            });
        }

        Ok(())
    }

    /// Human-readable one-line summary for the boot log.
    pub fn summary(&self) -> heapless::String<128> {
        let mut s = heapless::String::new();
        let wake = match self.power_mode {
            PowerMode::DeepSleep => ("sleep", self.sleep_minutes, "min"),
            PowerMode::AlwaysOn => ("poll", self.poll_seconds, "s"),
        };
        let _ = write!(
            s,
            "id={} {}={}{} f={}Hz SF{} bw={}Hz tx={}dBm display_every={}",
            self.node_id,
            wake.0,
            wake.1,
            wake.2,
            self.radio.frequency_hz,
            self.radio.spreading_factor.value(),
            self.radio.bandwidth.hz(),
            self.radio.tx_power_dbm,
            self.display.every_n_boots,
        );
        s
    }
}

fn validate_node_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "NODE_ID",
            details: "node id must not be empty",
        });
    }
    if id.len() > MAX_NODE_ID_LEN {
        return Err(ConfigError::OutOfRange {
            key: "NODE_ID",
            details: "longer than 31 characters",
        });
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConfigError::InvalidValue {
            key: "NODE_ID",
            details: "only letters, digits, '_' and '-' are allowed",
        });
    }
    Ok(())
}

fn parse_number<T: FromStr>(value: &str, key: &'static str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        details: "not a number",
    })
}

fn parse_bool(value: &str, key: &'static str) -> Result<bool, ConfigError> {
    match value {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            details: "expected true/false",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_field_node() {
        let config = NodeConfig::default();
        assert_eq!(config.node_id.as_str(), "GarageTemp");
        assert_eq!(config.power_mode, PowerMode::DeepSleep);
        assert_eq!(config.sleep_minutes, 5);
        assert_eq!(config.radio.frequency_hz, 868_000_000);
        assert_eq!(config.radio.spreading_factor, SpreadingFactor::Sf7);
        assert_eq!(config.battery.divider_ratio, 2.0);
        assert_eq!(config.sensor_settle_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_accepts_prefixed_keys() {
        let mut config = NodeConfig::default();
        config.apply("LORASENSE_NODE_ID", "Shed-2").unwrap();
        config.apply("SLEEP_MINUTES", " 15 ").unwrap();
        config.apply("LORA_BW_KHZ", "250").unwrap();
        config.apply("LORA_CR", "4/8").unwrap();
        config.apply("POWER_MODE", "always-on").unwrap();
        config.apply("DISPLAY_ON_FAILURE", "off").unwrap();

        assert_eq!(config.node_id.as_str(), "Shed-2");
        assert_eq!(config.sleep_minutes, 15);
        assert_eq!(config.radio.bandwidth, Bandwidth::Khz250);
        assert_eq!(config.radio.coding_rate, CodingRate::Cr4_8);
        assert_eq!(config.power_mode, PowerMode::AlwaysOn);
        assert!(!config.display.on_failure);
    }

    #[test]
    fn test_apply_rejects_bad_input() {
        let mut config = NodeConfig::default();

        assert!(matches!(
            config.apply("COLOR", "blue"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            config.apply("SLEEP_MINUTES", "five"),
            Err(ConfigError::InvalidValue { key: "SLEEP_MINUTES", .. })
        ));
        assert!(matches!(
            config.apply("LORA_SF", "13"),
            Err(ConfigError::OutOfRange { key: "LORA_SF", .. })
        ));
        assert!(matches!(
            config.apply("LORA_SF", "6"),
            Err(ConfigError::OutOfRange { key: "LORA_SF", .. })
        ));
        assert!(config.apply("NODE_ID", "bad\"id").is_err());
        assert!(config.apply("NODE_ID", "").is_err());

        // Failed overrides leave the previous value in place
        assert_eq!(config.sleep_minutes, 5);
        assert_eq!(config.node_id.as_str(), "GarageTemp");
    }

    #[test]
    fn test_validate_limits() {
        let mut config = NodeConfig::default();
        config.sleep_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.radio.frequency_hz = 2_400_000_000;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.radio.tx_power_dbm = 23;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.battery.divider_ratio = 0.0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.power_mode = PowerMode::AlwaysOn;
        config.poll_seconds = 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { key: "POLL_SECONDS", .. })
        ));
        config.poll_seconds = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_every_listed_key_is_understood() {
        let samples = [
            "Node1", "deep-sleep", "10", "60", "3", "true", "915000000", "9", "125", "5",
            "14", "8", "2.0", "0.1", "1500",
        ];
        let mut config = NodeConfig::default();
        for (key, value) in CONFIG_KEYS.iter().zip(samples) {
            assert!(config.apply(key, value).is_ok(), "key {key} rejected");
        }
        assert!(config.validate().is_ok());
    }
}
