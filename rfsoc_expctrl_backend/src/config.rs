//! Configuration of the board connection, the acquisition reader and the channels.
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. JSON file (explicit path, or `rfsoc.json` in the working directory)
//! 3. Environment variables (`RFSOC_*`)
//! 4. CLI arguments (applied by the binary)

use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use maplit::btreemap;
use serde::{Deserialize, Serialize};

use rfsoc_compiler_backend::{DECIMATION_FACTORS, MIXER_LIMIT_MHZ, NUM_CHANNELS};

use crate::error::ConfigError;
use crate::reader::ReaderSettings;

pub const DEFAULT_CONFIG_FILE: &str = "rfsoc.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub board: BoardConfig,

    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    #[serde(default)]
    pub calibration: CalibrationConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads defaults, the config file and environment overrides, then validates.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        log::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Applies the `RFSOC_*` overrides found through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, val: &str) -> Result<T, ConfigError> {
            val.trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{}='{}' is not a valid value", key, val)))
        }

        if let Some(val) = lookup("RFSOC_HOST") {
            self.board.host = val;
        }
        if let Some(val) = lookup("RFSOC_PORT") {
            self.board.port = parse("RFSOC_PORT", &val)?;
        }
        if let Some(val) = lookup("RFSOC_MAX_RETRIES") {
            self.acquisition.max_retries = parse("RFSOC_MAX_RETRIES", &val)?;
        }
        if let Some(val) = lookup("RFSOC_LOG_LEVEL") {
            self.logging.level = val;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.board.host.is_empty() {
            return invalid("board host cannot be empty".into());
        }
        if self.board.port == 0 {
            return invalid("board port cannot be 0".into());
        }
        if self.board.timeout_ms == 0 {
            return invalid("board timeout cannot be 0".into());
        }
        let acq = &self.acquisition;
        if acq.max_retries == 0 {
            return invalid("max_retries must be at least 1".into());
        }
        if acq.max_drain_polls == 0 {
            return invalid("max_drain_polls must be at least 1".into());
        }
        if !(acq.accumulated_scale.is_finite() && acq.accumulated_scale > 0.) {
            return invalid(format!(
                "accumulated_scale must be positive, got {}",
                acq.accumulated_scale
            ));
        }
        let cal = &self.calibration;
        let channels = cal
            .dac
            .keys()
            .chain(cal.mixer_mhz.keys())
            .chain(cal.decimation.keys());
        for &channel in channels {
            if !(1..=NUM_CHANNELS).contains(&channel) {
                return invalid(format!("channel {} is outside 1..={}", channel, NUM_CHANNELS));
            }
        }
        for (channel, &coeff) in &cal.dac {
            if !(coeff > 0. && coeff <= 1.) {
                return invalid(format!(
                    "calibration {} of DAC {} is outside (0, 1]",
                    coeff, channel
                ));
            }
        }
        for (channel, &mhz) in &cal.mixer_mhz {
            if !(mhz.is_finite() && mhz.abs() < MIXER_LIMIT_MHZ) {
                return invalid(format!("mixer {} MHz of ADC {} is out of range", mhz, channel));
            }
        }
        for (channel, factor) in &cal.decimation {
            if !DECIMATION_FACTORS.contains(factor) {
                return invalid(format!(
                    "decimation {} of ADC {} is not supported",
                    factor, channel
                ));
            }
        }
        if let Some(freq) = self.sync.freq_sync {
            if !(freq.is_finite() && freq > 0.) {
                return invalid(format!("freq_sync must be positive, got {}", freq));
            }
        }
        Ok(())
    }

    pub fn reader_settings(&self) -> ReaderSettings {
        let acq = &self.acquisition;
        ReaderSettings {
            poll_interval: Duration::from_millis(acq.poll_interval_ms),
            max_empty_polls: acq.max_empty_polls,
            max_retries: acq.max_retries,
            max_drain_polls: acq.max_drain_polls,
            accumulated_scale: acq.accumulated_scale,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.board.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Socket read and write timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_host() -> String {
    "192.168.1.10".into()
}

fn default_port() -> u16 {
    5001
}

fn default_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_empty_polls")]
    pub max_empty_polls: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_max_drain_polls")]
    pub max_drain_polls: u32,

    /// 0.25 for firmware that divides accumulated sums by four less
    #[serde(default = "default_accumulated_scale")]
    pub accumulated_scale: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_empty_polls: default_max_empty_polls(),
            max_retries: default_max_retries(),
            max_drain_polls: default_max_drain_polls(),
            accumulated_scale: default_accumulated_scale(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1
}

fn default_max_empty_polls() -> u32 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_drain_polls() -> u32 {
    1000
}

fn default_accumulated_scale() -> f64 {
    1.0
}

/// Per-channel settings, keyed by 1-based channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// DAC amplitude calibration coefficient in (0, 1]
    #[serde(default = "default_dac_calibration")]
    pub dac: BTreeMap<u8, f64>,

    /// ADC mixer frequency; channels not listed run without mixer
    #[serde(default)]
    pub mixer_mhz: BTreeMap<u8, f64>,

    /// ADC decimation; applies to the whole tile of the channel
    #[serde(default)]
    pub decimation: BTreeMap<u8, u32>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            dac: default_dac_calibration(),
            mixer_mhz: BTreeMap::new(),
            decimation: BTreeMap::new(),
        }
    }
}

fn default_dac_calibration() -> BTreeMap<u8, f64> {
    btreemap! {
        1 => 1.0,
        2 => 1.0,
        3 => 1.0,
        4 => 1.0,
        5 => 1.0,
        6 => 1.0,
        7 => 1.0,
        8 => 1.0,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub required: bool,

    /// Hz
    #[serde(default)]
    pub freq_sync: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
