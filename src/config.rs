use crate::error::ConfigError;
use crate::sensor::{SensorIdentity, SensorKind};
use serde_derive::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_SECS: f64 = 10.0;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Bridge configuration as read from the JSON config file.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    /// Seconds between polls, fractions allowed
    #[serde(default)]
    pub poll_interval: Option<f64>,
    /// Seconds before a probe or poll request is abandoned
    #[serde(default)]
    pub request_timeout: Option<u64>,
    #[serde(default)]
    pub hide_power_consumption_device: bool,
    #[serde(default)]
    pub hide_power_return_device: bool,
    /// Directory for the accessory cache and history logs
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub ip: String,
}

/// Validated settings the scheduler runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub host: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub desired_sensors: Vec<SensorIdentity>,
}

impl Config {
    /// Loads `path` if it exists, then applies `HOMEWIZARD_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?
        } else {
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Some(ip) = non_empty_env("HOMEWIZARD_IP") {
            self.ip = Some(ip);
        }
        if let Some(secs) = non_empty_env("HOMEWIZARD_POLL_INTERVAL").and_then(|v| v.parse().ok()) {
            self.poll_interval = Some(secs);
        }
        if let Some(secs) =
            non_empty_env("HOMEWIZARD_REQUEST_TIMEOUT").and_then(|v| v.parse().ok())
        {
            self.request_timeout = Some(secs);
        }
        if let Ok(val) = env::var("HOMEWIZARD_HIDE_CONSUMPTION") {
            self.hide_power_consumption_device = parse_bool_safe(Some(val));
        }
        if let Ok(val) = env::var("HOMEWIZARD_HIDE_RETURN") {
            self.hide_power_return_device = parse_bool_safe(Some(val));
        }
        if let Some(dir) = non_empty_env("HOMEWIZARD_STORAGE") {
            self.storage_path = Some(PathBuf::from(dir));
        }
    }

    /// Meter address: `ip`, falling back to the first configured device.
    pub fn host(&self) -> Option<&str> {
        self.ip
            .as_deref()
            .or_else(|| self.devices.first().map(|d| d.ip.as_str()))
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    }

    pub fn storage_path(&self) -> PathBuf {
        self.storage_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn is_enabled(&self, kind: SensorKind) -> bool {
        match kind {
            SensorKind::Import => !self.hide_power_consumption_device,
            SensorKind::Export => !self.hide_power_return_device,
        }
    }

    /// Identities of the enabled sensors, in kind order.
    pub fn desired_sensors(&self) -> Vec<SensorIdentity> {
        SensorKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .map(SensorIdentity::for_kind)
            .collect()
    }

    pub fn scheduler_config(&self) -> Result<SchedulerConfig, ConfigError> {
        let host = self.host().ok_or(ConfigError::MissingHost)?;
        let poll_interval = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if !(poll_interval.is_finite() && poll_interval > 0.0) {
            return Err(ConfigError::InvalidPollInterval);
        }
        // Sub-nanosecond values round to zero, which the timer rejects
        let poll_interval = Duration::try_from_secs_f64(poll_interval)
            .ok()
            .filter(|interval| !interval.is_zero())
            .ok_or(ConfigError::InvalidPollInterval)?;
        let request_timeout = self
            .request_timeout
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        Ok(SchedulerConfig {
            host: host.to_string(),
            poll_interval,
            request_timeout: Duration::from_secs(request_timeout),
            desired_sensors: self.desired_sensors(),
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|val| !val.trim().is_empty())
}

/// Safely parses a boolean from an optional string, defaulting to false
fn parse_bool_safe(val: Option<String>) -> bool {
    val.unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
        .parse()
        .unwrap_or_default()
}
