use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::device::CollectionOptions;
use crate::dispatch::EndpointDescriptor;
use crate::tracking::{
    AccuracyTier, TrackingOptions, DEFAULT_CAPTURE_INTERVAL_SECS, DEFAULT_DISPATCH_INTERVAL_SECS,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub tracking: TrackingConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    pub state: StateConfig,
    pub web: Option<WebConfig>,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(
        default = "default_capture_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub capture_interval: Duration,
    #[serde(
        default = "default_dispatch_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub dispatch_interval: Duration,
    #[serde(default)]
    pub accuracy: AccuracyTier,
    pub endpoints: Vec<EndpointDescriptor>,
    /// Start tracking as soon as the process is up.
    #[serde(default = "default_true")]
    pub autostart: bool,
}

fn default_capture_interval() -> Duration {
    Duration::from_secs(DEFAULT_CAPTURE_INTERVAL_SECS)
}

fn default_dispatch_interval() -> Duration {
    Duration::from_secs(DEFAULT_DISPATCH_INTERVAL_SECS)
}

fn default_true() -> bool {
    true
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub coordinates: String,
    pub altitude_m: Option<f64>,
    #[serde(default = "default_accuracy_m")]
    pub accuracy_m: f64,
}

fn default_accuracy_m() -> f64 {
    25.0
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConfig {
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub operating_system: Option<String>,
    pub connection_type: Option<String>,
    pub carrier_name: Option<String>,
    pub advertising_id: Option<String>,
    #[serde(default)]
    pub limited_ad_tracking: bool,
    #[serde(default)]
    pub collection: CollectionOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    pub directory: PathBuf,
}

impl StateConfig {
    pub fn state_file(&self) -> PathBuf {
        self.directory.join("state.json")
    }

    pub fn buffer_file(&self) -> PathBuf {
        self.directory.join("buffer.jsonl")
    }

    pub fn job_table(&self) -> PathBuf {
        self.directory.join("jobs.json")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub name: String,
    pub permissions: HashSet<Permission>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ControlTracking,
    Configure,
    ReadStatus,
}

impl Permission {
    /// The name used for the permission in `api_keys`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ControlTracking => "control_tracking",
            Permission::Configure => "configure",
            Permission::ReadStatus => "read_status",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tracking.endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "tracking.endpoints must name at least one endpoint".into(),
            ));
        }
        if self.tracking.capture_interval.as_secs() == 0 {
            return Err(ConfigError::Invalid(
                "tracking.capture_interval must be at least one second".into(),
            ));
        }
        if self.tracking.dispatch_interval.as_secs() == 0 {
            return Err(ConfigError::Invalid(
                "tracking.dispatch_interval must be at least one second".into(),
            ));
        }
        if self.web.is_some() && self.api_keys.is_empty() {
            log::warn!("Web API enabled without any API keys; every request will be rejected");
        }
        Ok(())
    }

    pub fn tracking_options(&self) -> TrackingOptions {
        TrackingOptions {
            endpoints: self.tracking.endpoints.clone(),
            capture_interval_secs: Some(self.tracking.capture_interval.as_secs()),
            dispatch_interval_secs: Some(self.tracking.dispatch_interval.as_secs()),
            accuracy: Some(self.tracking.accuracy),
        }
    }

    pub fn find_api_key(&self, key: &str) -> Option<&ApiKey> {
        self.api_keys.iter().find(|k| k.key == key)
    }
}
