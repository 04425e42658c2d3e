use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::sampler::{AccuracyClass, FixSource, PushSource, ReplaySource, SessionConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("interval must be positive, got {0} ms")]
    InvalidInterval(i64),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Number of live samples kept for the trail view.
    #[serde(default = "default_trail_len")]
    pub trail_len: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            trail_len: default_trail_len(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_trail_len() -> usize {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/locations.db")
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(
        default = "default_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub interval: Duration,
    #[serde(default = "default_true")]
    pub high_accuracy: bool,
    /// Start capturing as soon as the process comes up.
    #[serde(default)]
    pub resume: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            high_accuracy: true,
            resume: false,
        }
    }
}

impl TrackingConfig {
    pub fn session(&self) -> Result<SessionConfig, ConfigError> {
        let millis = i64::try_from(self.interval.as_millis()).unwrap_or(i64::MAX);
        SessionConfig::new(millis, self.high_accuracy)
    }
}

fn default_interval() -> Duration {
    IntervalPreset::TenSeconds.duration()
}

fn default_true() -> bool {
    true
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Fixes are posted to `/api/fixes` by the device.
    #[default]
    Push,
    /// Fixes are replayed from a YAML file.
    Replay {
        path: PathBuf,
        #[serde(default)]
        repeat: bool,
    },
}

impl SourceConfig {
    /// Builds the configured source. The push handle is returned separately
    /// so fixes can be fed into it.
    pub fn open(&self) -> Result<(Arc<dyn FixSource>, Option<PushSource>), ConfigError> {
        match self {
            SourceConfig::Push => {
                let push = PushSource::new();
                Ok((Arc::new(push.clone()), Some(push)))
            }
            SourceConfig::Replay { path, repeat } => {
                let replay = ReplaySource::from_file(path, *repeat)?;
                Ok((Arc::new(replay), None))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_folder")]
    pub folder: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            folder: default_export_folder(),
        }
    }
}

fn default_export_folder() -> PathBuf {
    PathBuf::from("exports")
}

/// Capture intervals offered to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum IntervalPreset {
    #[value(name = "10s")]
    TenSeconds,
    #[value(name = "60s")]
    SixtySeconds,
    #[value(name = "5m")]
    FiveMinutes,
}

impl IntervalPreset {
    pub fn duration(self) -> Duration {
        match self {
            IntervalPreset::TenSeconds => Duration::from_secs(10),
            IntervalPreset::SixtySeconds => Duration::from_secs(60),
            IntervalPreset::FiveMinutes => Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.tracking.session()?;
        Ok(config)
    }

    pub fn tracking_accuracy(&self) -> AccuracyClass {
        AccuracyClass::from_high_accuracy(self.tracking.high_accuracy)
    }
}
