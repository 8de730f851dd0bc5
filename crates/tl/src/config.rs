use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tl_core::types::DeviceInfo;

pub const DEFAULT_CONFIG_FILE: &str = "timelapse.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
    #[serde(default)]
    pub device: Device,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default = "default_device_model")]
    pub model: String,
    #[serde(default = "default_device_os")]
    pub os_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_filter: default_log_filter(),
            event_capacity: default_event_capacity(),
            command_capacity: default_command_capacity(),
            device: Device::default(),
        }
    }
}

impl Default for Device {
    fn default() -> Self {
        Self {
            model: default_device_model(),
            os_version: default_device_os(),
        }
    }
}

fn default_db_path() -> String {
    ".timelapse/sessions.db".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_event_capacity() -> usize {
    1024
}

fn default_command_capacity() -> usize {
    tl_core::scheduler::DEFAULT_COMMAND_CAPACITY
}

fn default_device_model() -> String {
    "unknown".to_string()
}

fn default_device_os() -> String {
    std::env::consts::OS.to_string()
}

impl Config {
    /// An explicit path must exist; without one, `timelapse.toml` in the working
    /// directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = lookup("TIMELAPSE_DB_PATH") {
            self.db_path = db_path;
        }
        if let Some(filter) = lookup("TIMELAPSE_LOG") {
            self.log_filter = filter;
        }
        if let Some(value) = lookup("TIMELAPSE_EVENT_CAPACITY") {
            self.event_capacity = value.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "TIMELAPSE_EVENT_CAPACITY",
                value,
            })?;
        }
        Ok(self)
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            model: self.device.model.clone(),
            os_version: self.device.os_version.clone(),
        }
    }
}
