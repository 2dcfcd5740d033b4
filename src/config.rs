use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from owntracks-exporter.toml.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
#[derive(Default)]
pub struct ExporterConfig {
    pub debug: bool,
    pub storage: StorageConfig,
    pub recorder: RecorderConfig,
    pub update: UpdateConfig,
    pub serve: ServeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
#[derive(Default)]
pub struct StorageConfig {
    /// The recorder's storage directory (`OWNTRACKS_STORAGEDIR`).
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RecorderConfig {
    /// Base URL of the recorder's HTTP API (`OWNTRACKS_URL`).
    pub url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct UpdateConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
}

// --- Default implementations ---

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: 10,
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 80,
        }
    }
}

impl ExporterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.update.interval_secs)
    }

    pub fn recorder_timeout(&self) -> Duration {
        Duration::from_secs(self.recorder.timeout_secs)
    }

    /// Reject configurations the exporter cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing {
                field: "storage.dir",
                env: "OWNTRACKS_STORAGEDIR",
            });
        }
        if self.recorder.url.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "recorder.url",
                env: "OWNTRACKS_URL",
            });
        }
        if self.update.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "update.interval_secs",
                reason: "must be at least 1 second".to_string(),
            });
        }
        if self.recorder.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "recorder.timeout_secs",
                reason: "must be at least 1 second".to_string(),
            });
        }
        Ok(())
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The config file is not valid TOML for [`ExporterConfig`].
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// A required setting was not provided.
    Missing {
        field: &'static str,
        env: &'static str,
    },
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse {}: {}", path.display(), source)
            }
            ConfigError::Missing { field, env } => {
                write!(f, "{field} is required (set it in the config file or via {env})")
            }
            ConfigError::Invalid { field, reason } => write!(f, "invalid {field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Missing { .. } | ConfigError::Invalid { .. } => None,
        }
    }
}

/// Load config from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<ExporterConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(ExporterConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}
