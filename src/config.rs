//! Application configuration
//!
//! One YAML file, by default `~/.intent_core/config.yaml`. Every field has a
//! default, so a missing file or a partial one is fine:
//!
//! ```yaml
//! sandbox:
//!   max_execution_time_ms: 10000
//!   allow_network: true
//! logging:
//!   min_level: info
//!   json: false
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::persistence::default_store_dir;
use crate::sandbox::{SandboxError, SandboxPolicy};
use crate::structured_log::{LogConfig, LogLevel};

pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    Policy(#[from] SandboxError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sandbox: SandboxPolicy,
    pub learning: LearningConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Directory holding the learned-state file.
    pub store_dir: PathBuf,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    pub min_level: LogLevel,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: true,
            min_level: LogLevel::Warn,
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            json_output: self.json,
            file_path: self.file.clone(),
            min_level: self.min_level,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        default_store_dir().join(CONFIG_FILE)
    }

    /// Load from `path`, or from the default location when `None`. A missing
    /// file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path, source },
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: AppConfig = serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.sandbox.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
