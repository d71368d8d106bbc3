use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use scriv_core::TransitionOptions;

// Default value function for serde (bool::default() is false, so only true needs a fn)
pub(crate) const fn default_true() -> bool {
    true
}

/// Contents of `~/.scriv/config.toml`. Every section is optional.
#[derive(Debug, Default, Deserialize)]
pub struct ScrivConfig {
    pub transition: Option<TransitionConfig>,
    pub scrivener: Option<ScrivenerConfig>,
    pub log: Option<LogConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TransitionConfig {
    /// Inscribe without validation. Meant for debugging only.
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_true")]
    pub auto_recover: bool,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            force: false,
            auto_recover: true,
        }
    }
}

impl From<TransitionConfig> for TransitionOptions {
    fn from(config: TransitionConfig) -> Self {
        TransitionOptions {
            force: config.force,
            auto_recover: config.auto_recover,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScrivenerConfig {
    #[serde(default = "default_true")]
    pub reject_duplicates: bool,
}

impl Default for ScrivenerConfig {
    fn default() -> Self {
        Self {
            reject_duplicates: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

impl ScrivConfig {
    /// Load `~/.scriv/config.toml`. A missing file is `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match Self::parse(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get the config file path (`~/.scriv/config.toml`).
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    #[must_use]
    pub fn transition_options(&self) -> TransitionOptions {
        self.transition.unwrap_or_default().into()
    }

    #[must_use]
    pub fn reject_duplicates(&self) -> bool {
        self.scrivener.unwrap_or_default().reject_duplicates
    }

    #[must_use]
    pub fn log_filter(&self) -> Option<&str> {
        self.log.as_ref().and_then(|log| log.filter.as_deref())
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".scriv").join("config.toml"))
}
