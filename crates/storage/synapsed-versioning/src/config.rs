//! Configuration for versioned collections

use crate::{
    error::{Result, VersioningError},
    history::DEFAULT_MAX_DEPTH,
};
use serde::{Deserialize, Serialize};

/// Wire protocol version produced by this crate
pub const PROTOCOL_VERSION: u32 = 1;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersioningConfig {
    /// Undo/redo history settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Create documents on first sight of a remote change for an unknown id
    #[serde(default = "default_true")]
    pub create_on_remote: bool,

    /// Protocol version stamped on outbound messages and required inbound
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            create_on_remote: true,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

impl VersioningConfig {
    /// Parse from TOML
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: VersioningConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.history.max_depth == 0 {
            return Err(VersioningError::ConfigError(
                "history.max_depth must be at least 1".to_string(),
            ));
        }
        if self.protocol_version == 0 || self.protocol_version > PROTOCOL_VERSION {
            return Err(VersioningError::ConfigError(format!(
                "unsupported protocol version {}",
                self.protocol_version
            )));
        }
        Ok(())
    }
}

/// Configuration for per-document history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum entries kept on each of the undo and redo stacks
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_protocol_version() -> u32 {
    PROTOCOL_VERSION
}
