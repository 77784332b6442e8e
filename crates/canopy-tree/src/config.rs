//! TOML configuration for a tree.
//!
//! ```toml
//! [tree]
//! deterministic_inheritance_order = false
//! action_channel_capacity = 4096
//! error_channel_capacity = 256
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Per-tree settings, passed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Visit children sequentially in attach order (groups, then clusters,
    /// then nodes) instead of fanning out in parallel.
    pub deterministic_inheritance_order: bool,
    /// Bound of the action channel; senders block when it is full.
    pub action_channel_capacity: usize,
    /// Bound of the error channel.
    pub error_channel_capacity: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            deterministic_inheritance_order: false,
            action_channel_capacity: 4096,
            error_channel_capacity: 256,
        }
    }
}

/// File layout: everything lives under `[tree]`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    tree: TreeConfig,
}

impl TreeConfig {
    /// Load from a TOML file, or return defaults if no path given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(s)?;
        file.tree.validate()?;
        Ok(file.tree)
    }

    /// Defaults with deterministic inheritance order switched on.
    pub fn deterministic() -> Self {
        Self {
            deterministic_inheritance_order: true,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.action_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "action_channel_capacity must be > 0".to_string(),
            ));
        }
        if self.error_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "error_channel_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
