//! Runtime configuration
//!
//! Defaults match the companion app's timings. With the `config-file` feature
//! values can be overridden from a file and from `MICROBIT_LINK_*` variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ble::SessionConfig;

/// Delay before connecting to a board that was paired moments ago (ms)
pub const JUST_PAIRED_DELAY_MS: u64 = 11_000;

/// Default cap on reads while draining the board's requirement queue
pub const MAX_REQUIREMENT_READS: usize = 32;

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "MICROBIT_LINK";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    /// Bound on every wait for a stack callback
    pub op_timeout_ms: u64,

    /// Retry opening a link with the opposite auto-connect flag
    pub retry_opposite_auto_connect: bool,

    /// Auto-connect flag used when the service opens a link
    pub auto_reconnect: bool,

    pub just_paired_delay_ms: u64,

    pub max_requirement_reads: usize,

    /// Directory holding the paired device record
    pub storage_dir: PathBuf,

    pub log_level: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            op_timeout_ms: crate::ble::BLE_WAIT_TIMEOUT.as_millis() as u64,
            retry_opposite_auto_connect: true,
            auto_reconnect: false,
            just_paired_delay_ms: JUST_PAIRED_DELAY_MS,
            max_requirement_reads: MAX_REQUIREMENT_READS,
            storage_dir: PathBuf::from(".microbit-link"),
            log_level: None,
        }
    }
}

impl LinkConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn just_paired_delay(&self) -> Duration {
        Duration::from_millis(self.just_paired_delay_ms)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            op_timeout: self.op_timeout(),
            retry_opposite_auto_connect: self.retry_opposite_auto_connect,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.op_timeout_ms == 0 {
            return Err(ConfigError::Invalid("op_timeout_ms must be positive".to_string()));
        }
        if self.max_requirement_reads == 0 {
            return Err(ConfigError::Invalid(
                "max_requirement_reads must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load defaults, then the optional file, then the environment
    #[cfg(feature = "config-file")]
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .map_err(|e| ConfigError::Source(e.to_string()))?;

        let cfg: LinkConfig = settings
            .try_deserialize()
            .map_err(|e| ConfigError::Source(e.to_string()))?;
        cfg.validate()?;

        link_debug!("⚙️ Loaded configuration: {:?}", cfg);
        Ok(cfg)
    }

    #[cfg(not(feature = "config-file"))]
    pub fn load(_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let cfg = Self::default();
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration source error: {0}")]
    Source(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
