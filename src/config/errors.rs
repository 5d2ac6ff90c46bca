//! Configuration errors
//!
//! Error codes:
//! - TIDE_CONFIG_READ_FAILED (FATAL)
//! - TIDE_CONFIG_PARSE_FAILED (FATAL)
//! - TIDE_CONFIG_INVALID (FATAL)
//! - TIDE_DATA_DIR_UNUSABLE (FATAL)

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("data directory {path} is unusable: {reason}")]
    DataDir { path: PathBuf, reason: String },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "TIDE_CONFIG_READ_FAILED",
            ConfigError::Parse(_) => "TIDE_CONFIG_PARSE_FAILED",
            ConfigError::Invalid(_) => "TIDE_CONFIG_INVALID",
            ConfigError::DataDir { .. } => "TIDE_DATA_DIR_UNUSABLE",
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
