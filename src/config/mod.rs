//! Configuration for tidekv
//!
//! JSON file with serde defaults, `TIDEKV_*` environment overrides, and
//! validation that reports every violation at once.

mod errors;
mod settings;

pub use errors::{ConfigError, ConfigResult};
pub use settings::{
    TideConfig, ENV_AUTH_TOKEN, ENV_DATA_DIR, ENV_HOST, ENV_LOG_LEVEL, ENV_PORT,
};
