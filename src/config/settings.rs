//! tidekv configuration file
//!
//! Every field is optional; a missing file section falls back to the
//! defaults below. Environment variables override the file:
//!
//! | Variable            | Field        |
//! |---------------------|--------------|
//! | `TIDEKV_DATA_DIR`   | `data_dir`   |
//! | `TIDEKV_HOST`       | `host`       |
//! | `TIDEKV_PORT`       | `port`       |
//! | `TIDEKV_AUTH_TOKEN` | `auth_token` |
//! | `TIDEKV_LOG_LEVEL`  | `log_level`  |

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::kv::is_valid_namespace;
use crate::observability::{log_event_with_fields, Event, Severity};
use crate::storage::Durability;

use super::errors::{ConfigError, ConfigResult};

pub const ENV_DATA_DIR: &str = "TIDEKV_DATA_DIR";
pub const ENV_HOST: &str = "TIDEKV_HOST";
pub const ENV_PORT: &str = "TIDEKV_PORT";
pub const ENV_AUTH_TOKEN: &str = "TIDEKV_AUTH_TOKEN";
pub const ENV_LOG_LEVEL: &str = "TIDEKV_LOG_LEVEL";

const PROBE_FILE: &str = ".tidekv-write-probe";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TideConfig {
    /// Engine directory (default: "./data")
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Listen host (default: "127.0.0.1")
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port (default: 50051)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Journal persistence after each commit (default: sync_all)
    #[serde(default)]
    pub durability: Durability,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Bearer token required on `/v1` routes; open when absent
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Namespaces created at startup if missing
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Minimum log severity (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    50051
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

fn default_sweep_batch_size() -> usize {
    256
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TideConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            host: default_host(),
            port: default_port(),
            durability: Durability::default(),
            sweep_interval_ms: default_sweep_interval_ms(),
            sweep_batch_size: default_sweep_batch_size(),
            request_timeout_ms: default_request_timeout_ms(),
            auth_token: None,
            namespaces: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl TideConfig {
    /// Read `path`, apply process environment overrides and validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&content)?;
        config.apply_env(&std::env::vars().collect());
        config.validate()?;

        log_event_with_fields(
            Event::ConfigLoaded,
            &[
                ("data_dir", &config.data_dir.display().to_string()),
                ("path", &path.display().to_string()),
                ("port", &config.port.to_string()),
            ],
        );
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_env(&std::env::vars().collect());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Apply `TIDEKV_*` overrides from `vars`.
    ///
    /// A malformed numeric override is logged and ignored.
    pub fn apply_env(&mut self, vars: &HashMap<String, String>) {
        if let Some(dir) = vars.get(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(host) = vars.get(ENV_HOST) {
            self.host = host.clone();
        }
        if let Some(port) = vars.get(ENV_PORT) {
            match port.trim().parse::<u16>() {
                Ok(port) => self.port = port,
                Err(e) => log_event_with_fields(
                    Event::ConfigOverrideIgnored,
                    &[("reason", &e.to_string()), ("value", port), ("variable", ENV_PORT)],
                ),
            }
        }
        if let Some(token) = vars.get(ENV_AUTH_TOKEN) {
            self.auth_token = (!token.is_empty()).then(|| token.clone());
        }
        if let Some(level) = vars.get(ENV_LOG_LEVEL) {
            self.log_level = level.clone();
        }
    }

    /// Check every rule, reporting all violations together.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut violations = Vec::new();

        if self.port == 0 {
            violations.push("port: must be in 1..=65535".to_string());
        }
        if self.data_dir.as_os_str().is_empty() {
            violations.push("data_dir: must not be empty".to_string());
        }
        if self.host.trim().is_empty() {
            violations.push("host: must not be empty".to_string());
        }
        if self.sweep_interval_ms == 0 {
            violations.push("sweep_interval_ms: must be > 0".to_string());
        }
        if self.sweep_batch_size == 0 {
            violations.push("sweep_batch_size: must be > 0".to_string());
        }
        if self.request_timeout_ms == 0 {
            violations.push("request_timeout_ms: must be > 0".to_string());
        }
        if Severity::parse(&self.log_level).is_none() {
            violations.push(format!("log_level: unknown level {:?}", self.log_level));
        }
        if matches!(&self.auth_token, Some(token) if token.trim().is_empty()) {
            violations.push("auth_token: must not be blank".to_string());
        }
        for name in &self.namespaces {
            if !is_valid_namespace(name) {
                violations.push(format!("namespaces: invalid name {:?}", name));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(violations))
        }
    }

    /// Create the data directory if missing and check it is writable.
    pub fn prepare_data_dir(&self) -> ConfigResult<()> {
        let unusable = |reason: String| ConfigError::DataDir {
            path: self.data_dir.clone(),
            reason,
        };
        fs::create_dir_all(&self.data_dir).map_err(|e| unusable(e.to_string()))?;
        if !self.data_dir.is_dir() {
            return Err(unusable("not a directory".to_string()));
        }
        let probe = self.data_dir.join(PROBE_FILE);
        fs::write(&probe, b"").map_err(|e| unusable(format!("not writable: {}", e)))?;
        fs::remove_file(&probe).map_err(|e| unusable(format!("not writable: {}", e)))?;
        Ok(())
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parsed `log_level`, INFO if it does not parse.
    pub fn log_severity(&self) -> Severity {
        Severity::parse(&self.log_level).unwrap_or(Severity::Info)
    }
}
