//! CLI-specific error types
//!
//! Every CLI error ends the process: `main` prints it and exits non-zero.
//! Errors raised by a subsystem keep that subsystem's code as the cause,
//! so `TIDE_CLI_STORE_ERROR` can still be told apart from, say, a corrupt
//! record versus an engine failure.

use std::fmt;
use std::io;

use crate::config::ConfigError;
use crate::database::DatabaseError;
use crate::kv::KvError;
use crate::sweeper::SweepError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Config file missing, unreadable or invalid
    Config,
    /// Writing to stdout failed
    Io,
    AlreadyInitialized,
    NotInitialized,
    /// The store or its engine failed
    Store,
    /// Runtime or listener could not start, or the server died
    Serve,
    /// A sweeper pass failed
    Sweep,
}

impl CliErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config => "TIDE_CLI_CONFIG_ERROR",
            Self::Io => "TIDE_CLI_IO_ERROR",
            Self::AlreadyInitialized => "TIDE_CLI_ALREADY_INITIALIZED",
            Self::NotInitialized => "TIDE_CLI_NOT_INITIALIZED",
            Self::Store => "TIDE_CLI_STORE_ERROR",
            Self::Serve => "TIDE_CLI_SERVE_FAILED",
            Self::Sweep => "TIDE_CLI_SWEEP_FAILED",
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
    /// Code of the subsystem error this was raised from
    cause: Option<&'static str>,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    fn caused_by(code: CliErrorCode, cause: &'static str, message: impl fmt::Display) -> Self {
        Self {
            code,
            message: message.to_string(),
            cause: Some(cause),
        }
    }

    pub fn already_initialized() -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            "Data directory already initialized",
        )
    }

    pub fn not_initialized() -> Self {
        Self::new(
            CliErrorCode::NotInitialized,
            "Data directory not initialized. Run 'tidekv init' first.",
        )
    }

    pub fn serve_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::Serve, msg)
    }

    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn cause(&self) -> Option<&'static str> {
        self.cause
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            Some(cause) => write!(f, "{} ({}): {}", self.code.code(), cause, self.message),
            None => write!(f, "{}: {}", self.code.code(), self.message),
        }
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::new(CliErrorCode::Io, e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(CliErrorCode::Io, format!("JSON output: {}", e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::caused_by(CliErrorCode::Config, e.code(), e)
    }
}

impl From<KvError> for CliError {
    fn from(e: KvError) -> Self {
        Self::caused_by(CliErrorCode::Store, e.code(), e)
    }
}

impl From<DatabaseError> for CliError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Config(e) => e.into(),
            DatabaseError::Store(e) => e.into(),
        }
    }
}

impl From<SweepError> for CliError {
    fn from(e: SweepError) -> Self {
        Self::caused_by(CliErrorCode::Sweep, e.code(), e)
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_without_cause() {
        let err = CliError::not_initialized();
        assert_eq!(err.code_str(), "TIDE_CLI_NOT_INITIALIZED");
        assert!(err.cause().is_none());
        assert!(err.to_string().starts_with("TIDE_CLI_NOT_INITIALIZED: "));
    }

    #[test]
    fn test_config_error_keeps_cause() {
        let err = CliError::from(ConfigError::Invalid(vec!["port: must be in 1..=65535".into()]));
        assert_eq!(err.code(), CliErrorCode::Config);
        assert_eq!(err.cause(), Some("TIDE_CONFIG_INVALID"));
        assert!(err
            .to_string()
            .starts_with("TIDE_CLI_CONFIG_ERROR (TIDE_CONFIG_INVALID): "));
    }

    #[test]
    fn test_store_errors_through_database_error() {
        let err = CliError::from(DatabaseError::Store(KvError::NotFound));
        assert_eq!(err.code(), CliErrorCode::Store);
        assert_eq!(err.cause(), Some("TIDE_NOT_FOUND"));
    }
}
