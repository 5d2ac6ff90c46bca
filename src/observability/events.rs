//! Observable events in tidekv
//!
//! Events are explicit and typed; the string form is what lands in the
//! `event` field of a log line.

use std::fmt;

/// Observable events in tidekv
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Boot & Lifecycle
    /// Startup begins
    BootStart,
    /// Startup complete, ready to serve
    BootComplete,
    /// Shutdown initiated
    ShutdownStart,
    /// Shutdown complete
    ShutdownComplete,

    // Configuration
    /// Configuration loaded and validated
    ConfigLoaded,
    /// An environment override was malformed and ignored
    ConfigOverrideIgnored,

    // Engine
    /// Storage engine opened
    EngineOpen,
    /// Storage engine flushed and closed
    EngineClose,
    /// Storage engine operation failed
    EngineFailure,

    // Namespaces
    /// Namespace catalog loaded
    NamespacesLoaded,
    /// New namespace allocated
    NamespaceCreated,

    // Records
    /// A stored record failed validation (FATAL)
    CorruptRecord,
    /// A read found an expired record and purged it
    LazyExpire,
    /// A batch was rejected
    BatchRejected,

    // Sweeper
    /// Sweeper pass begins
    SweepBegin,
    /// Sweeper pass complete
    SweepComplete,
    /// One sweeper batch failed, the pass continues
    SweepBatchFailed,
    /// Sweeper task stopped
    SweeperStopped,

    // Server
    /// HTTP listener bound, serving requests
    Serving,
    /// Health switched to NOT_SERVING
    NotServing,
    /// Request rejected for missing or bad credentials
    AuthRejected,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BootStart => "BOOT_START",
            Event::BootComplete => "BOOT_COMPLETE",
            Event::ShutdownStart => "SHUTDOWN_START",
            Event::ShutdownComplete => "SHUTDOWN_COMPLETE",

            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::ConfigOverrideIgnored => "CONFIG_OVERRIDE_IGNORED",

            Event::EngineOpen => "ENGINE_OPEN",
            Event::EngineClose => "ENGINE_CLOSE",
            Event::EngineFailure => "ENGINE_FAILURE",

            Event::NamespacesLoaded => "NAMESPACES_LOADED",
            Event::NamespaceCreated => "NAMESPACE_CREATED",

            Event::CorruptRecord => "CORRUPT_RECORD",
            Event::LazyExpire => "LAZY_EXPIRE",
            Event::BatchRejected => "BATCH_REJECTED",

            Event::SweepBegin => "SWEEP_BEGIN",
            Event::SweepComplete => "SWEEP_COMPLETE",
            Event::SweepBatchFailed => "SWEEP_BATCH_FAILED",
            Event::SweeperStopped => "SWEEPER_STOPPED",

            Event::Serving => "TIDEKV_SERVING",
            Event::NotServing => "TIDEKV_NOT_SERVING",
            Event::AuthRejected => "AUTH_REJECTED",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::CorruptRecord)
    }

    /// Returns true if this event reports a failed operation
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Event::EngineFailure | Event::SweepBatchFailed | Event::BatchRejected
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
