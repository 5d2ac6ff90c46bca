//! Observability subsystem for tidekv
//!
//! - Structured logging (JSON, one line per event)
//! - Lock-free operational counters
//! - Lifecycle event tracing
//!
//! Observability is read-only: nothing here changes the outcome of a
//! store operation, and a failed log write is dropped silently.
//!
//! ```ignore
//! use tidekv::observability::{Logger, Event, MetricsRegistry, ObservationScope};
//!
//! Logger::info("SWEEP_COMPLETE", &[("purged", "42")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_puts();
//!
//! let scope = ObservationScope::new("SHUTDOWN");
//! // ... do work ...
//! scope.complete();
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::{ObservationScope, Timer};

fn event_severity(event: Event) -> Severity {
    if event.is_fatal() {
        Severity::Fatal
    } else if event.is_failure() {
        Severity::Error
    } else {
        Severity::Info
    }
}

/// Log a lifecycle event
pub fn log_event(event: Event) {
    Logger::log(event_severity(event), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event_severity(event), event.as_str(), fields);
}
