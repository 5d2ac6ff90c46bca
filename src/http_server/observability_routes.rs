//! Observability HTTP Routes
//!
//! `/health` reports whether the node is serving; it turns 503 as soon as
//! shutdown begins so load balancers drain before the listener closes.
//! `/metrics` returns the counter snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::observability::{log_event, Event, MetricsRegistry};

/// Serving flag and counters shared with the lifecycle.
pub struct ServiceStatus {
    serving: AtomicBool,
    metrics: Arc<MetricsRegistry>,
}

impl ServiceStatus {
    /// Starts out not serving.
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            serving: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::Acquire)
    }

    pub fn set_serving(&self, serving: bool) {
        let previous = self.serving.swap(serving, Ordering::AcqRel);
        if previous != serving {
            log_event(if serving { Event::Serving } else { Event::NotServing });
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Create observability routes
pub fn observability_routes(status: Arc<ServiceStatus>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(status)
}

/// Health check handler
async fn health_handler(State(status): State<Arc<ServiceStatus>>) -> impl IntoResponse {
    let (code, label) = if status.is_serving() {
        (StatusCode::OK, "serving")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_serving")
    };
    let response = HealthResponse {
        status: label.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (code, Json(response))
}

/// Metrics handler - returns the counter snapshot as JSON
async fn metrics_handler(State(status): State<Arc<ServiceStatus>>) -> impl IntoResponse {
    (StatusCode::OK, Json(status.metrics.snapshot()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "serving".to_string(),
            version: "0.1.0".to_string(),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("serving"));
    }

    #[test]
    fn test_serving_flag() {
        let status = ServiceStatus::new(Arc::new(MetricsRegistry::new()));
        assert!(!status.is_serving());
        status.set_serving(true);
        assert!(status.is_serving());
        status.set_serving(false);
        assert!(!status.is_serving());
    }
}
