//! # tidekv HTTP Server Module
//!
//! JSON service adapter over the versioned store. No core type depends
//! on anything in here.
//!
//! # Endpoints
//!
//! - `GET /health` - serving / not_serving
//! - `GET /metrics` - counter snapshot
//! - `GET /v1/namespaces`
//! - `GET|PUT|DELETE /v1/ns/:ns/keys/:key`
//! - `GET /v1/ns/:ns/scan`
//! - `POST /v1/batch`

pub mod auth;
pub mod config;
pub mod errors;
pub mod kv_routes;
pub mod observability_routes;
pub mod server;

pub use config::HttpServerConfig;
pub use errors::{ApiError, ApiResult};
pub use observability_routes::ServiceStatus;
pub use server::{HttpServer, REQUEST_ID_HEADER};
