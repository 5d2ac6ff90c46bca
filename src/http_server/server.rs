//! # HTTP Server
//!
//! Main HTTP server combining the key-value and observability routers.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use uuid::Uuid;

use crate::kv::VersionedStore;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

use super::auth::{require_bearer, BearerAuth};
use super::config::HttpServerConfig;
use super::kv_routes::kv_routes;
use super::observability_routes::{observability_routes, ServiceStatus};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// HTTP Server for tidekv
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
    status: Arc<ServiceStatus>,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, store: Arc<VersionedStore>) -> Self {
        let status = Arc::new(ServiceStatus::new(Arc::clone(store.metrics())));
        let router = Self::build_router(&config, store, Arc::clone(&status));
        Self {
            config,
            router,
            status,
        }
    }

    /// Build the combined router with all endpoints
    fn build_router(
        config: &HttpServerConfig,
        store: Arc<VersionedStore>,
        status: Arc<ServiceStatus>,
    ) -> Router {
        let auth = Arc::new(BearerAuth::new(config.auth_token.as_deref()));
        let metrics = Arc::clone(store.metrics());

        let v1 = kv_routes(store).layer(middleware::from_fn_with_state(auth, require_bearer));

        Router::new()
            // Health and metrics stay open
            .merge(observability_routes(status))
            .nest("/v1", v1)
            .layer(
                ServiceBuilder::new()
                    // Outermost, so timeouts and auth failures carry an id too
                    .layer(middleware::from_fn_with_state(metrics, assign_request_id))
                    .layer(TimeoutLayer::new(config.request_timeout())),
            )
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Health flag; the lifecycle flips it on boot and at shutdown.
    pub fn status(&self) -> Arc<ServiceStatus> {
        Arc::clone(&self.status)
    }

    /// Get the router (for testing)
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind, mark serving, and serve until `shutdown` resolves.
    ///
    /// In-flight requests complete before this returns.
    pub async fn serve<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.socket_addr()).await?;
        let addr = listener.local_addr()?;
        log_event_with_fields(
            Event::BootComplete,
            &[
                ("addr", &addr.to_string()),
                ("auth", if self.config.auth_token.is_some() { "bearer" } else { "none" }),
            ],
        );
        self.status.set_serving(true);

        let status = Arc::clone(&self.status);
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                status.set_serving(false);
            })
            .await
    }
}

/// Attach an `x-request-id` to every request and echo it on the response.
///
/// A well-formed UUID supplied by the client is kept.
async fn assign_request_id(
    State(metrics): State<Arc<MetricsRegistry>>,
    mut request: Request,
    next: Next,
) -> Response {
    metrics.increment_http_requests();
    let header = HeaderName::from_static(REQUEST_ID_HEADER);

    let id = request
        .headers()
        .get(&header)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .unwrap_or_else(Uuid::new_v4);
    let value = HeaderValue::from_str(&id.to_string()).unwrap_or_else(|_| HeaderValue::from_static("invalid"));

    request.headers_mut().insert(header.clone(), value.clone());
    let mut response = next.run(request).await;
    response.headers_mut().insert(header, value);
    response
}
