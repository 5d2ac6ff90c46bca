//! Bearer token check for the `/v1` routes
//!
//! The configured token is kept only as its SHA-256 digest; a presented
//! token is hashed and compared in constant time, so neither the length
//! nor a matching prefix leaks through timing.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::observability::{log_event_with_fields, Event};

use super::errors::ApiError;

/// Token digest, or open access when no token is configured.
#[derive(Clone)]
pub struct BearerAuth {
    digest: Option<[u8; 32]>,
}

fn digest(token: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(token.as_bytes()));
    out
}

impl BearerAuth {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            digest: token.map(digest),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.digest.is_some()
    }

    /// Whether `headers` satisfy this policy.
    pub fn permits(&self, headers: &HeaderMap) -> bool {
        let expected = match &self.digest {
            Some(expected) => expected,
            None => return true,
        };
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        match presented {
            Some(token) => digest(token.trim())[..].ct_eq(&expected[..]).into(),
            None => false,
        }
    }
}

/// Middleware rejecting requests that fail [`BearerAuth::permits`].
pub async fn require_bearer(
    State(auth): State<Arc<BearerAuth>>,
    request: Request,
    next: Next,
) -> Response {
    if auth.permits(request.headers()) {
        return next.run(request).await;
    }
    log_event_with_fields(
        Event::AuthRejected,
        &[
            ("method", request.method().as_str()),
            ("path", request.uri().path()),
        ],
    );
    ApiError::unauthorized().into_response()
}
