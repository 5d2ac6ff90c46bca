//! HTTP error responses
//!
//! Every failure is rendered as `{code, message, details?}`:
//!
//! | Error                 | Status |
//! |-----------------------|--------|
//! | InvalidRequest        | 400    |
//! | missing/bad token     | 401    |
//! | NotFound              | 404    |
//! | VersionMismatch       | 409    |
//! | BatchRejected         | 409    |
//! | CorruptRecord         | 500    |
//! | EngineFailure         | 503    |

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::kv::{FailureReason, KvError};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
                details: None,
            },
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.body.details = Some(details);
        self
    }

    /// 400 listing every violation.
    pub fn invalid(violations: Vec<String>) -> Self {
        KvError::InvalidRequest(violations).into()
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "TIDE_UNAUTHORIZED",
            "missing or invalid bearer token",
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "TIDE_INTERNAL", message)
    }
}

fn version_details(expected: u64, actual: Option<u64>) -> Value {
    json!({ "expected": expected, "actual": actual })
}

fn failure_details(reason: &FailureReason) -> Value {
    match reason {
        FailureReason::VersionMismatch { expected, actual } => json!({
            "code": "TIDE_VERSION_MISMATCH",
            "expected": expected,
            "actual": actual,
        }),
        FailureReason::NotFound => json!({ "code": "TIDE_NOT_FOUND" }),
    }
}

impl From<KvError> for ApiError {
    fn from(err: KvError) -> Self {
        let message = err.to_string();
        let code = err.code();
        match err {
            KvError::NotFound => Self::new(StatusCode::NOT_FOUND, code, message),
            KvError::VersionMismatch { expected, actual } => {
                Self::new(StatusCode::CONFLICT, code, message)
                    .with_details(version_details(expected, actual))
            }
            KvError::BatchRejected { failures } => {
                let failures: Vec<Value> = failures
                    .iter()
                    .map(|failure| {
                        let mut entry = failure_details(&failure.reason);
                        entry["index"] = json!(failure.index);
                        entry["message"] = json!(failure.reason.to_string());
                        entry
                    })
                    .collect();
                Self::new(StatusCode::CONFLICT, code, message)
                    .with_details(json!({ "failures": failures }))
            }
            KvError::InvalidRequest(violations) => {
                Self::new(StatusCode::BAD_REQUEST, code, message)
                    .with_details(json!({ "violations": violations }))
            }
            KvError::CorruptRecord(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
            }
            KvError::EngineFailure(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, code, message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
