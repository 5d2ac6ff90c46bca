//! Key-value HTTP Routes
//!
//! JSON over the versioned store. Record keys and values travel as standard
//! base64, scan cursors as URL-safe base64. In requests, keys and namespaces
//! are path segments.
//! Store calls run on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::kv::{
    BatchOp, BatchOutcome, KvResult, Record, ScanBound, ScanOptions, ScanPage, VersionedStore,
};

use super::errors::{ApiError, ApiResult};

// ==================
// Request/Response Types
// ==================

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordResponse {
    pub namespace: String,
    /// base64; keys are arbitrary bytes
    pub key: String,
    /// base64
    pub value: String,
    pub version: u64,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl From<Record> for RecordResponse {
    fn from(record: Record) -> Self {
        Self {
            namespace: record.namespace,
            key: STANDARD.encode(&record.key),
            value: STANDARD.encode(&record.value),
            version: record.version,
            created_at: record.created_at.as_millis(),
            updated_at: record.updated_at.as_millis(),
            expires_at: record.expires_at.map(|ts| ts.as_millis()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PutRequest {
    /// base64
    pub value: String,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    /// Present: compare-and-swap against this version (0 = absent)
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanQuery {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    /// Default true
    #[serde(default)]
    pub start_inclusive: Option<bool>,
    #[serde(default)]
    pub end: Option<String>,
    /// Default false
    #[serde(default)]
    pub end_inclusive: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResponse {
    pub records: Vec<RecordResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl From<ScanPage> for ScanResponse {
    fn from(page: ScanPage) -> Self {
        Self {
            records: page.records.into_iter().map(RecordResponse::from).collect(),
            next_cursor: page.next_cursor.map(|cursor| URL_SAFE_NO_PAD.encode(cursor)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchOpRequest {
    Put {
        namespace: String,
        key: String,
        value: String,
        #[serde(default)]
        ttl_ms: Option<u64>,
        #[serde(default)]
        expected_version: Option<u64>,
    },
    Delete {
        namespace: String,
        key: String,
        #[serde(default)]
        expected_version: Option<u64>,
    },
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub ops: Vec<BatchOpRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchOutcomeResponse {
    pub op: String,
    pub version: u64,
}

impl From<BatchOutcome> for BatchOutcomeResponse {
    fn from(outcome: BatchOutcome) -> Self {
        let op = match outcome {
            BatchOutcome::Put { .. } => "put",
            BatchOutcome::Deleted { .. } => "delete",
        };
        Self {
            op: op.to_string(),
            version: outcome.version(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub outcomes: Vec<BatchOutcomeResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NamespacesResponse {
    pub namespaces: Vec<String>,
}

// ==================
// KV Routes
// ==================

/// Create key-value routes
pub fn kv_routes(store: Arc<VersionedStore>) -> Router {
    Router::new()
        .route("/namespaces", get(list_namespaces_handler))
        .route(
            "/ns/:ns/keys/:key",
            get(get_handler).put(put_handler).delete(delete_handler),
        )
        .route("/ns/:ns/scan", get(scan_handler))
        .route("/batch", post(batch_handler))
        .with_state(store)
}

// ==================
// Helper Functions
// ==================

/// Run a store call on the blocking pool.
async fn blocking<T, F>(store: &Arc<VersionedStore>, call: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&VersionedStore) -> KvResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || call(&store))
        .await
        .map_err(|e| ApiError::internal(format!("store task failed: {}", e)))?
        .map_err(ApiError::from)
}

fn decode_value(field: &str, encoded: &str, violations: &mut Vec<String>) -> Vec<u8> {
    STANDARD.decode(encoded).unwrap_or_else(|e| {
        violations.push(format!("{}: invalid base64: {}", field, e));
        Vec::new()
    })
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::invalid(vec![format!("body: {}", rejection.body_text())]))
}

fn ttl(ttl_ms: Option<u64>) -> Option<Duration> {
    ttl_ms.map(Duration::from_millis)
}

// ==================
// Handlers
// ==================

async fn list_namespaces_handler(
    State(store): State<Arc<VersionedStore>>,
) -> Json<NamespacesResponse> {
    Json(NamespacesResponse {
        namespaces: store.namespaces(),
    })
}

async fn get_handler(
    State(store): State<Arc<VersionedStore>>,
    Path((ns, key)): Path<(String, String)>,
) -> ApiResult<Json<RecordResponse>> {
    let record = blocking(&store, move |s| s.get(&ns, key.as_bytes())).await?;
    Ok(Json(record.into()))
}

async fn put_handler(
    State(store): State<Arc<VersionedStore>>,
    Path((ns, key)): Path<(String, String)>,
    payload: Result<Json<PutRequest>, JsonRejection>,
) -> ApiResult<Json<VersionResponse>> {
    let request = json_body(payload)?;
    let mut violations = Vec::new();
    let value = decode_value("value", &request.value, &mut violations);
    if !violations.is_empty() {
        return Err(ApiError::invalid(violations));
    }

    let ttl = ttl(request.ttl_ms);
    let version = blocking(&store, move |s| match request.expected_version {
        Some(expected) => s.compare_and_swap(&ns, key.as_bytes(), expected, value, ttl),
        None => s.put(&ns, key.as_bytes(), value, ttl),
    })
    .await?;
    Ok(Json(VersionResponse { version }))
}

async fn delete_handler(
    State(store): State<Arc<VersionedStore>>,
    Path((ns, key)): Path<(String, String)>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Json<VersionResponse>> {
    let version =
        blocking(&store, move |s| s.delete(&ns, key.as_bytes(), query.expected_version)).await?;
    Ok(Json(VersionResponse { version }))
}

async fn scan_handler(
    State(store): State<Arc<VersionedStore>>,
    Path(ns): Path<String>,
    Query(query): Query<ScanQuery>,
) -> ApiResult<Json<ScanResponse>> {
    let mut options = ScanOptions::default();
    if let Some(limit) = query.limit {
        options.limit = limit;
    }
    if let Some(prefix) = query.prefix {
        options = options.prefix(prefix);
    }
    if let Some(start) = query.start {
        options = options.start(if query.start_inclusive.unwrap_or(true) {
            ScanBound::inclusive(start)
        } else {
            ScanBound::exclusive(start)
        });
    }
    if let Some(end) = query.end {
        options = options.end(if query.end_inclusive.unwrap_or(false) {
            ScanBound::inclusive(end)
        } else {
            ScanBound::exclusive(end)
        });
    }
    if let Some(cursor) = query.cursor {
        let cursor = URL_SAFE_NO_PAD
            .decode(cursor.as_bytes())
            .map_err(|e| ApiError::invalid(vec![format!("cursor: invalid: {}", e)]))?;
        options = options.cursor(Some(cursor));
    }

    let page = blocking(&store, move |s| s.scan(&ns, options)).await?;
    Ok(Json(page.into()))
}

async fn batch_handler(
    State(store): State<Arc<VersionedStore>>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<Json<BatchResponse>> {
    let request = json_body(payload)?;
    let mut violations = Vec::new();
    let ops: Vec<BatchOp> = request
        .ops
        .into_iter()
        .enumerate()
        .map(|(index, op)| match op {
            BatchOpRequest::Put {
                namespace,
                key,
                value,
                ttl_ms,
                expected_version,
            } => {
                let value =
                    decode_value(&format!("ops[{}].value", index), &value, &mut violations);
                let mut op = BatchOp::put(namespace, key, value);
                if let Some(ttl) = ttl(ttl_ms) {
                    op = op.with_ttl(ttl);
                }
                if let Some(expected) = expected_version {
                    op = op.expect_version(expected);
                }
                op
            }
            BatchOpRequest::Delete {
                namespace,
                key,
                expected_version,
            } => {
                let op = BatchOp::delete(namespace, key);
                match expected_version {
                    Some(expected) => op.expect_version(expected),
                    None => op,
                }
            }
        })
        .collect();
    if !violations.is_empty() {
        return Err(ApiError::invalid(violations));
    }

    let outcomes = blocking(&store, move |s| s.batch_write(ops)).await?;
    Ok(Json(BatchResponse {
        outcomes: outcomes.into_iter().map(BatchOutcomeResponse::from).collect(),
    }))
}
