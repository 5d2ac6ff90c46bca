//! Request validation for the versioned record store
//!
//! Every rule is checked and every violation is reported, so a caller
//! fixing a bad request sees the whole list at once:
//!
//! - namespace: `^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$`
//! - key: non-empty, at most [`MAX_KEY_SIZE`] bytes
//! - value: at most [`MAX_VALUE_SIZE`] bytes
//! - ttl: positive, at most [`MAX_TTL`]
//! - batch: at most [`MAX_BATCH_OPS`] operations
//!
//! Validation never touches storage.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use super::errors::{KvError, KvResult};
use super::record::{BatchOp, BatchOpKind};

pub const MAX_KEY_SIZE: usize = 8 * 1024;
pub const MAX_VALUE_SIZE: usize = 16 * 1024 * 1024;
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);
pub const MAX_SCAN_LIMIT: usize = 1000;
pub const MAX_BATCH_OPS: usize = 1000;

const NAMESPACE_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$";

fn namespace_regex() -> &'static Regex {
    static NAMESPACE_RE: OnceLock<Regex> = OnceLock::new();
    NAMESPACE_RE.get_or_init(|| {
        Regex::new(NAMESPACE_PATTERN).unwrap_or_else(|e| panic!("namespace pattern: {}", e))
    })
}

/// Whether `name` is a legal namespace name.
pub fn is_valid_namespace(name: &str) -> bool {
    namespace_regex().is_match(name)
}

/// Clamp a requested scan limit into `1..=MAX_SCAN_LIMIT`.
pub fn clamp_scan_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_SCAN_LIMIT)
}

/// Accumulates rule violations for one request.
#[derive(Debug, Default)]
pub struct RequestValidator {
    violations: Vec<String>,
}

impl RequestValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(&mut self, name: &str) -> &mut Self {
        self.namespace_at("namespace", name)
    }

    pub fn key(&mut self, key: &[u8]) -> &mut Self {
        self.key_at("key", key)
    }

    pub fn value(&mut self, value: &[u8]) -> &mut Self {
        self.value_at("value", value)
    }

    pub fn ttl(&mut self, ttl: Option<Duration>) -> &mut Self {
        self.ttl_at("ttl", ttl)
    }

    /// Validate a whole batch, labelling violations by op index.
    pub fn batch(&mut self, ops: &[BatchOp]) -> &mut Self {
        if ops.len() > MAX_BATCH_OPS {
            self.violations.push(format!(
                "ops: {} operations exceeds the limit of {}",
                ops.len(),
                MAX_BATCH_OPS
            ));
            return self;
        }
        for (index, op) in ops.iter().enumerate() {
            self.namespace_at(&format!("ops[{}].namespace", index), &op.namespace);
            self.key_at(&format!("ops[{}].key", index), &op.key);
            if let BatchOpKind::Put { value, ttl } = &op.kind {
                self.value_at(&format!("ops[{}].value", index), value);
                self.ttl_at(&format!("ops[{}].ttl", index), *ttl);
            }
        }
        self
    }

    /// `Ok` when nothing was violated, otherwise every violation at once.
    pub fn finish(&mut self) -> KvResult<()> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(KvError::InvalidRequest(std::mem::take(&mut self.violations)))
        }
    }

    fn namespace_at(&mut self, field: &str, name: &str) -> &mut Self {
        if !is_valid_namespace(name) {
            self.violations.push(format!(
                "{}: {:?} must match {}",
                field, name, NAMESPACE_PATTERN
            ));
        }
        self
    }

    fn key_at(&mut self, field: &str, key: &[u8]) -> &mut Self {
        if key.is_empty() {
            self.violations.push(format!("{}: must not be empty", field));
        } else if key.len() > MAX_KEY_SIZE {
            self.violations.push(format!(
                "{}: {} bytes exceeds the limit of {}",
                field,
                key.len(),
                MAX_KEY_SIZE
            ));
        }
        self
    }

    fn value_at(&mut self, field: &str, value: &[u8]) -> &mut Self {
        if value.len() > MAX_VALUE_SIZE {
            self.violations.push(format!(
                "{}: {} bytes exceeds the limit of {}",
                field,
                value.len(),
                MAX_VALUE_SIZE
            ));
        }
        self
    }

    fn ttl_at(&mut self, field: &str, ttl: Option<Duration>) -> &mut Self {
        match ttl {
            Some(ttl) if ttl.is_zero() => {
                self.violations.push(format!("{}: must be positive", field));
            }
            Some(ttl) if ttl > MAX_TTL => {
                self.violations.push(format!(
                    "{}: {}s exceeds the limit of {}s",
                    field,
                    ttl.as_secs(),
                    MAX_TTL.as_secs()
                ));
            }
            _ => {}
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_rules() {
        assert!(is_valid_namespace("users"));
        assert!(is_valid_namespace("a"));
        assert!(is_valid_namespace("orders.v2_archive-1"));
        assert!(is_valid_namespace(&"n".repeat(64)));

        assert!(!is_valid_namespace(""));
        assert!(!is_valid_namespace("_hidden"));
        assert!(!is_valid_namespace("has space"));
        assert!(!is_valid_namespace("sep\u{1f}arator"));
        assert!(!is_valid_namespace(&"n".repeat(65)));
    }

    #[test]
    fn test_valid_request_passes() {
        let result = RequestValidator::new()
            .namespace("users")
            .key(b"alice")
            .value(b"{}")
            .ttl(Some(Duration::from_secs(60)))
            .finish();
        assert!(result.is_ok());
    }

    #[test]
    fn test_all_violations_reported_together() {
        let oversized_key = vec![b'k'; MAX_KEY_SIZE + 1];
        let err = RequestValidator::new()
            .namespace("bad name")
            .key(&oversized_key)
            .ttl(Some(Duration::ZERO))
            .finish()
            .unwrap_err();

        match err {
            KvError::InvalidRequest(violations) => {
                assert_eq!(violations.len(), 3);
                assert!(violations[0].starts_with("namespace:"));
                assert!(violations[1].starts_with("key:"));
                assert!(violations[2].starts_with("ttl:"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_key_boundaries() {
        assert!(RequestValidator::new().key(&[]).finish().is_err());
        assert!(RequestValidator::new().key(&vec![0u8; MAX_KEY_SIZE]).finish().is_ok());
    }

    #[test]
    fn test_value_boundaries() {
        assert!(RequestValidator::new().value(&[]).finish().is_ok());
        assert!(RequestValidator::new()
            .value(&vec![0u8; MAX_VALUE_SIZE])
            .finish()
            .is_ok());
        assert!(RequestValidator::new()
            .value(&vec![0u8; MAX_VALUE_SIZE + 1])
            .finish()
            .is_err());
    }

    #[test]
    fn test_ttl_upper_bound() {
        assert!(RequestValidator::new().ttl(Some(MAX_TTL)).finish().is_ok());
        assert!(RequestValidator::new()
            .ttl(Some(MAX_TTL + Duration::from_secs(1)))
            .finish()
            .is_err());
        assert!(RequestValidator::new().ttl(None).finish().is_ok());
    }

    #[test]
    fn test_batch_violations_are_indexed() {
        let ops = vec![
            BatchOp::put("users", b"ok".to_vec(), b"v".to_vec()),
            BatchOp::delete("users", Vec::new()),
        ];
        let err = RequestValidator::new().batch(&ops).finish().unwrap_err();
        assert_eq!(err.to_string(), "invalid request: ops[1].key: must not be empty");
    }

    #[test]
    fn test_batch_size_limit() {
        let ops: Vec<BatchOp> = (0..MAX_BATCH_OPS + 1)
            .map(|i| BatchOp::delete("users", format!("k{}", i).into_bytes()))
            .collect();
        assert!(RequestValidator::new().batch(&ops).finish().is_err());
    }

    #[test]
    fn test_clamp_scan_limit() {
        assert_eq!(clamp_scan_limit(0), 1);
        assert_eq!(clamp_scan_limit(2), 2);
        assert_eq!(clamp_scan_limit(50_000), MAX_SCAN_LIMIT);
    }
}
