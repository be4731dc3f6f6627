//! Correlation-ID generation and threading.
//!
//! Every request or job is tagged with one correlation id, echoed in the
//! response envelope and attached to every log record produced while the
//! work is handled. The id is carried as an explicit parameter (inside
//! [`RequestContext`]), never read from ambient state.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A per-request identifier, `YYYYMMDD_<unix-seconds>_<4-digit-seq>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh id using the process-wide sequence counter.
    pub fn generate() -> Self {
        let now = Utc::now();
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) % 10_000;
        Self(format!(
            "{}_{}_{:04}",
            now.format("%Y%m%d"),
            now.timestamp(),
            seq
        ))
    }

    /// Adopt an id supplied by the client on ingress.
    pub fn from_header(value: &str) -> Self {
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Context threaded through every call made while handling one request/job.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: CorrelationId,
}

impl RequestContext {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self { correlation_id }
    }

    pub fn generate() -> Self {
        Self::new(CorrelationId::generate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_shape() {
        let id = CorrelationId::generate();
        let parts: Vec<&str> = id.as_str().split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert!(parts[0].chars().all(|c| c.is_ascii_digit()));
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 4);
    }

    #[test]
    fn sequence_advances() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn header_id_round_trips() {
        let id = CorrelationId::from_header("client-supplied-42");
        assert_eq!(id.as_str(), "client-supplied-42");
    }
}
