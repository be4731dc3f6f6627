//! Error types for the attestor service.
//!
//! Each module has its own error enum to provide clear error boundaries.
//! The library uses `thiserror` for structured, typed errors. `ErrorKind`
//! is the wire-level taxonomy every failure is eventually mapped onto.

use std::time::Duration;

/// Wire-level error taxonomy surfaced in failure envelopes and job records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    BadRequest,
    RequestTooLarge,
    Busy,
    NotFound,
    NotReady,
    Timeout,
    Upstream,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Canonical wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::RequestTooLarge => "REQUEST_TOO_LARGE",
            ErrorKind::Busy => "BUSY",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::NotReady => "NOT_READY",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Upstream => "UPSTREAM",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// HTTP status the facade maps this kind to.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::RequestTooLarge => 413,
            ErrorKind::Busy => 429,
            ErrorKind::NotFound => 404,
            ErrorKind::NotReady => 202,
            ErrorKind::Timeout => 504,
            ErrorKind::Upstream => 502,
            ErrorKind::Cancelled => 409,
            ErrorKind::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from LLM provider backends.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Provider returned HTTP 429.
    #[error("LLM provider '{provider}' rate limited{}", match .retry_after {
        Some(d) => format!(", retry after {}s", d.as_secs()),
        None => String::new(),
    })]
    RateLimited {
        provider: String,
        /// Wait hint from the Retry-After header, if present.
        retry_after: Option<Duration>,
    },

    /// Provider unreachable or returned a 5xx.
    #[error("LLM provider '{provider}' unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    /// Per-call wall-clock budget exceeded.
    #[error("LLM provider '{provider}' timed out after {elapsed:?}")]
    Timeout { provider: String, elapsed: Duration },

    /// Provider rejected the request (4xx other than auth/rate).
    #[error("LLM provider '{provider}' rejected request: {reason}")]
    InvalidRequest { provider: String, reason: String },

    /// Credentials missing or rejected.
    #[error("LLM provider '{provider}' authentication failed")]
    AuthFailed { provider: String },

    /// Response body could not be interpreted.
    #[error("LLM provider '{provider}' returned invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl LlmError {
    /// Transient failures are worth retrying; permanent ones are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Unavailable { .. } | LlmError::Timeout { .. }
        )
    }
}

/// Errors from OCR backends.
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR provider '{provider}' request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("OCR provider '{provider}' timed out after {elapsed:?}")]
    Timeout { provider: String, elapsed: Duration },

    /// Local OCR command could not be spawned or exited non-zero.
    #[error("OCR command '{command}' failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("OCR provider '{provider}' returned invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },

    /// Input format the backend cannot read.
    #[error("OCR provider '{provider}' does not support {mime_type}")]
    Unsupported { provider: String, mime_type: String },
}

/// Errors from evidence ingestion and extraction.
#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("evidence file '{file_name}' is not valid base64: {reason}")]
    DecodeFailed { file_name: String, reason: String },

    #[error("evidence file '{file_name}' decodes to {size} bytes, above the {cap}-byte cap")]
    TooLarge {
        file_name: String,
        size: usize,
        cap: usize,
    },

    #[error("evidence file '{file_name}' extraction failed: {reason}")]
    ExtractionFailed { file_name: String, reason: String },
}

/// Errors from a single reasoning task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error("task '{task}' could not parse model output: {reason}")]
    ParseFailed { task: String, reason: String },
}

impl TaskError {
    /// Whether the underlying failure is worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            TaskError::Llm(e) => e.is_transient(),
            TaskError::Ocr(OcrError::Timeout { .. }) => true,
            TaskError::Ocr(_) => false,
            TaskError::ParseFailed { .. } => false,
        }
    }
}

/// Errors that terminate a single item's evaluation graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Every planned task failed permanently.
    #[error("all {count} planned tasks failed; last: {last}")]
    AllTasksFailed { count: usize, last: String },

    #[error("evaluation timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("evaluation cancelled")]
    Cancelled,

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::AllTasksFailed { .. } => ErrorKind::Upstream,
            GraphError::Timeout { .. } => ErrorKind::Timeout,
            GraphError::Cancelled => ErrorKind::Cancelled,
            GraphError::Llm(_) => ErrorKind::Upstream,
        }
    }
}

/// Coordinator-level batch failures.
///
/// Per-item failures are folded into that item's own result; this error
/// covers the cases where execution cannot be attributed to any item and
/// the whole batch outcome is unusable.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// An evaluation worker panicked instead of reporting a result.
    #[error("evaluation worker panicked: {reason}")]
    WorkerPanic { reason: String },
}

impl BatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BatchError::WorkerPanic { .. } => ErrorKind::Internal,
        }
    }
}

/// Errors from the durable job store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job store unavailable: {reason}")]
    Unavailable { reason: String },

    /// compare_and_set observed a different state than expected.
    #[error("job '{job_id}' state conflict: expected {expected}, found {found}")]
    Conflict {
        job_id: String,
        expected: String,
        found: String,
    },

    #[error("job '{job_id}' not found")]
    NotFound { job_id: String },
}

/// Errors from job lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job '{job_id}' not found")]
    NotFound { job_id: String },

    /// Job exists but has not reached a terminal state.
    #[error("job '{job_id}' not ready (state: {state})")]
    NotReady { job_id: String, state: String },

    #[error("job '{job_id}' failed: {message}")]
    Failed {
        job_id: String,
        kind: ErrorKind,
        message: String,
    },

    /// Work queue is saturated.
    #[error("work queue saturated ({depth} pending)")]
    Busy { depth: usize },

    #[error("cancel not permitted in state {state}")]
    CancelNotPermitted { state: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_wire_spelling() {
        assert_eq!(ErrorKind::RequestTooLarge.as_str(), "REQUEST_TOO_LARGE");
        assert_eq!(ErrorKind::NotReady.as_str(), "NOT_READY");
        assert_eq!(ErrorKind::Upstream.as_str(), "UPSTREAM");
    }

    #[test]
    fn error_kind_status_mapping() {
        assert_eq!(ErrorKind::BadRequest.http_status(), 400);
        assert_eq!(ErrorKind::RequestTooLarge.http_status(), 413);
        assert_eq!(ErrorKind::Busy.http_status(), 429);
        assert_eq!(ErrorKind::NotReady.http_status(), 202);
        assert_eq!(ErrorKind::Timeout.http_status(), 504);
        assert_eq!(ErrorKind::Cancelled.http_status(), 409);
    }

    #[test]
    fn transient_classification() {
        let rate = LlmError::RateLimited {
            provider: "azure".into(),
            retry_after: None,
        };
        assert!(rate.is_transient());

        let bad = LlmError::InvalidRequest {
            provider: "azure".into(),
            reason: "bad schema".into(),
        };
        assert!(!bad.is_transient());

        let parse = TaskError::ParseFailed {
            task: "semantic_search".into(),
            reason: "no json".into(),
        };
        assert!(!parse.is_transient());
    }
}
