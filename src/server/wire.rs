//! Wire DTOs for the HTTP facade.
//!
//! Field names here are the external contract (spreadsheet macros and
//! shell scripts depend on the exact spelling); the structs convert to and
//! from the internal model at the boundary and nowhere else.

use serde::{Deserialize, Serialize};

use crate::config::EvidenceConfig;
use crate::correlation::CorrelationId;
use crate::error::{ErrorKind, EvidenceError};
use crate::evidence::decode_file;
use crate::jobs::JobStatus;
use crate::model::{AnnotatedArtifact, EvaluationItem, EvaluationResult, HighlightRegion};

/// One attachment as submitted by the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvidenceFile {
    pub file_name: String,
    #[serde(default)]
    pub mime_type: String,
    /// Includes the leading dot, e.g. `.pdf`.
    #[serde(default)]
    pub extension: String,
    pub base64: String,
}

/// One evaluation item as submitted by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct WireItem {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Category", default)]
    pub category: String,
    #[serde(rename = "ControlDescription", default)]
    pub control_description: String,
    #[serde(rename = "TestProcedure", default)]
    pub test_procedure: String,
    #[serde(rename = "EvidenceLink", default)]
    pub evidence_link: String,
    #[serde(rename = "EvidenceFiles", default)]
    pub evidence_files: Vec<WireEvidenceFile>,
}

/// Validation failure at ingest.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("batch must contain at least one item")]
    EmptyBatch,

    #[error("item {index}: ID must be non-empty")]
    MissingId { index: usize },

    #[error("duplicate item ID '{id}'")]
    DuplicateId { id: String },

    #[error("item '{id}': {field} must be non-empty")]
    MissingField { id: String, field: String },

    #[error(transparent)]
    Evidence(#[from] EvidenceError),
}

/// Validate and convert a submitted batch into internal items.
pub fn ingest_items(
    wire: Vec<WireItem>,
    evidence_config: &EvidenceConfig,
) -> Result<Vec<EvaluationItem>, IngestError> {
    if wire.is_empty() {
        return Err(IngestError::EmptyBatch);
    }

    let mut seen = std::collections::HashSet::new();
    let mut items = Vec::with_capacity(wire.len());
    for (index, entry) in wire.into_iter().enumerate() {
        if entry.id.trim().is_empty() {
            return Err(IngestError::MissingId { index });
        }
        if !seen.insert(entry.id.clone()) {
            return Err(IngestError::DuplicateId { id: entry.id });
        }
        if entry.control_description.trim().is_empty() {
            return Err(IngestError::MissingField {
                id: entry.id,
                field: "ControlDescription".to_string(),
            });
        }
        if entry.test_procedure.trim().is_empty() {
            return Err(IngestError::MissingField {
                id: entry.id,
                field: "TestProcedure".to_string(),
            });
        }

        let mut files = Vec::with_capacity(entry.evidence_files.len());
        for file in &entry.evidence_files {
            files.push(decode_file(
                &file.file_name,
                &file.mime_type,
                &file.extension,
                &file.base64,
                evidence_config,
            )?);
        }

        items.push(EvaluationItem {
            id: entry.id,
            category: entry.category,
            control_description: entry.control_description,
            test_procedure: entry.test_procedure,
            evidence_link: entry.evidence_link,
            evidence_files: files,
        });
    }
    Ok(items)
}

/// One annotated artifact on the wire.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireArtifact {
    pub file_name: String,
    pub original_file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub base64: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub highlights: Vec<HighlightRegion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl From<AnnotatedArtifact> for WireArtifact {
    fn from(artifact: AnnotatedArtifact) -> Self {
        Self {
            file_name: artifact.file_name,
            original_file_name: artifact.original_file_name,
            file_path: artifact.file_path,
            base64: artifact.base64,
            highlights: artifact.highlights,
            warning: artifact.warning,
        }
    }
}

/// Per-item failure descriptor inside a result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireItemError {
    pub error_kind: String,
    pub message: String,
}

/// One evaluation result on the wire.
#[derive(Debug, Serialize)]
pub struct WireResult {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "evaluationResult", skip_serializing_if = "Option::is_none")]
    pub evaluation_result: Option<bool>,
    #[serde(rename = "executionPlanSummary")]
    pub execution_plan_summary: String,
    #[serde(rename = "judgmentBasis")]
    pub judgment_basis: String,
    #[serde(rename = "documentReference")]
    pub document_reference: String,
    #[serde(rename = "evidenceFiles")]
    pub evidence_files: Vec<WireArtifact>,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireItemError>,
}

impl From<EvaluationResult> for WireResult {
    fn from(result: EvaluationResult) -> Self {
        Self {
            id: result.id,
            evaluation_result: result.evaluation_result,
            execution_plan_summary: result.execution_plan_summary,
            judgment_basis: result.judgment_basis,
            document_reference: result.document_reference,
            evidence_files: result.evidence_files.into_iter().map(Into::into).collect(),
            file_name: result.file_name,
            error: result.error.map(|f| WireItemError {
                error_kind: f.kind.as_str().to_string(),
                message: f.message,
            }),
        }
    }
}

/// `/evaluate/submit` success envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub estimated_duration_seconds: u64,
}

/// `/evaluate/status/{id}` envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub job_id: String,
    pub status: String,
    pub progress: u8,
    pub submitted_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub correlation_id: CorrelationId,
}

impl From<JobStatus> for StatusResponse {
    fn from(status: JobStatus) -> Self {
        Self {
            job_id: status.job_id,
            status: status.state.as_wire().to_string(),
            progress: status.progress,
            submitted_at: status.submitted_at.to_rfc3339(),
            started_at: status.started_at.map(|t| t.to_rfc3339()),
            completed_at: status.completed_at.map(|t| t.to_rfc3339()),
            correlation_id: status.correlation_id,
        }
    }
}

/// Failure envelope, any endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEnvelope {
    pub error: bool,
    pub error_kind: String,
    pub message: String,
    pub correlation_id: CorrelationId,
}

impl FailureEnvelope {
    pub fn new(kind: ErrorKind, message: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self {
            error: true,
            error_kind: kind.as_str().to_string(),
            message: message.into(),
            correlation_id,
        }
    }
}
