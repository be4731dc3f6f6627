//! Core domain model: evaluation items, evidence files, results.
//!
//! These are the internal representations; the HTTP wire DTOs live in
//! `server::wire` and convert to/from these types at the boundary.

use bytes::Bytes;

use crate::error::ErrorKind;

/// Recognized evidence formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeKind {
    Pdf,
    Png,
    Jpeg,
    Gif,
    Xlsx,
    Docx,
    PlainText,
    Unknown,
}

impl MimeKind {
    /// Classify from the declared mime type, falling back to the extension.
    pub fn classify(mime_type: &str, extension: &str) -> Self {
        let from_mime = Self::from_mime(mime_type);
        if from_mime != MimeKind::Unknown {
            return from_mime;
        }
        let guessed = mime_guess::from_ext(extension.trim_start_matches('.'))
            .first_raw()
            .unwrap_or("");
        Self::from_mime(guessed)
    }

    fn from_mime(mime_type: &str) -> Self {
        match mime_type.trim().to_ascii_lowercase().as_str() {
            "application/pdf" => MimeKind::Pdf,
            "image/png" => MimeKind::Png,
            "image/jpeg" | "image/jpg" => MimeKind::Jpeg,
            "image/gif" => MimeKind::Gif,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => MimeKind::Xlsx,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                MimeKind::Docx
            }
            s if s.starts_with("text/") => MimeKind::PlainText,
            _ => MimeKind::Unknown,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, MimeKind::Png | MimeKind::Jpeg | MimeKind::Gif)
    }
}

/// One decoded attachment. Immutable after ingest.
#[derive(Debug, Clone)]
pub struct EvidenceFile {
    pub file_name: String,
    pub mime_type: String,
    pub extension: String,
    pub kind: MimeKind,
    pub bytes: Bytes,
}

/// The input unit. Created at ingest, immutable thereafter.
#[derive(Debug, Clone)]
pub struct EvaluationItem {
    pub id: String,
    pub category: String,
    pub control_description: String,
    pub test_procedure: String,
    pub evidence_link: String,
    pub evidence_files: Vec<EvidenceFile>,
}

/// A region of an artifact that supports the verdict.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HighlightRegion {
    /// Page plus `[x, y, width, height]` box (PDF and image evidence).
    #[serde(rename_all = "camelCase")]
    Box { page: u32, bounding_box: [f32; 4] },
    /// Spreadsheet cell coordinate, e.g. `Sheet1!B7`.
    Cell { reference: String },
    /// Paragraph index within a document.
    Paragraph { index: usize },
    /// Character span within extracted plain text.
    #[serde(rename_all = "camelCase")]
    Span { start: usize, end: usize },
}

/// Annotated evidence artifact returned to the client.
#[derive(Debug, Clone)]
pub struct AnnotatedArtifact {
    /// `highlighted_` + the original name.
    pub file_name: String,
    pub original_file_name: String,
    /// Logical folder hint, echoed from the item's evidence link.
    pub file_path: Option<String>,
    /// Original bytes, re-encoded.
    pub base64: String,
    /// Regions that matched the judgment's document reference.
    pub highlights: Vec<HighlightRegion>,
    /// Per-file extraction warning, when extraction failed.
    pub warning: Option<String>,
}

/// The output unit, one per item.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub id: String,
    /// `Some(true)` effective, `Some(false)` deficient, `None` on failure.
    pub evaluation_result: Option<bool>,
    pub execution_plan_summary: String,
    pub judgment_basis: String,
    /// Direct quotation from the evidence.
    pub document_reference: String,
    pub evidence_files: Vec<AnnotatedArtifact>,
    /// Primary evidence reference.
    pub file_name: String,
    /// Set iff the item failed non-recoverably.
    pub error: Option<ItemFailure>,
}

/// Failure descriptor for one item.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl EvaluationResult {
    /// A result for an item that failed before producing a verdict.
    pub fn failed(id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            evaluation_result: None,
            execution_plan_summary: String::new(),
            judgment_basis: String::new(),
            document_reference: String::new(),
            evidence_files: Vec::new(),
            file_name: String::new(),
            error: Some(ItemFailure {
                kind,
                message: message.into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_mime() {
        assert_eq!(MimeKind::classify("application/pdf", ".bin"), MimeKind::Pdf);
        assert_eq!(MimeKind::classify("image/jpeg", ""), MimeKind::Jpeg);
        assert_eq!(MimeKind::classify("text/plain", ""), MimeKind::PlainText);
    }

    #[test]
    fn classify_falls_back_to_extension() {
        assert_eq!(
            MimeKind::classify("application/octet-stream", ".pdf"),
            MimeKind::Pdf
        );
        assert_eq!(MimeKind::classify("", ".png"), MimeKind::Png);
        assert_eq!(MimeKind::classify("", ".zzz"), MimeKind::Unknown);
    }

    #[test]
    fn xlsx_and_docx_mimes() {
        assert_eq!(
            MimeKind::classify(
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                ".xlsx"
            ),
            MimeKind::Xlsx
        );
        assert_eq!(MimeKind::classify("", ".docx"), MimeKind::Docx);
    }
}
