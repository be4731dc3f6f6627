//! Evidence ingestion: base64 decoding, classification, extraction, and
//! artifact annotation.

mod annotate;
pub mod docx;
mod extract;
pub mod xlsx;

pub use annotate::build_artifacts;
pub use extract::{DocumentStructure, ExtractedEvidence, FileExtraction, extract_all};
pub use xlsx::SheetCell;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;

use crate::config::EvidenceConfig;
use crate::error::EvidenceError;
use crate::model::{EvidenceFile, MimeKind};

/// Decode one attachment from its wire form.
///
/// Oversized payloads are rejected outright; silent truncation would hand
/// the reasoning pipeline evidence the client never sent.
pub fn decode_file(
    file_name: &str,
    mime_type: &str,
    extension: &str,
    base64_content: &str,
    config: &EvidenceConfig,
) -> Result<EvidenceFile, EvidenceError> {
    let cleaned: String = base64_content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let decoded = BASE64
        .decode(cleaned.as_bytes())
        .map_err(|e| EvidenceError::DecodeFailed {
            file_name: file_name.to_string(),
            reason: e.to_string(),
        })?;

    if decoded.len() > config.max_file_bytes {
        return Err(EvidenceError::TooLarge {
            file_name: file_name.to_string(),
            size: decoded.len(),
            cap: config.max_file_bytes,
        });
    }

    Ok(EvidenceFile {
        file_name: file_name.to_string(),
        mime_type: mime_type.to_string(),
        extension: extension.to_string(),
        kind: MimeKind::classify(mime_type, extension),
        bytes: Bytes::from(decoded),
    })
}
