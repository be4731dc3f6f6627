//! Disabled-OCR backend.
//!
//! Returns empty text for every input. PDFs still get their embedded text
//! layer in the Evidence Processor; this backend only removes the OCR
//! fallback for images and scanned documents.

use async_trait::async_trait;

use crate::error::OcrError;
use crate::ocr::{OcrClient, OcrOutcome};

pub struct NoneOcrClient;

#[async_trait]
impl OcrClient for NoneOcrClient {
    async fn extract(
        &self,
        _bytes: &[u8],
        mime_type: &str,
        _language: &str,
    ) -> Result<OcrOutcome, OcrError> {
        tracing::debug!(mime_type, "OCR disabled; returning empty extraction");
        Ok(OcrOutcome::default())
    }

    fn provider_name(&self) -> &str {
        "none"
    }
}
