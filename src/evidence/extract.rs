//! Per-file text extraction, dispatched by recognized format.
//!
//! One failing file never aborts the batch: it contributes an empty
//! extraction plus a warning that travels with the annotated artifact.

use crate::config::EvidenceConfig;
use crate::evidence::docx;
use crate::evidence::xlsx::{self, SheetCell};
use crate::model::{EvidenceFile, MimeKind};
use crate::ocr::{OcrClient, TextBlock};

/// Location information preserved for later artifact annotation.
#[derive(Debug, Clone)]
pub enum DocumentStructure {
    /// Plain text or an embedded PDF text layer.
    Text,
    /// OCR-recognized regions (images, scanned PDFs).
    OcrBlocks(Vec<TextBlock>),
    /// Spreadsheet cells.
    Cells(Vec<SheetCell>),
    /// Document paragraphs, in order.
    Paragraphs(Vec<String>),
}

/// Extraction outcome for one file.
#[derive(Debug, Clone)]
pub struct FileExtraction {
    pub file_name: String,
    pub text: String,
    pub structure: DocumentStructure,
    pub warning: Option<String>,
    pub truncated: bool,
}

/// Extraction outcome for a whole item, input order preserved.
#[derive(Debug, Clone, Default)]
pub struct ExtractedEvidence {
    pub files: Vec<FileExtraction>,
}

impl ExtractedEvidence {
    /// Concatenated prompt text, one filename header per file.
    pub fn combined_text(&self) -> String {
        self.files
            .iter()
            .map(|f| format!("=== {} ===\n{}", f.file_name, f.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.files.iter().all(|f| f.text.is_empty())
    }
}

/// Extract text from every attachment of an item.
pub async fn extract_all(
    files: &[EvidenceFile],
    ocr: &dyn OcrClient,
    config: &EvidenceConfig,
    language: &str,
) -> ExtractedEvidence {
    let mut out = ExtractedEvidence::default();
    for file in files {
        out.files.push(extract_one(file, ocr, config, language).await);
    }
    out
}

async fn extract_one(
    file: &EvidenceFile,
    ocr: &dyn OcrClient,
    config: &EvidenceConfig,
    language: &str,
) -> FileExtraction {
    let (text, structure, warning) = match file.kind {
        MimeKind::Pdf => extract_pdf(file, ocr, config, language).await,
        kind if kind.is_image() => match ocr.extract(&file.bytes, &file.mime_type, language).await
        {
            Ok(outcome) => (outcome.text, DocumentStructure::OcrBlocks(outcome.blocks), None),
            Err(e) => (
                String::new(),
                DocumentStructure::Text,
                Some(format!("image OCR failed: {e}")),
            ),
        },
        MimeKind::Xlsx => match xlsx::extract_cells(&file.file_name, &file.bytes) {
            Ok(cells) => {
                let rendered = xlsx::render_cells(&cells);
                (rendered, DocumentStructure::Cells(cells), None)
            }
            Err(e) => (
                String::new(),
                DocumentStructure::Text,
                Some(format!("spreadsheet extraction failed: {e}")),
            ),
        },
        MimeKind::Docx => match docx::extract_paragraphs(&file.file_name, &file.bytes) {
            Ok(paragraphs) => (
                paragraphs.join("\n"),
                DocumentStructure::Paragraphs(paragraphs),
                None,
            ),
            Err(e) => (
                String::new(),
                DocumentStructure::Text,
                Some(format!("document extraction failed: {e}")),
            ),
        },
        MimeKind::PlainText => (
            String::from_utf8_lossy(&file.bytes).into_owned(),
            DocumentStructure::Text,
            None,
        ),
        _ => (
            String::new(),
            DocumentStructure::Text,
            Some(format!("unrecognized evidence format '{}'", file.mime_type)),
        ),
    };

    if let Some(ref warning) = warning {
        tracing::warn!(file = %file.file_name, %warning, "evidence extraction degraded");
    }

    let (text, truncated) = truncate_marked(text, config.max_extracted_chars);
    FileExtraction {
        file_name: file.file_name.clone(),
        text,
        structure,
        warning,
        truncated,
    }
}

async fn extract_pdf(
    file: &EvidenceFile,
    ocr: &dyn OcrClient,
    config: &EvidenceConfig,
    language: &str,
) -> (String, DocumentStructure, Option<String>) {
    let embedded = pdf_extract::extract_text_from_mem(&file.bytes);

    match embedded {
        Ok(text) if text.trim().len() >= config.ocr_fallback_threshold => {
            (text.trim().to_string(), DocumentStructure::Text, None)
        }
        // Thin or absent text layer: likely a scan, try OCR.
        other => {
            let embedded_text = other.ok().map(|t| t.trim().to_string()).unwrap_or_default();
            match ocr.extract(&file.bytes, &file.mime_type, language).await {
                Ok(outcome) if !outcome.text.is_empty() => {
                    (outcome.text, DocumentStructure::OcrBlocks(outcome.blocks), None)
                }
                Ok(_) => (embedded_text, DocumentStructure::Text, None),
                Err(e) => (
                    embedded_text,
                    DocumentStructure::Text,
                    Some(format!("PDF OCR fallback failed: {e}")),
                ),
            }
        }
    }
}

/// Truncate at a char boundary, appending an explicit marker.
fn truncate_marked(text: String, cap: usize) -> (String, bool) {
    if text.chars().count() <= cap {
        return (text, false);
    }
    let kept: String = text.chars().take(cap).collect();
    (
        format!("{kept}\n[truncated: exceeded {cap} characters]"),
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::evidence::decode_file;
    use crate::ocr::NoneOcrClient;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;

    fn text_file(name: &str, content: &str) -> EvidenceFile {
        let config = Settings::for_tests().evidence;
        decode_file(
            name,
            "text/plain",
            ".txt",
            &BASE64.encode(content.as_bytes()),
            &config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn plain_text_extraction_with_headers() {
        let config = Settings::for_tests().evidence;
        let files = vec![
            text_file("a.txt", "first file"),
            text_file("b.txt", "second file"),
        ];
        let extracted = extract_all(&files, &NoneOcrClient, &config, "en").await;
        let combined = extracted.combined_text();
        assert!(combined.contains("=== a.txt ===\nfirst file"));
        assert!(combined.contains("=== b.txt ===\nsecond file"));
    }

    #[tokio::test]
    async fn truncation_marker_applied() {
        let mut config = Settings::for_tests().evidence;
        config.max_extracted_chars = 10;
        let files = vec![text_file("long.txt", "abcdefghijKLMNOP")];
        let extracted = extract_all(&files, &NoneOcrClient, &config, "en").await;
        assert!(extracted.files[0].truncated);
        assert!(extracted.files[0].text.contains("[truncated: exceeded 10 characters]"));
        assert!(extracted.files[0].text.starts_with("abcdefghij"));
    }

    #[tokio::test]
    async fn unknown_format_degrades_with_warning() {
        let config = Settings::for_tests().evidence;
        let file = EvidenceFile {
            file_name: "blob.bin".into(),
            mime_type: "application/octet-stream".into(),
            extension: ".bin".into(),
            kind: crate::model::MimeKind::Unknown,
            bytes: bytes::Bytes::from_static(b"\x00\x01"),
        };
        let extracted = extract_all(&[file], &NoneOcrClient, &config, "en").await;
        assert!(extracted.files[0].warning.is_some());
        assert!(extracted.files[0].text.is_empty());
        assert!(extracted.is_empty());
    }
}
