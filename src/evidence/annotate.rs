//! Annotated artifact construction.
//!
//! After judgment, the document reference quotation is located in each
//! file's extraction structure and recorded as highlight regions. The
//! artifact carries the original bytes (re-encoded) plus the overlay
//! metadata; artifacts preserve input order.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::evidence::extract::{DocumentStructure, ExtractedEvidence};
use crate::model::{AnnotatedArtifact, EvidenceFile, HighlightRegion};

/// Build one annotated artifact per evidence file.
pub fn build_artifacts(
    files: &[EvidenceFile],
    extracted: &ExtractedEvidence,
    document_reference: &str,
    evidence_link: &str,
) -> Vec<AnnotatedArtifact> {
    files
        .iter()
        .enumerate()
        .map(|(i, file)| {
            let extraction = extracted.files.get(i);
            let highlights = extraction
                .map(|e| locate_reference(&e.structure, &e.text, document_reference))
                .unwrap_or_default();

            AnnotatedArtifact {
                file_name: format!("highlighted_{}", file.file_name),
                original_file_name: file.file_name.clone(),
                file_path: if evidence_link.is_empty() {
                    None
                } else {
                    Some(evidence_link.to_string())
                },
                base64: BASE64.encode(&file.bytes),
                highlights,
                warning: extraction.and_then(|e| e.warning.clone()),
            }
        })
        .collect()
}

/// Locate the judgment's quotation inside one file's structure.
fn locate_reference(
    structure: &DocumentStructure,
    text: &str,
    reference: &str,
) -> Vec<HighlightRegion> {
    let needle = reference.trim();
    if needle.is_empty() {
        return Vec::new();
    }

    match structure {
        DocumentStructure::OcrBlocks(blocks) => blocks
            .iter()
            .filter(|b| overlaps(&b.text, needle))
            .filter_map(|b| {
                b.bounding_box.map(|bounding_box| HighlightRegion::Box {
                    page: b.page.unwrap_or(1),
                    bounding_box,
                })
            })
            .collect(),
        DocumentStructure::Cells(cells) => cells
            .iter()
            .filter(|c| overlaps(&c.value, needle))
            .map(|c| HighlightRegion::Cell {
                reference: c.reference.clone(),
            })
            .collect(),
        DocumentStructure::Paragraphs(paragraphs) => paragraphs
            .iter()
            .enumerate()
            .filter(|(_, p)| overlaps(p, needle))
            .map(|(index, _)| HighlightRegion::Paragraph { index })
            .collect(),
        DocumentStructure::Text => match text.find(needle) {
            Some(start) => vec![HighlightRegion::Span {
                start,
                end: start + needle.len(),
            }],
            None => Vec::new(),
        },
    }
}

/// True when one string contains the other (either direction), so a short
/// OCR line still matches a longer quotation that spans lines.
fn overlaps(haystack: &str, needle: &str) -> bool {
    if haystack.trim().is_empty() {
        return false;
    }
    haystack.contains(needle) || needle.contains(haystack.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::extract::FileExtraction;
    use crate::evidence::xlsx::SheetCell;
    use crate::model::MimeKind;
    use bytes::Bytes;

    fn file(name: &str) -> EvidenceFile {
        EvidenceFile {
            file_name: name.to_string(),
            mime_type: "text/plain".to_string(),
            extension: ".txt".to_string(),
            kind: MimeKind::PlainText,
            bytes: Bytes::from_static(b"the approval was signed by the CFO"),
        }
    }

    fn extraction(name: &str, structure: DocumentStructure, text: &str) -> ExtractedEvidence {
        ExtractedEvidence {
            files: vec![FileExtraction {
                file_name: name.to_string(),
                text: text.to_string(),
                structure,
                warning: None,
                truncated: false,
            }],
        }
    }

    #[test]
    fn artifact_naming_and_path() {
        let files = vec![file("report.txt")];
        let extracted = extraction("report.txt", DocumentStructure::Text, "signed by the CFO");
        let artifacts = build_artifacts(&files, &extracted, "signed by the CFO", "audit/2026/Q1");

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].file_name, "highlighted_report.txt");
        assert_eq!(artifacts[0].original_file_name, "report.txt");
        assert_eq!(artifacts[0].file_path.as_deref(), Some("audit/2026/Q1"));
        assert!(!artifacts[0].base64.is_empty());
    }

    #[test]
    fn span_highlight_in_plain_text() {
        let files = vec![file("report.txt")];
        let extracted = extraction(
            "report.txt",
            DocumentStructure::Text,
            "the approval was signed by the CFO",
        );
        let artifacts = build_artifacts(&files, &extracted, "signed by the CFO", "");

        match &artifacts[0].highlights[..] {
            [HighlightRegion::Span { start, end }] => {
                assert_eq!(&"the approval was signed by the CFO"[*start..*end], "signed by the CFO");
            }
            other => panic!("unexpected highlights: {other:?}"),
        }
        assert!(artifacts[0].file_path.is_none());
    }

    #[test]
    fn cell_highlight_matches_value() {
        let cells = vec![
            SheetCell {
                reference: "Sheet1!A1".into(),
                value: "prepared by clerk".into(),
            },
            SheetCell {
                reference: "Sheet1!B2".into(),
                value: "approved by CFO".into(),
            },
        ];
        let files = vec![file("wb.xlsx")];
        let extracted = extraction("wb.xlsx", DocumentStructure::Cells(cells), "");
        let artifacts = build_artifacts(&files, &extracted, "approved by CFO", "");

        match &artifacts[0].highlights[..] {
            [HighlightRegion::Cell { reference }] => assert_eq!(reference, "Sheet1!B2"),
            other => panic!("unexpected highlights: {other:?}"),
        }
    }

    #[test]
    fn empty_reference_highlights_nothing() {
        let files = vec![file("report.txt")];
        let extracted = extraction("report.txt", DocumentStructure::Text, "whatever");
        let artifacts = build_artifacts(&files, &extracted, "  ", "");
        assert!(artifacts[0].highlights.is_empty());
    }
}
