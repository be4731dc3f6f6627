//! DOCX paragraph extraction via the raw OOXML part.
//!
//! Reads `word/document.xml` and collects the text runs of each `<w:p>`
//! paragraph, preserving paragraph order. Empty paragraphs are dropped.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::EvidenceError;

pub fn extract_paragraphs(file_name: &str, bytes: &[u8]) -> Result<Vec<String>, EvidenceError> {
    let fail = |reason: String| EvidenceError::ExtractionFailed {
        file_name: file_name.to_string(),
        reason,
    };

    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| fail(e.to_string()))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| fail(e.to_string()))?
        .read_to_string(&mut xml)
        .map_err(|e| fail(e.to_string()))?;

    let mut reader = Reader::from_str(&xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(|e| fail(e.to_string()))? {
            Event::Start(e) if e.name().as_ref() == b"w:p" => current.clear(),
            Event::End(e) if e.name().as_ref() == b"w:p" => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    paragraphs.push(trimmed.to_string());
                }
            }
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_text = true,
            Event::End(e) if e.name().as_ref() == b"w:t" => in_text = false,
            Event::Text(t) if in_text => {
                current.push_str(&t.unescape().map_err(|e| fail(e.to_string()))?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs)
}
