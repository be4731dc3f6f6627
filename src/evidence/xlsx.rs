//! XLSX cell extraction via the raw OOXML parts.
//!
//! Reads `xl/sharedStrings.xml` and each `xl/worksheets/sheetN.xml` and
//! renders cells as `SheetN!A1: value` lines. Formulas are represented by
//! their cached values, which is what audit evidence screenshots show.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::EvidenceError;

/// One extracted cell.
#[derive(Debug, Clone)]
pub struct SheetCell {
    /// `SheetN!A1`-style reference.
    pub reference: String,
    pub value: String,
}

pub fn extract_cells(file_name: &str, bytes: &[u8]) -> Result<Vec<SheetCell>, EvidenceError> {
    let zip_err = |reason: String| EvidenceError::ExtractionFailed {
        file_name: file_name.to_string(),
        reason,
    };

    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| zip_err(e.to_string()))?;

    let shared = read_shared_strings(&mut archive).map_err(|e| zip_err(e))?;

    let sheet_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    let mut sheet_names = sheet_names;
    sheet_names.sort();

    let mut cells = Vec::new();
    for (index, name) in sheet_names.iter().enumerate() {
        let mut xml = String::new();
        archive
            .by_name(name)
            .map_err(|e| zip_err(e.to_string()))?
            .read_to_string(&mut xml)
            .map_err(|e| zip_err(e.to_string()))?;
        parse_sheet(&xml, index + 1, &shared, &mut cells).map_err(|e| zip_err(e))?;
    }

    Ok(cells)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
) -> Result<Vec<String>, String> {
    let mut xml = String::new();
    match archive.by_name("xl/sharedStrings.xml") {
        Ok(mut entry) => {
            entry.read_to_string(&mut xml).map_err(|e| e.to_string())?;
        }
        Err(_) => return Ok(Vec::new()),
    }

    let mut reader = Reader::from_str(&xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) if e.name().as_ref() == b"si" => {
                in_si = true;
                current.clear();
            }
            Event::End(e) if e.name().as_ref() == b"si" => {
                in_si = false;
                strings.push(current.clone());
            }
            Event::Start(e) if e.name().as_ref() == b"t" => in_t = true,
            Event::End(e) if e.name().as_ref() == b"t" => in_t = false,
            Event::Text(t) if in_si && in_t => {
                current.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

fn parse_sheet(
    xml: &str,
    sheet_index: usize,
    shared: &[String],
    cells: &mut Vec<SheetCell>,
) -> Result<(), String> {
    let mut reader = Reader::from_str(xml);
    let mut cell_ref = String::new();
    let mut cell_type = String::new();
    let mut in_value = false;
    let mut value = String::new();

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"c" => {
                cell_ref.clear();
                cell_type.clear();
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"r" => {
                            cell_ref = String::from_utf8_lossy(&attr.value).into_owned();
                        }
                        b"t" => {
                            cell_type = String::from_utf8_lossy(&attr.value).into_owned();
                        }
                        _ => {}
                    }
                }
            }
            Event::Start(e) if e.name().as_ref() == b"v" => {
                in_value = true;
                value.clear();
            }
            Event::End(e) if e.name().as_ref() == b"v" => {
                in_value = false;
                let rendered = if cell_type == "s" {
                    value
                        .trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i))
                        .cloned()
                        .unwrap_or_else(|| value.clone())
                } else {
                    value.clone()
                };
                if !rendered.is_empty() && !cell_ref.is_empty() {
                    cells.push(SheetCell {
                        reference: format!("Sheet{}!{}", sheet_index, cell_ref),
                        value: rendered,
                    });
                }
            }
            Event::Text(t) if in_value => {
                value.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

/// Render cells as prompt-ready lines.
pub fn render_cells(cells: &[SheetCell]) -> String {
    cells
        .iter()
        .map(|c| format!("{}: {}", c.reference, c.value))
        .collect::<Vec<_>>()
        .join("\n")
}
