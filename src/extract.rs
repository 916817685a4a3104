//! Structural extraction from OOXML documents.
//!
//! Unlike a plain-text dump, the assembler needs document *structure*:
//! paragraphs with their heading styles from `.docx`, and positioned cell
//! grids from `.xlsx`. Both formats are ZIP archives of XML parts, read here
//! with `zip` and streamed with `quick-xml`.

use std::io::Read;

use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Column count of a worksheet (`A` through `XFD`).
const XLSX_MAX_COLUMNS: usize = 16_384;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extraction error. Never panics; the caller decides whether to skip the file.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

fn ooxml<E: std::fmt::Display>(e: E) -> ExtractError {
    ExtractError::Ooxml(e.to_string())
}

/// One `<w:p>` paragraph of a Word document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocxParagraph {
    /// Paragraph style id (e.g. `Heading1`, `Title`, `2`).
    pub style: Option<String>,
    /// Explicit outline level from `<w:outlineLvl>`, zero-based.
    pub outline_level: Option<u8>,
    pub text: String,
}

impl DocxParagraph {
    /// Heading depth (1-based) if this paragraph is a heading.
    ///
    /// Recognises `Heading N` / `HeadingN` styles, `Title`, bare numeric style
    /// ids used by localized Word templates, and explicit outline levels.
    pub fn heading_level(&self) -> Option<u8> {
        if let Some(lvl) = self.outline_level {
            if lvl < 9 {
                return Some(lvl + 1);
            }
        }
        let style = self.style.as_deref()?.to_ascii_lowercase().replace(' ', "");
        if style == "title" {
            return Some(1);
        }
        let digits = style.strip_prefix("heading").unwrap_or(&style);
        match digits.parse::<u8>() {
            Ok(n) if (1..=9).contains(&n) => Some(n),
            _ => None,
        }
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name).map_err(ooxml)?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(ooxml)?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Read all paragraphs of `word/document.xml`, in document order.
pub fn extract_docx_paragraphs(bytes: &[u8]) -> Result<Vec<DocxParagraph>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    parse_document_xml(&xml)
}

fn parse_document_xml(xml: &[u8]) -> Result<Vec<DocxParagraph>, ExtractError> {
    let mut paragraphs = Vec::new();
    let mut current: Option<DocxParagraph> = None;
    let mut in_t = false;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current = Some(DocxParagraph::default()),
                b"t" => in_t = true,
                b"pStyle" => {
                    if let Some(p) = current.as_mut() {
                        p.style = attr_value(&e, b"val");
                    }
                }
                b"outlineLvl" => {
                    if let Some(p) = current.as_mut() {
                        p.outline_level = attr_value(&e, b"val").and_then(|v| v.parse().ok());
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if let Some(p) = current.as_mut() {
                    match e.local_name().as_ref() {
                        b"pStyle" => p.style = attr_value(&e, b"val"),
                        b"outlineLvl" => {
                            p.outline_level = attr_value(&e, b"val").and_then(|v| v.parse().ok())
                        }
                        b"tab" => p.text.push('\t'),
                        b"br" => p.text.push('\n'),
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(te)) if in_t => {
                if let Some(p) = current.as_mut() {
                    p.text.push_str(te.unescape().map_err(ooxml)?.as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    if let Some(p) = current.take() {
                        paragraphs.push(p);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

/// Read the first worksheet of an `.xlsx` workbook as a grid of cell strings.
///
/// Rows keep their column positions: a row whose only cell is `C4` yields
/// `["", "", value]`. Numbers are returned as their stored text.
pub fn extract_xlsx_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml)?;
    let shared_strings = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
        parse_shared_strings(&xml)?
    } else {
        Vec::new()
    };
    let sheet = first_worksheet_name(&archive)
        .ok_or_else(|| ExtractError::Ooxml("workbook has no worksheets".to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, &sheet, MAX_XML_ENTRY_BYTES)?;
    parse_sheet_rows(&xml, &shared_strings)
}

fn first_worksheet_name(archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>) -> Option<String> {
    archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .min_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        })
        .map(|s| s.to_string())
}

fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    // Phonetic runs (<rPh>) repeat the reading of East Asian text; skip them.
    let mut in_phonetic = false;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(te)) if in_t && !in_phonetic => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().map_err(ooxml)?.as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                b"si" => strings.push(current.take().unwrap_or_default()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Zero-based column index from an A1-style reference (`"AB12"` → 27).
///
/// `Ok(None)` when the reference has no column letters. References past the
/// last worksheet column (`XFD`) are rejected.
fn column_index(cell_ref: &str) -> Result<Option<usize>, ExtractError> {
    let mut n = 0usize;
    let mut seen = false;
    for c in cell_ref.chars().take_while(|c| c.is_ascii_alphabetic()) {
        seen = true;
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        n = n
            .checked_mul(26)
            .and_then(|n| n.checked_add(digit))
            .filter(|n| *n <= XLSX_MAX_COLUMNS)
            .ok_or_else(|| ExtractError::Ooxml(format!("cell reference out of range: {}", crate::error::truncate_for_log(cell_ref, 32))))?;
    }
    Ok(seen.then(|| n - 1))
}

fn parse_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<String>>, ExtractError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Option<Vec<String>> = None;
    let mut cell_col = 0usize;
    let mut cell_type: Option<String> = None;
    let mut cell_text = String::new();
    let mut in_value = false;
    let mut cell_count = 0usize;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            tracing::warn!(limit = XLSX_MAX_CELLS_PER_SHEET, "worksheet truncated at cell limit");
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row = Some(Vec::new()),
                b"c" => {
                    let next = row.as_ref().map(|r| r.len()).unwrap_or(0);
                    cell_col = match attr_value(&e, b"r") {
                        Some(r) => column_index(&r)?.unwrap_or(next),
                        None => next,
                    };
                    if cell_col >= XLSX_MAX_COLUMNS {
                        return Err(ExtractError::Ooxml(format!("too many cells in row (column {})", cell_col + 1)));
                    }
                    cell_type = attr_value(&e, b"t");
                    cell_text.clear();
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => rows.push(Vec::new()),
            Ok(Event::Text(te)) if in_value => {
                cell_text.push_str(te.unescape().map_err(ooxml)?.as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let value = resolve_cell(cell_type.as_deref(), cell_text.trim(), shared_strings);
                    if let Some(r) = row.as_mut() {
                        if r.len() <= cell_col {
                            r.resize(cell_col + 1, String::new());
                        }
                        r[cell_col] = value;
                    }
                    cell_count += 1;
                }
                b"row" => {
                    if let Some(r) = row.take() {
                        rows.push(r);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

fn resolve_cell(cell_type: Option<&str>, raw: &str, shared_strings: &[String]) -> String {
    match cell_type {
        Some("s") => raw
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i))
            .cloned()
            .unwrap_or_default(),
        Some("b") => match raw {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        },
        _ => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_docx_paragraphs(b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_xlsx() {
        let err = extract_xlsx_rows(b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn document_xml_paragraphs_and_headings() {
        let xml = br#"<w:document xmlns:w="w"><w:body>
            <w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Architecture</w:t></w:r></w:p>
            <w:p><w:r><w:t xml:space="preserve">Gateway </w:t></w:r><w:r><w:t>&amp; auth</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let paras = parse_document_xml(xml).unwrap();
        assert_eq!(paras.len(), 2);
        assert_eq!(paras[0].heading_level(), Some(1));
        assert_eq!(paras[0].text, "Architecture");
        assert_eq!(paras[1].heading_level(), None);
        assert_eq!(paras[1].text, "Gateway & auth");
    }

    #[test]
    fn heading_level_variants() {
        let p = |style: &str| DocxParagraph {
            style: Some(style.to_string()),
            ..Default::default()
        };
        assert_eq!(p("heading 2").heading_level(), Some(2));
        assert_eq!(p("Title").heading_level(), Some(1));
        assert_eq!(p("3").heading_level(), Some(3));
        assert_eq!(p("Normal").heading_level(), None);
        let outlined = DocxParagraph {
            outline_level: Some(1),
            ..Default::default()
        };
        assert_eq!(outlined.heading_level(), Some(2));
    }

    #[test]
    fn column_index_from_reference() {
        assert_eq!(column_index("A1").unwrap(), Some(0));
        assert_eq!(column_index("C7").unwrap(), Some(2));
        assert_eq!(column_index("AB12").unwrap(), Some(27));
        assert_eq!(column_index("XFD1").unwrap(), Some(16_383));
        assert_eq!(column_index("12").unwrap(), None);
    }

    #[test]
    fn column_past_xfd_is_an_error() {
        assert!(matches!(column_index("XFE1"), Err(ExtractError::Ooxml(_))));
        assert!(matches!(column_index("ZZZZZZZZZZZZZZZZ1"), Err(ExtractError::Ooxml(_))));
    }

    #[test]
    fn sheet_with_oversized_reference_is_rejected() {
        let xml = br#"<worksheet><sheetData>
            <row r="1"><c r="ZZZZZZZ1"><v>1</v></c></row>
        </sheetData></worksheet>"#;
        assert!(matches!(parse_sheet_rows(xml, &[]), Err(ExtractError::Ooxml(_))));
    }

    #[test]
    fn sheet_rows_keep_positions_and_resolve_strings() {
        let shared = vec!["Module".to_string(), "Days".to_string(), "Auth".to_string()];
        let xml = br#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
            <row r="2"><c r="A2" t="s"><v>2</v></c><c r="C2"><v>3.5</v></c></row>
            <row r="3"><c r="B3" t="inlineStr"><is><t>note</t></is></c></row>
        </sheetData></worksheet>"#;
        let rows = parse_sheet_rows(xml, &shared).unwrap();
        assert_eq!(rows[0], vec!["Module", "Days"]);
        assert_eq!(rows[1], vec!["Auth", "", "3.5"]);
        assert_eq!(rows[2], vec!["", "note"]);
    }

    #[test]
    fn shared_strings_join_rich_runs() {
        let xml = br#"<sst><si><t>Plain</t></si><si><r><t>Ri</t></r><r><t>ch</t></r></si></sst>"#;
        let strings = parse_shared_strings(xml).unwrap();
        assert_eq!(strings, vec!["Plain", "Rich"]);
    }
}
