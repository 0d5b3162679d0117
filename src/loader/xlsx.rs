//! Whole-table reader for `.xlsx` workbooks.
//!
//! Reads the first worksheet in tab order, treats its first non-blank row as
//! the header, and returns the remaining non-blank rows. Cell positions come
//! from the `r` reference so sparse rows stay aligned. Numbers whose cell
//! style carries a date format become `YYYY-MM-DD HH:MM:SS` text.

use std::collections::HashMap;
use std::io::Read;

use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};

use crate::loader::LoadError;
use crate::models::{CellValue, Row};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 200 * 1024 * 1024;

/// Highest zero-based column a worksheet may use (`XFD`).
const MAX_COLUMN: usize = 16_383;

/// Serial number of 9999-12-31, the last date Excel can show.
const MAX_DATE_SERIAL: f64 = 2_958_465.0;

const WORKBOOK: &str = "xl/workbook.xml";
const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn bad(e: impl std::fmt::Display) -> LoadError {
    LoadError::Spreadsheet(e.to_string())
}

pub fn read_table(bytes: &[u8]) -> Result<Vec<Row>, LoadError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(bad)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let date_styles = read_date_styles(&mut archive)?;
    let sheet = match first_sheet_in_tab_order(&mut archive)? {
        Some(part) => part,
        None => lowest_numbered_worksheet(&archive)
            .ok_or_else(|| bad("workbook contains no worksheets"))?,
    };
    let sheet_xml = read_zip_entry_bounded(&mut archive, &sheet, MAX_XML_ENTRY_BYTES)?;
    let grid = read_sheet_cells(&sheet_xml, &shared_strings, &date_styles)?;
    Ok(rows_from_grid(grid))
}

fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, LoadError> {
    let entry = archive.by_name(name).map_err(bad)?;
    let mut out = Vec::new();
    entry.take(max_bytes).read_to_end(&mut out).map_err(bad)?;
    if out.len() as u64 >= max_bytes {
        return Err(bad(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Value of the attribute whose local name is `key`, unescaped.
fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .map(|a| match a.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
        })
}

/// First `<name>` element in `xml` for which `pick` returns a value.
fn find_element<T>(
    xml: &[u8],
    name: &[u8],
    mut pick: impl FnMut(&BytesStart<'_>) -> Option<T>,
) -> Result<Option<T>, LoadError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == name => {
                if let Some(found) = pick(&e) {
                    return Ok(Some(found));
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(bad(e)),
            _ => {}
        }
        buf.clear();
    }
}

/// Part name of the first `<sheet>` listed in the workbook, resolved through
/// the workbook relationships. `None` when either part is missing or the
/// target does not exist in the package.
fn first_sheet_in_tab_order(archive: &mut Archive<'_>) -> Result<Option<String>, LoadError> {
    if !has_entry(archive, WORKBOOK) || !has_entry(archive, WORKBOOK_RELS) {
        return Ok(None);
    }
    let workbook = read_zip_entry_bounded(archive, WORKBOOK, MAX_XML_ENTRY_BYTES)?;
    let Some(rel_id) = find_element(&workbook, b"sheet", |e| attr_value(e, b"id"))? else {
        return Ok(None);
    };

    let rels = read_zip_entry_bounded(archive, WORKBOOK_RELS, MAX_XML_ENTRY_BYTES)?;
    let target = find_element(&rels, b"Relationship", |e| {
        if attr_value(e, b"Id").as_deref() == Some(rel_id.as_str()) {
            attr_value(e, b"Target")
        } else {
            None
        }
    })?;
    let Some(target) = target else {
        return Ok(None);
    };

    // Targets are relative to `xl/` unless they start at the package root.
    let part = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    };
    Ok(has_entry(archive, &part).then_some(part))
}

fn lowest_numbered_worksheet(archive: &Archive<'_>) -> Option<String> {
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

/// Per cell style (the `s` index into `cellXfs`), whether it formats a date.
#[derive(Debug, Default)]
struct DateStyles(Vec<bool>);

impl DateStyles {
    fn is_date(&self, style: usize) -> bool {
        self.0.get(style).copied().unwrap_or(false)
    }
}

/// Built-in number formats that display dates or times.
fn is_builtin_date_format(id: u32) -> bool {
    matches!(id, 14..=22 | 45..=47)
}

/// A custom format code is a date format when it uses a date or time token
/// outside quoted literals, bracketed sections, and escaped characters.
fn is_date_format_code(code: &str) -> bool {
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut skip_next = false;
    for c in code.chars() {
        if skip_next {
            skip_next = false;
            continue;
        }
        match c {
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => {}
            '[' => in_brackets = true,
            ']' => in_brackets = false,
            _ if in_brackets => {}
            '\\' | '_' | '*' => skip_next = true,
            'y' | 'Y' | 'm' | 'M' | 'd' | 'D' | 'h' | 'H' | 's' | 'S' => return true,
            _ => {}
        }
    }
    false
}

fn read_date_styles(archive: &mut Archive<'_>) -> Result<DateStyles, LoadError> {
    if !has_entry(archive, "xl/styles.xml") {
        return Ok(DateStyles::default());
    }
    let xml = read_zip_entry_bounded(archive, "xl/styles.xml", MAX_XML_ENTRY_BYTES)?;

    let mut custom: HashMap<u32, bool> = HashMap::new();
    let mut xf_formats: Vec<u32> = Vec::new();
    let mut in_cell_xfs = false;
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = false,
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"numFmt" => {
                    let id = attr_value(&e, b"numFmtId").and_then(|v| v.parse().ok());
                    let code = attr_value(&e, b"formatCode").unwrap_or_default();
                    if let Some(id) = id {
                        custom.insert(id, is_date_format_code(&code));
                    }
                }
                // `cellStyleXfs` also holds `<xf>`; cells index only `cellXfs`.
                b"xf" if in_cell_xfs => {
                    let id = attr_value(&e, b"numFmtId")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    xf_formats.push(id);
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(bad(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(DateStyles(
        xf_formats
            .into_iter()
            .map(|id| {
                custom
                    .get(&id)
                    .copied()
                    .unwrap_or_else(|| is_builtin_date_format(id))
            })
            .collect(),
    ))
}

/// Render a 1900-system date serial. `None` outside the range Excel can show.
fn serial_to_datetime(serial: f64) -> Option<String> {
    if !(0.0..MAX_DATE_SERIAL + 1.0).contains(&serial) {
        return None;
    }
    // Excel counts a 1900-02-29 that never existed.
    let serial = if serial > 0.0 && serial < 60.0 {
        serial + 1.0
    } else {
        serial
    };
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let seconds = (serial * 86_400.0).round() as i64;
    let stamp = epoch.checked_add_signed(chrono::Duration::seconds(seconds))?;
    Some(stamp.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Shared string table. Rich-text entries concatenate their runs; phonetic
/// hints (`rPh`) are skipped. A workbook without strings has no table.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, LoadError> {
    if !archive
        .file_names()
        .any(|n| n == "xl/sharedStrings.xml")
    {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_t = !in_phonetic,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(bad)?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(bad(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell type attribute (`t`) of a `<c>` element.
#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Number,
    Shared,
    Inline,
    FormulaString,
    Bool,
    Error,
}

impl CellKind {
    fn from_attr(value: &[u8]) -> Self {
        match value {
            b"s" => CellKind::Shared,
            b"inlineStr" => CellKind::Inline,
            b"str" => CellKind::FormulaString,
            b"b" => CellKind::Bool,
            b"e" => CellKind::Error,
            _ => CellKind::Number,
        }
    }
}

/// Zero-based column index from a reference like `AB12`. `None` when the
/// reference has no column letters; an error past column `XFD`.
fn column_index(reference: &str) -> Result<Option<usize>, LoadError> {
    let mut idx = 0usize;
    let mut seen = false;
    for b in reference.bytes().take_while(u8::is_ascii_alphabetic) {
        seen = true;
        idx = idx
            .checked_mul(26)
            .and_then(|i| i.checked_add((b.to_ascii_uppercase() - b'A' + 1) as usize))
            .filter(|&i| i <= MAX_COLUMN + 1)
            .ok_or_else(|| bad(format!("cell reference {} is beyond column XFD", reference)))?;
    }
    Ok(seen.then(|| idx - 1))
}

/// Position, type, and style index of a `<c>` element.
struct CellStart {
    col: usize,
    kind: CellKind,
    style: usize,
}

fn cell_start(e: &BytesStart<'_>, next_col: usize) -> Result<CellStart, LoadError> {
    let mut cell = CellStart {
        col: next_col,
        kind: CellKind::Number,
        style: 0,
    };
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"r" => {
                if let Some(c) = column_index(&String::from_utf8_lossy(&attr.value))? {
                    cell.col = c;
                }
            }
            b"t" => cell.kind = CellKind::from_attr(&attr.value),
            b"s" => {
                cell.style = String::from_utf8_lossy(&attr.value)
                    .trim()
                    .parse()
                    .unwrap_or(0)
            }
            _ => {}
        }
    }
    if cell.col > MAX_COLUMN {
        return Err(bad("row has cells beyond column XFD"));
    }
    Ok(cell)
}

fn cell_value(kind: CellKind, raw: &str, is_date: bool, shared_strings: &[String]) -> CellValue {
    match kind {
        CellKind::Shared => raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i))
            .map(|s| CellValue::Text(s.clone()))
            .unwrap_or(CellValue::Empty),
        CellKind::Inline | CellKind::FormulaString => CellValue::Text(raw.to_string()),
        CellKind::Bool => CellValue::Bool(raw.trim() == "1"),
        CellKind::Error => CellValue::Empty,
        CellKind::Number => match raw.trim().parse::<f64>() {
            Ok(f) if is_date => serial_to_datetime(f)
                .map(CellValue::Text)
                .unwrap_or_else(|| CellValue::from_number(f)),
            Ok(f) => CellValue::from_number(f),
            Err(_) if raw.trim().is_empty() => CellValue::Empty,
            Err(_) => CellValue::Text(raw.to_string()),
        },
    }
}

/// Parse a worksheet into rows of `(column index, value)` pairs.
fn read_sheet_cells(
    xml: &[u8],
    shared_strings: &[String],
    date_styles: &DateStyles,
) -> Result<Vec<Vec<(usize, CellValue)>>, LoadError> {
    let mut grid = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row: Vec<(usize, CellValue)> = Vec::new();
    let mut cell: Option<CellStart> = None;
    let mut text = String::new();
    let mut capture = false;
    let mut next_col = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row.clear();
                    next_col = 0;
                }
                b"c" => {
                    cell = Some(cell_start(&e, next_col)?);
                    text.clear();
                }
                // `<v>` holds the value; `<t>` inside `<is>` holds an inline string.
                b"v" | b"t" if cell.is_some() => capture = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"c" => {
                next_col = cell_start(&e, next_col)?.col + 1;
            }
            Ok(Event::Text(te)) if capture => {
                text.push_str(&te.unescape().map_err(bad)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    if let Some(start) = cell.take() {
                        let is_date = date_styles.is_date(start.style);
                        let value = cell_value(start.kind, &text, is_date, shared_strings);
                        if !value.is_empty() {
                            row.push((start.col, value));
                        }
                        next_col = start.col + 1;
                    }
                }
                b"row" => grid.push(std::mem::take(&mut row)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(bad(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(grid)
}

fn rows_from_grid(grid: Vec<Vec<(usize, CellValue)>>) -> Vec<Row> {
    let mut non_blank = grid.into_iter().filter(|cells| !cells.is_empty());
    let Some(header_cells) = non_blank.next() else {
        return Vec::new();
    };
    let data: Vec<_> = non_blank.collect();

    let width = header_cells
        .iter()
        .chain(data.iter().flatten())
        .map(|(c, _)| c + 1)
        .max()
        .unwrap_or(0);

    let mut headers: Vec<String> = (0..width).map(|i| format!("column_{}", i + 1)).collect();
    for (col, value) in header_cells {
        let name = value.to_string();
        if !name.trim().is_empty() {
            headers[col] = name;
        }
    }

    data.into_iter()
        .map(|cells| {
            let mut values = vec![CellValue::Empty; width];
            for (col, value) in cells {
                values[col] = value;
            }
            headers.iter().cloned().zip(values).collect::<Row>()
        })
        .collect()
}
