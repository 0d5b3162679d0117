//! `.docx` report rendering.
//!
//! A template is an ordinary Word document whose text contains
//! `{{ column }}` placeholders. Rendering copies the package entry by entry and
//! rewrites the text-bearing parts (body, headers, footers, notes), binding each
//! placeholder to the row value of the same name. Unknown names render empty.
//!
//! Word often splits typed text over several runs (`{{ Na` + `me }}`). Before
//! substitution each paragraph's run boundaries are shifted so that every
//! placeholder lives inside the run where it starts; runs a placeholder does
//! not touch keep their text and formatting.

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, BytesText, Event};
use regex::Regex;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::Config;
use crate::models::{output_file_name, Row, RowError};

/// Maximum decompressed bytes read from a single template part.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("placeholder pattern is valid"));

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid template: {0}")]
    Template(String),
    #[error(transparent)]
    Row(#[from] RowError),
}

fn template_err(e: impl std::fmt::Display) -> RenderError {
    RenderError::Template(e.to_string())
}

/// A loaded `.docx` template.
#[derive(Debug, Clone)]
pub struct Template {
    path: PathBuf,
    bytes: Vec<u8>,
    extension: String,
}

impl Template {
    /// Read and validate the template at `path`.
    pub fn open(path: &Path) -> Result<Self, RenderError> {
        let bytes = fs::read(path).map_err(|source| RenderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let template = Self::from_bytes(path, bytes)?;
        tracing::debug!(path = %path.display(), "template loaded");
        Ok(template)
    }

    pub fn from_bytes(path: &Path, bytes: Vec<u8>) -> Result<Self, RenderError> {
        let archive = ZipArchive::new(Cursor::new(bytes.as_slice())).map_err(template_err)?;
        if !archive.file_names().any(|n| n == "word/document.xml") {
            return Err(RenderError::Template(format!(
                "{} has no word/document.xml",
                path.display()
            )));
        }
        drop(archive);

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "docx".to_string());

        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            extension,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Extension given to rendered documents.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Render the template against `row`, returning the new package bytes.
    pub fn render_bytes(&self, row: &Row) -> Result<Vec<u8>, RenderError> {
        let mut archive =
            ZipArchive::new(Cursor::new(self.bytes.as_slice())).map_err(template_err)?;
        let mut out = ZipWriter::new(Cursor::new(Vec::new()));

        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(template_err)?;
            let name = entry.name().to_string();
            if !is_text_part(&name) {
                out.raw_copy_file(entry).map_err(template_err)?;
                continue;
            }

            let mut xml = Vec::new();
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut xml)
                .map_err(template_err)?;
            if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
                return Err(RenderError::Template(format!(
                    "{} exceeds size limit",
                    name
                )));
            }
            let rendered = render_part(&xml, row)?;

            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            out.start_file(name, options).map_err(template_err)?;
            out.write_all(&rendered).map_err(template_err)?;
        }

        Ok(out.finish().map_err(template_err)?.into_inner())
    }
}

fn is_text_part(name: &str) -> bool {
    let Some(file) = name.strip_prefix("word/") else {
        return false;
    };
    if file.contains('/') || !file.ends_with(".xml") {
        return false;
    }
    file == "document.xml"
        || file == "footnotes.xml"
        || file == "endnotes.xml"
        || file.starts_with("header")
        || file.starts_with("footer")
}

/// Substitute placeholders in `text` from `row`.
pub fn fill_placeholders(text: &str, row: &Row) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures<'_>| {
            row.get(&caps[1])
                .map(|v| v.to_string())
                .unwrap_or_default()
        })
        .into_owned()
}

fn is_local(name: &[u8], local: &[u8]) -> bool {
    name == local
}

/// Rewrite one XML part, rendering every paragraph (`<w:p>`, `<a:p>`).
fn render_part(xml: &[u8], row: &Row) -> Result<Vec<u8>, RenderError> {
    enum Step {
        Eof,
        OpenParagraph,
        CloseParagraph,
        Other,
    }

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut writer = quick_xml::Writer::new(Vec::with_capacity(xml.len()));
    let mut buf = Vec::new();
    // Open paragraphs, innermost last. Text boxes nest paragraphs.
    let mut stack: Vec<Vec<Event<'static>>> = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(template_err)?;
        let step = match &event {
            Event::Eof => Step::Eof,
            Event::Start(e) if is_local(e.local_name().as_ref(), b"p") => Step::OpenParagraph,
            Event::End(e) if is_local(e.local_name().as_ref(), b"p") && !stack.is_empty() => {
                Step::CloseParagraph
            }
            _ => Step::Other,
        };

        match step {
            Step::Eof => break,
            Step::OpenParagraph => stack.push(vec![event.into_owned()]),
            Step::CloseParagraph => {
                let mut paragraph = stack.pop().unwrap_or_default();
                paragraph.push(event.into_owned());
                let rendered = render_paragraph(paragraph, row);
                match stack.last_mut() {
                    Some(parent) => parent.extend(rendered),
                    None => {
                        for ev in rendered {
                            writer.write_event(ev).map_err(template_err)?;
                        }
                    }
                }
            }
            Step::Other => match stack.last_mut() {
                Some(paragraph) => paragraph.push(event.into_owned()),
                None => writer.write_event(event).map_err(template_err)?,
            },
        }
        buf.clear();
    }

    // Unbalanced markup: flush whatever is still buffered.
    for paragraph in stack {
        for ev in paragraph {
            writer.write_event(ev).map_err(template_err)?;
        }
    }

    Ok(writer.into_inner())
}

/// A text node of the paragraph and the `<t>` element that holds it.
struct Slot {
    start_idx: usize,
    text_idx: usize,
    text: String,
}

fn render_paragraph(mut events: Vec<Event<'static>>, row: &Row) -> Vec<Event<'static>> {
    let mut slots = Vec::new();
    let mut depth = 0usize;
    let mut open_t: Option<usize> = None;
    for (idx, event) in events.iter().enumerate() {
        match event {
            Event::Start(e) if is_local(e.local_name().as_ref(), b"p") => depth += 1,
            Event::End(e) if is_local(e.local_name().as_ref(), b"p") => {
                depth = depth.saturating_sub(1)
            }
            // Nested paragraphs were rendered on their own already.
            Event::Start(e) if depth == 1 && is_local(e.local_name().as_ref(), b"t") => {
                open_t = Some(idx)
            }
            Event::End(e) if is_local(e.local_name().as_ref(), b"t") => open_t = None,
            Event::Text(te) if depth == 1 => {
                if let Some(start_idx) = open_t {
                    let text = te
                        .unescape()
                        .map(|t| t.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(te).into_owned());
                    slots.push(Slot {
                        start_idx,
                        text_idx: idx,
                        text,
                    });
                }
            }
            _ => {}
        }
    }

    let joined: String = slots.iter().map(|s| s.text.as_str()).collect();
    if !PLACEHOLDER.is_match(&joined) {
        return events;
    }

    for (slot, text) in slots.iter().zip(realign(&slots, &joined)) {
        let rendered = fill_placeholders(&text, row);
        if rendered == slot.text {
            continue;
        }
        events[slot.text_idx] = Event::Text(BytesText::new(&rendered).into_owned());
        let preserved = match &events[slot.start_idx] {
            Event::Start(e) => Some(preserve_space(e)),
            _ => None,
        };
        if let Some(start) = preserved {
            events[slot.start_idx] = Event::Start(start);
        }
    }
    events
}

/// New per-slot texts such that no placeholder crosses a slot boundary.
/// The concatenation of the result always equals `joined`.
fn realign(slots: &[Slot], joined: &str) -> Vec<String> {
    let mut bounds = Vec::with_capacity(slots.len());
    let mut offset = 0;
    for slot in slots {
        bounds.push((offset, offset + slot.text.len()));
        offset += slot.text.len();
    }

    for m in PLACEHOLDER.find_iter(joined) {
        let Some(first) = bounds.iter().position(|&(s, e)| s <= m.start() && m.start() < e)
        else {
            continue;
        };
        let last = bounds
            .iter()
            .rposition(|&(s, e)| s < m.end() && m.end() <= e)
            .unwrap_or(first);
        if last <= first {
            continue;
        }
        bounds[first].1 = m.end();
        for b in &mut bounds[first + 1..last] {
            *b = (m.end(), m.end());
        }
        bounds[last].0 = m.end();
    }

    bounds
        .into_iter()
        .map(|(s, e)| joined[s..e].to_string())
        .collect()
}

/// Copy of a `<w:t>` start tag with `xml:space="preserve"`.
fn preserve_space(e: &BytesStart<'_>) -> BytesStart<'static> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() != b"xml:space" {
            out.push_attribute(attr);
        }
    }
    out.push_attribute(("xml:space", "preserve"));
    out
}

/// Result of rendering one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Written { id: i64, path: PathBuf },
    /// The target already existed; nothing was written.
    Skipped { id: i64, path: PathBuf },
}

impl RenderOutcome {
    pub fn path(&self) -> &Path {
        match self {
            RenderOutcome::Written { path, .. } | RenderOutcome::Skipped { path, .. } => path,
        }
    }
}

/// Columns and prefix used to name output documents.
#[derive(Debug, Clone)]
pub struct ReportNaming {
    pub file_prefix: String,
    pub id_column: String,
    pub name_column: String,
}

impl ReportNaming {
    pub fn from_config(config: &Config) -> Self {
        Self {
            file_prefix: config.output.file_prefix.clone(),
            id_column: config.dataset.id_column.clone(),
            name_column: config.dataset.name_column.clone(),
        }
    }
}

impl Default for ReportNaming {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Render `row` into `output_dir`, unless its document already exists.
pub fn render(
    row: &Row,
    template: &Template,
    output_dir: &Path,
    naming: &ReportNaming,
) -> Result<RenderOutcome, RenderError> {
    let id = row.id(&naming.id_column)?;
    let name = row.name(&naming.name_column)?;
    let file_name = output_file_name(&naming.file_prefix, id, &name, template.extension());
    let path = output_dir.join(file_name);

    if path.exists() {
        tracing::debug!(id, path = %path.display(), "output exists, skipping");
        return Ok(RenderOutcome::Skipped { id, path });
    }

    let bytes = template.render_bytes(row)?;
    write_atomically(&path, &bytes)?;
    Ok(RenderOutcome::Written { id, path })
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), RenderError> {
    let io_err = |source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    {
        let mut f = fs::File::create(&partial).map_err(io_err)?;
        f.write_all(bytes).map_err(io_err)?;
        f.sync_all().map_err(io_err)?;
    }
    fs::rename(&partial, path).map_err(io_err)
}
