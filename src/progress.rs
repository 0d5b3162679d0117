//! Per-row progress reporting for a processing pass.
//!
//! Reports what a pass is doing so users watching the terminal see each bug
//! report as it is generated. Human lines and JSON lines both go to
//! **stdout**; diagnostics stay on stderr through `tracing`.

use std::io::Write;
use std::path::Path;

/// A single progress event emitted by the pipeline.
#[derive(Clone, Debug)]
pub enum PassProgressEvent<'a> {
    /// A batch of rows was read and filtered against the checkpoint.
    BatchLoaded {
        batch: usize,
        rows: usize,
        eligible: usize,
    },
    /// About to render the document for this row.
    Rendering { id: i64 },
    /// The document was written.
    Rendered { id: i64, path: &'a Path },
    /// The document already existed.
    Skipped { id: i64, path: &'a Path },
}

/// Reports pass progress.
pub trait PassProgressReporter: Send + Sync {
    fn report(&self, event: PassProgressEvent<'_>);
}

/// Human-friendly lines: "working on id 12..".
pub struct HumanProgress;

impl PassProgressReporter for HumanProgress {
    fn report(&self, event: PassProgressEvent<'_>) {
        let line = match &event {
            PassProgressEvent::BatchLoaded {
                batch,
                rows,
                eligible,
            } => format!(
                "batch {}: {} rows read, {} new\n",
                batch,
                format_number(*rows as u64),
                format_number(*eligible as u64)
            ),
            PassProgressEvent::Rendering { id } => format!("working on id {}..\n", id),
            PassProgressEvent::Rendered { id, path } => format!(
                "ID:{} report created successfully ({})\n",
                id,
                file_name(path)
            ),
            PassProgressEvent::Skipped { id, path } => {
                format!("ID:{} already generated ({})\n", id, file_name(path))
            }
        };
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(line.as_bytes());
        let _ = out.flush();
    }
}

/// Machine-readable progress: one JSON object per line.
pub struct JsonProgress;

impl PassProgressReporter for JsonProgress {
    fn report(&self, event: PassProgressEvent<'_>) {
        let obj = match &event {
            PassProgressEvent::BatchLoaded {
                batch,
                rows,
                eligible,
            } => serde_json::json!({
                "event": "batch",
                "batch": batch,
                "rows": rows,
                "eligible": eligible
            }),
            PassProgressEvent::Rendering { id } => serde_json::json!({
                "event": "rendering",
                "id": id
            }),
            PassProgressEvent::Rendered { id, path } => serde_json::json!({
                "event": "rendered",
                "id": id,
                "path": path.display().to_string()
            }),
            PassProgressEvent::Skipped { id, path } => serde_json::json!({
                "event": "skipped",
                "id": id,
                "path": path.display().to_string()
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{}", line);
            let _ = out.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl PassProgressReporter for NoProgress {
    fn report(&self, _event: PassProgressEvent<'_>) {}
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human, or JSON.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stdout is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stdout) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn PassProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(HumanProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
