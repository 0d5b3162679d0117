//! Processing pass orchestration.
//!
//! One pass: checkpoint → load rows → filter by ID → render → save checkpoint.
//! The checkpoint is written once, after every batch has been rendered, so a
//! failure anywhere in the pass leaves it where the pass started.

use anyhow::{Context, Result};

use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::loader;
use crate::models::{Row, RowError};
use crate::progress::{PassProgressEvent, PassProgressReporter};
use crate::render::{self, RenderOutcome, ReportNaming, Template};

#[derive(Debug, Clone, Copy, Default)]
pub struct PassOptions {
    /// Ignore the checkpoint when filtering. Existing documents are still skipped.
    pub full: bool,
    /// Count eligible rows without writing documents or the checkpoint.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub batches: usize,
    pub rows_read: usize,
    pub eligible: usize,
    pub written: usize,
    pub skipped: usize,
    pub previous_checkpoint: i64,
    pub checkpoint: i64,
    pub dry_run: bool,
}

/// Keep rows whose ID is greater than `after`, paired with that ID.
///
/// Every row must carry a valid ID; one bad row fails the whole batch.
pub fn filter_new_rows(
    rows: Vec<Row>,
    id_column: &str,
    after: Option<i64>,
) -> Result<Vec<(i64, Row)>, RowError> {
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id(id_column)?;
        if after.map_or(true, |last| id > last) {
            kept.push((id, row));
        }
    }
    Ok(kept)
}

pub fn run_pass(
    config: &Config,
    options: PassOptions,
    progress: &dyn PassProgressReporter,
) -> Result<PassSummary> {
    let store = CheckpointStore::new(&config.paths.state_file);
    let last_id = store.load()?;
    let after = if options.full { None } else { Some(last_id) };

    let template = Template::open(&config.paths.template_file).with_context(|| {
        format!(
            "Failed to load template: {}",
            config.paths.template_file.display()
        )
    })?;
    let naming = ReportNaming::from_config(config);
    let output_dir = &config.paths.output_dir;
    if !options.dry_run {
        std::fs::create_dir_all(output_dir).with_context(|| {
            format!("Failed to create output directory: {}", output_dir.display())
        })?;
    }

    let source = loader::load(&config.paths.data_file, &config.dataset).with_context(|| {
        format!("Failed to load data: {}", config.paths.data_file.display())
    })?;
    tracing::info!(
        data = %config.paths.data_file.display(),
        chunked = source.is_chunked(),
        last_processed_id = last_id,
        "pass started"
    );

    let mut summary = PassSummary {
        previous_checkpoint: last_id,
        dry_run: options.dry_run,
        ..PassSummary::default()
    };
    let mut max_seen = last_id;

    for (batch_idx, batch) in source.into_iter().enumerate() {
        let batch = batch?;
        let rows_read = batch.len();
        let eligible = filter_new_rows(batch, &naming.id_column, after)
            .with_context(|| format!("Invalid row in batch {}", batch_idx + 1))?;

        summary.batches += 1;
        summary.rows_read += rows_read;
        summary.eligible += eligible.len();
        progress.report(PassProgressEvent::BatchLoaded {
            batch: batch_idx + 1,
            rows: rows_read,
            eligible: eligible.len(),
        });

        for (id, row) in eligible {
            max_seen = max_seen.max(id);
            if options.dry_run {
                continue;
            }

            progress.report(PassProgressEvent::Rendering { id });
            let outcome = render::render(&row, &template, output_dir, &naming)
                .with_context(|| format!("Failed to render report for ID {}", id))?;
            match &outcome {
                RenderOutcome::Written { path, .. } => {
                    summary.written += 1;
                    progress.report(PassProgressEvent::Rendered { id, path });
                }
                RenderOutcome::Skipped { path, .. } => {
                    summary.skipped += 1;
                    progress.report(PassProgressEvent::Skipped { id, path });
                }
            }
        }
    }

    summary.checkpoint = max_seen;
    if !options.dry_run {
        store.save(summary.checkpoint)?;
    }

    tracing::info!(
        written = summary.written,
        skipped = summary.skipped,
        checkpoint = summary.checkpoint,
        "pass finished"
    );
    Ok(summary)
}

pub fn print_summary(summary: &PassSummary) {
    if summary.dry_run {
        println!("pass (dry-run)");
        println!("  rows read: {}", summary.rows_read);
        println!("  new rows: {}", summary.eligible);
        println!(
            "  checkpoint would be: {} -> {}",
            summary.previous_checkpoint, summary.checkpoint
        );
        return;
    }

    println!("pass complete");
    println!("  batches: {}", summary.batches);
    println!("  rows read: {}", summary.rows_read);
    println!("  new rows: {}", summary.eligible);
    println!("  reports written: {}", summary.written);
    println!("  already present: {}", summary.skipped);
    println!(
        "  checkpoint: {} -> {}",
        summary.previous_checkpoint, summary.checkpoint
    );
    println!("All bug reports generated successfully.");
}
