//! Checkpoint and path overview.
//!
//! `bugreport status` prints where the generator reads and writes, the last
//! processed ID, and how many documents are in the output directory.

use anyhow::Result;
use chrono::{DateTime, Local};
use std::path::Path;

use crate::checkpoint::CheckpointStore;
use crate::config::Config;

/// Run the status command: read the checkpoint and print a summary.
pub fn run_status(config: &Config) -> Result<()> {
    let store = CheckpointStore::new(&config.paths.state_file);
    let last_id = store.load()?;

    let written_at = std::fs::metadata(store.path())
        .and_then(|m| m.modified())
        .ok()
        .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    let (documents, extension) = count_documents(config);

    println!("Bug Report Generator — Status");
    println!("=============================");
    println!();
    println!("  Data file:   {}", describe(&config.paths.data_file));
    println!("  Template:    {}", describe(&config.paths.template_file));
    println!("  Output dir:  {}", config.paths.output_dir.display());
    println!("  State file:  {}", config.paths.state_file.display());
    println!();
    println!("  Last processed ID: {}", last_id);
    println!("  Checkpoint saved:  {}", written_at);
    println!("  Documents ({}):    {}", extension, documents);

    Ok(())
}

fn describe(path: &Path) -> String {
    if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (missing)", path.display())
    }
}

/// Count files in the output directory carrying the configured prefix.
fn count_documents(config: &Config) -> (usize, String) {
    let extension = config
        .paths
        .template_file
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "docx".to_string());
    let prefix = format!("{}_", config.output.file_prefix);
    let suffix = format!(".{}", extension);

    let count = std::fs::read_dir(&config.paths.output_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    let name = e.file_name().to_string_lossy().into_owned();
                    name.starts_with(&prefix) && name.ends_with(&suffix)
                })
                .count()
        })
        .unwrap_or(0);

    (count, extension)
}
