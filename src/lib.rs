//! # Bug Report Generator
//!
//! Watches a spreadsheet of bug-report rows and renders one Word document per
//! new row from a `.docx` template. The highest ID already rendered is kept in
//! a small JSON checkpoint so reruns only pick up new rows.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │ Watcher  │──▶│  Loader  │──▶│ Renderer │──▶│  output/ │
//! │ debounce │   │ csv/xlsx │   │  .docx   │   │          │
//! └──────────┘   └──────────┘   └──────────┘   └──────────┘
//!       │                                            │
//!       └────────────── Checkpoint (state.json) ◀────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! bugreport                       # watch data/responses.xlsx
//! bugreport run                   # one pass, then exit
//! bugreport run --full --dry-run  # count rows, ignore the checkpoint
//! bugreport status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Rows, cell values, output file names |
//! | [`checkpoint`] | Last processed ID, written atomically |
//! | [`loader`] | Delimited and spreadsheet data sources |
//! | [`render`] | `.docx` placeholder rendering |
//! | [`pipeline`] | One processing pass |
//! | [`watcher`] | Debounced change watching |
//! | [`progress`] | Per-row progress output |
//! | [`status`] | `bugreport status` summary |

pub mod checkpoint;
pub mod config;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod status;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testutil;
