//! Tabular data loading.
//!
//! The data source is chosen by file extension:
//!
//! | Extension | Variant | Read as |
//! |-----------|---------|---------|
//! | `csv`, `txt` | [`RowSource::Chunked`] | lazy batches of at most `chunk_size` rows, configured delimiter |
//! | `tsv` | [`RowSource::Chunked`] | as above, tab-delimited |
//! | `xlsx`, `xlsm` | [`RowSource::Table`] | the whole first worksheet in memory |
//!
//! Either way callers see the same thing: an iterator of row batches.

pub mod delimited;
pub mod xlsx;

use std::fs::File;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::DatasetConfig;
use crate::models::Row;

pub use delimited::DelimitedChunks;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read data file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed delimited data: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed spreadsheet: {0}")]
    Spreadsheet(String),
    #[error("unsupported data file extension: '{0}' (expected csv, txt, tsv, xlsx or xlsm)")]
    UnsupportedFormat(String),
}

/// How a data file is read, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Delimited { delimiter: u8 },
    Spreadsheet,
}

impl SourceFormat {
    pub fn detect(path: &Path, dataset: &DatasetConfig) -> Result<Self, LoadError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "txt" => Ok(SourceFormat::Delimited {
                delimiter: dataset.delimiter_byte(),
            }),
            "tsv" => Ok(SourceFormat::Delimited { delimiter: b'\t' }),
            "xlsx" | "xlsm" => Ok(SourceFormat::Spreadsheet),
            _ => Err(LoadError::UnsupportedFormat(ext)),
        }
    }
}

/// Rows from the data file, either streamed in chunks or fully loaded.
pub enum RowSource {
    Chunked(DelimitedChunks<File>),
    Table(Vec<Row>),
}

impl RowSource {
    pub fn is_chunked(&self) -> bool {
        matches!(self, RowSource::Chunked(_))
    }
}

impl IntoIterator for RowSource {
    type Item = Result<Vec<Row>, LoadError>;
    type IntoIter = Batches;

    fn into_iter(self) -> Batches {
        match self {
            RowSource::Chunked(chunks) => Batches::Chunked(chunks),
            RowSource::Table(rows) => Batches::Table(Some(rows)),
        }
    }
}

/// Iterator over row batches. A table yields exactly one batch.
pub enum Batches {
    Chunked(DelimitedChunks<File>),
    Table(Option<Vec<Row>>),
}

impl Iterator for Batches {
    type Item = Result<Vec<Row>, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Batches::Chunked(chunks) => chunks.next(),
            Batches::Table(rows) => rows.take().map(Ok),
        }
    }
}

/// Open the data file at `path`.
pub fn load(path: &Path, dataset: &DatasetConfig) -> Result<RowSource, LoadError> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };

    match SourceFormat::detect(path, dataset)? {
        SourceFormat::Delimited { delimiter } => {
            let file = File::open(path).map_err(io_err)?;
            let chunks = DelimitedChunks::new(file, delimiter, dataset.chunk_size)?;
            Ok(RowSource::Chunked(chunks))
        }
        SourceFormat::Spreadsheet => {
            let bytes = std::fs::read(path).map_err(io_err)?;
            Ok(RowSource::Table(xlsx::read_table(&bytes)?))
        }
    }
}
