use std::io::Read;

use crate::loader::LoadError;
use crate::models::{CellValue, Row};

/// Lazily reads a delimited file in batches of at most `chunk_size` rows.
///
/// The header row names the columns. Short records are padded with
/// [`CellValue::Empty`]; extra fields are dropped.
pub struct DelimitedChunks<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    chunk_size: usize,
    record: csv::StringRecord,
    done: bool,
}

impl<R: Read> DelimitedChunks<R> {
    pub fn new(input: R, delimiter: u8, chunk_size: usize) -> Result<Self, LoadError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(input);

        let headers = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                if h.trim().is_empty() {
                    format!("column_{}", i + 1)
                } else {
                    h.to_string()
                }
            })
            .collect();

        Ok(Self {
            reader,
            headers,
            chunk_size: chunk_size.max(1),
            record: csv::StringRecord::new(),
            done: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn to_row(&self) -> Row {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let value = self
                    .record
                    .get(i)
                    .map(CellValue::parse)
                    .unwrap_or(CellValue::Empty);
                (h.clone(), value)
            })
            .collect()
    }
}

impl<R: Read> Iterator for DelimitedChunks<R> {
    type Item = Result<Vec<Row>, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut batch = Vec::with_capacity(self.chunk_size.min(1024));
        while batch.len() < self.chunk_size {
            match self.reader.read_record(&mut self.record) {
                Ok(true) => {
                    let row = self.to_row();
                    if !row.is_blank() {
                        batch.push(row);
                    }
                }
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}
