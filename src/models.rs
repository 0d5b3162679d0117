//! Core data models used throughout the generator.
//!
//! A [`Row`] is one bug report as read from the data source: an ordered
//! mapping of column name to [`CellValue`]. Rows carry no fixed schema; every
//! column is handed to the template as-is.

use std::fmt;

use thiserror::Error;

/// A single dynamically typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl CellValue {
    /// Type a raw field from a delimited file.
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return CellValue::Empty;
        }
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return CellValue::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return CellValue::from_number(f);
            }
        }
        match trimmed {
            "true" | "TRUE" | "True" => CellValue::Bool(true),
            "false" | "FALSE" | "False" => CellValue::Bool(false),
            _ => CellValue::Text(raw.to_string()),
        }
    }

    /// Spreadsheets store every number as a float; integral ones become `Int`.
    pub fn from_number(f: f64) -> Self {
        if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
            CellValue::Int(f as i64)
        } else {
            CellValue::Float(f)
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Interpret the cell as an integer-like row ID.
    pub fn as_id(&self) -> Option<i64> {
        match self {
            CellValue::Int(i) => Some(*i),
            CellValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            CellValue::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

/// Failure to read a required field from a row.
#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("row is missing required column '{0}'")]
    MissingColumn(String),
    #[error("column '{column}' holds '{value}', which is not an integer ID")]
    InvalidId { column: String, value: String },
}

/// One bug report: column name to value, in source column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, CellValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing an existing value of the same name.
    pub fn insert(&mut self, column: impl Into<String>, value: CellValue) {
        let column = column.into();
        match self.fields.iter_mut().find(|(k, _)| *k == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.fields
            .iter()
            .find(|(k, _)| k == column)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when every cell is empty (trailing spreadsheet rows).
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_empty())
    }

    /// The row's integer ID from `column`.
    pub fn id(&self, column: &str) -> Result<i64, RowError> {
        let value = self
            .get(column)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RowError::MissingColumn(column.to_string()))?;
        value.as_id().ok_or_else(|| RowError::InvalidId {
            column: column.to_string(),
            value: value.to_string(),
        })
    }

    /// The row's display name from `column`, unsanitized.
    pub fn name(&self, column: &str) -> Result<String, RowError> {
        self.get(column)
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
            .ok_or_else(|| RowError::MissingColumn(column.to_string()))
    }
}

impl FromIterator<(String, CellValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, CellValue)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

/// Trim, lower-case, and replace spaces (and path separators) with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

/// `<prefix>_<id>_<sanitized name>.<ext>`
pub fn output_file_name(prefix: &str, id: i64, name: &str, extension: &str) -> String {
    format!("{}_{}_{}.{}", prefix, id, sanitize_name(name), extension)
}
