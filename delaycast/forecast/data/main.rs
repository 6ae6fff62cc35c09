//! Loosely typed tables read from CSV uploads and workbook sheets.

/// Tolerant date parsing for schedule exports.
pub mod dates;
/// Reference workbook sources.
pub mod reference;

use std::{fmt, fs::File, io::Read, path::Path};

use chrono::NaiveDateTime;
use indexmap::IndexMap;

use crate::error::ForecastError;

/// Single cell value. Empty text and spreadsheet error cells become `Null`;
/// whitespace-only text is kept.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Missing value.
    Null,
    /// Text as read from the source.
    Text(String),
    /// Numeric value.
    Number(f64),
    /// Date or timestamp cell.
    Date(NaiveDateTime),
}

impl Cell {
    /// Wraps raw text, mapping the empty string to `Null`.
    #[must_use]
    pub fn from_text(raw: &str) -> Self {
        if raw.is_empty() {
            Self::Null
        } else {
            Self::Text(raw.to_string())
        }
    }

    /// Returns true for missing values.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Join key form: trimmed text, integral numbers without a fraction.
    /// Blank keys never match.
    #[must_use]
    pub fn as_key(&self) -> Option<String> {
        let key = match self {
            Self::Null => return None,
            Self::Text(text) => text.trim().to_string(),
            Self::Number(value) => format_number(*value),
            Self::Date(value) => value.format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        (!key.is_empty()).then_some(key)
    }

    /// Numeric reading of the cell. Text is parsed after stripping thousands
    /// separators; anything unparseable or non-finite is `None`.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) if value.is_finite() => Some(*value),
            Self::Text(text) => text
                .trim()
                .replace(',', "")
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite()),
            _ => None,
        }
    }

    /// Text reading of the cell, `None` when missing.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Text(text) => f.write_str(text),
            Self::Number(value) => f.write_str(&format_number(*value)),
            Self::Date(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

pub(crate) static NULL_CELL: Cell = Cell::Null;

#[allow(clippy::cast_possible_truncation)]
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Named table with a header row. Duplicate header names resolve to the
/// first occurrence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    name: String,
    headers: Vec<String>,
    index: IndexMap<String, usize>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Creates an empty table with the given headers (trimmed).
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let headers: Vec<String> = headers
            .into_iter()
            .map(|header| header.as_ref().trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        let mut index = IndexMap::new();
        for (position, header) in headers.iter().enumerate() {
            index.entry(header.clone()).or_insert(position);
        }
        Self {
            name: name.into(),
            headers,
            index,
            rows: Vec::new(),
        }
    }

    /// Appends a row, padding short rows with `Null` and truncating long ones.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.headers.len(), Cell::Null);
        self.rows.push(row);
    }

    /// Reads delimited text with a header row.
    pub fn from_csv_reader<R: Read>(name: &str, reader: R) -> Result<Self, ForecastError> {
        let csv_error = |source| ForecastError::Csv {
            table: name.to_string(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_reader(reader);
        let headers = reader.headers().map_err(csv_error)?.clone();
        let mut table = Self::new(name, headers.iter());
        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            table.push_row(record.iter().map(Cell::from_text).collect());
        }
        Ok(table)
    }

    /// Reads a CSV file from disk.
    pub fn from_csv_path(name: &str, path: impl AsRef<Path>) -> Result<Self, ForecastError> {
        let file = File::open(path.as_ref())?;
        Self::from_csv_reader(name, file)
    }

    /// Label used in error messages.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Header names in file order.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// All data rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table has no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, if present.
    #[must_use]
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    /// Position of a column the caller cannot proceed without.
    pub fn require_column(&self, column: &str) -> Result<usize, ForecastError> {
        self.column_index(column)
            .ok_or_else(|| ForecastError::missing_column(&self.name, column))
    }

    /// Cell at a row and column; out-of-range lookups read as `Null`.
    #[must_use]
    pub fn cell(&self, row: usize, column: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .unwrap_or(&NULL_CELL)
    }

    /// Groups row positions by the join key of `column`, preserving row order.
    #[must_use]
    pub fn key_index(&self, column: usize) -> IndexMap<String, Vec<usize>> {
        let mut groups: IndexMap<String, Vec<usize>> = IndexMap::new();
        for (position, row) in self.rows.iter().enumerate() {
            if let Some(key) = row.get(column).and_then(Cell::as_key) {
                groups.entry(key).or_default().push(position);
            }
        }
        groups
    }
}
