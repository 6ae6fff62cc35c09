use chrono::{Duration, NaiveDate, NaiveDateTime};

use super::Cell;

/// Formats tried, in order, when a date arrives as text. Primavera exports
/// use `dd-Mon-yy`; ISO covers re-saved sheets.
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%d-%b-%y %H:%M",
    "%d-%b-%y",
    "%d-%b-%Y %H:%M",
    "%d-%b-%Y",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y",
];

// Excel's 1900 date system, including the phantom 1900-02-29.
const EXCEL_EPOCH: (i32, u32, u32) = (1899, 12, 30);
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// Parses schedule dates without ever failing the caller: anything that
/// cannot be read becomes `None`.
#[derive(Debug, Clone)]
pub struct DateParser {
    formats: Vec<String>,
}

impl Default for DateParser {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMATS.iter().copied())
    }
}

impl DateParser {
    /// Creates a parser trying `formats` in order.
    #[must_use]
    pub fn new<I, S>(formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            formats: formats.into_iter().map(Into::into).collect(),
        }
    }

    /// Formats in the order they are tried.
    #[must_use]
    pub fn formats(&self) -> &[String] {
        &self.formats
    }

    /// Reads a date out of any cell. Numbers are Excel serial dates.
    #[must_use]
    pub fn parse_cell(&self, cell: &Cell) -> Option<NaiveDateTime> {
        match cell {
            Cell::Date(value) => Some(*value),
            Cell::Number(serial) => from_excel_serial(*serial),
            Cell::Text(text) => self.parse_str(text),
            Cell::Null => None,
        }
    }

    /// Parses text, ignoring the actual-date marker (` A`) and the
    /// constraint asterisk Primavera appends.
    #[must_use]
    pub fn parse_str(&self, raw: &str) -> Option<NaiveDateTime> {
        let text = strip_markers(raw);
        if text.is_empty() {
            return None;
        }
        self.formats.iter().find_map(|format| {
            NaiveDateTime::parse_from_str(text, format)
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(text, format)
                        .ok()
                        .and_then(|date| date.and_hms_opt(0, 0, 0))
                })
        })
    }
}

fn strip_markers(raw: &str) -> &str {
    let mut text = raw.trim().trim_end_matches('*').trim_end();
    if let Some(stripped) = text.strip_suffix(" A") {
        text = stripped.trim_end();
    }
    text
}

/// Converts an Excel serial day number to a timestamp.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn from_excel_serial(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 1.0 || serial > MAX_EXCEL_SERIAL {
        return None;
    }
    let (year, month, day) = EXCEL_EPOCH;
    let epoch = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
    let seconds = (serial * 86_400.0).round() as i64;
    epoch.checked_add_signed(Duration::seconds(seconds))
}

/// Whole days between two timestamps, floored toward negative infinity so a
/// finish a few hours early counts as a day early.
#[must_use]
pub fn floor_days(later: NaiveDateTime, earlier: NaiveDateTime) -> i64 {
    (later - earlier).num_seconds().div_euclid(86_400)
}
