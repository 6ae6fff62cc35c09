use std::{
    fmt,
    fs::File,
    io::{Read, Write},
    path::Path,
    str::FromStr,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    data::Table,
    error::ForecastError,
    features::{ACTIVITY_ID, ACTIVITY_NAME},
};

/// Output status column.
pub const PREDICTED_STATUS: &str = "Predicted_Delay_Status";

/// Header of every prediction table, in order.
pub const PREDICTION_COLUMNS: [&str; 3] = [ACTIVITY_ID, ACTIVITY_NAME, PREDICTED_STATUS];

/// Binary delay label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DelayStatus {
    /// Score above the threshold.
    #[serde(rename = "Delayed")]
    Delayed,
    /// Score at or below the threshold.
    #[serde(rename = "On Time")]
    OnTime,
}

impl DelayStatus {
    /// Labels a model score. Scores strictly above `threshold` are delayed;
    /// NaN scores are on time.
    #[must_use]
    pub fn from_score(score: f64, threshold: f64) -> Self {
        if score > threshold {
            Self::Delayed
        } else {
            Self::OnTime
        }
    }

    /// Display label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Delayed => "Delayed",
            Self::OnTime => "On Time",
        }
    }
}

impl fmt::Display for DelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DelayStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Delayed" => Ok(Self::Delayed),
            "On Time" => Ok(Self::OnTime),
            other => Err(format!("unknown delay status `{other}`")),
        }
    }
}

/// Display treatment for a result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStyle {
    /// Green.
    OnTime,
    /// Red.
    Delayed,
    /// Uncolored: any status other than the two labels.
    Plain,
}

impl RowStyle {
    /// Style for a raw status cell.
    #[must_use]
    pub fn for_status(status: &str) -> Self {
        match status.parse::<DelayStatus>() {
            Ok(DelayStatus::OnTime) => Self::OnTime,
            Ok(DelayStatus::Delayed) => Self::Delayed,
            Err(_) => Self::Plain,
        }
    }
}

/// One output row. The status is kept as text so tables read back from disk
/// can carry values outside the two labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRow {
    /// Trimmed activity identifier.
    #[serde(rename = "Activity ID")]
    pub activity_id: String,
    /// Activity name as uploaded.
    #[serde(rename = "Activity Name")]
    pub activity_name: String,
    /// `Delayed`, `On Time`, or whatever a saved table held.
    #[serde(rename = "Predicted_Delay_Status")]
    pub predicted_delay_status: String,
}

impl PredictionRow {
    /// Builds a row from a typed label.
    #[must_use]
    pub fn new(
        activity_id: impl Into<String>,
        activity_name: impl Into<String>,
        status: DelayStatus,
    ) -> Self {
        Self {
            activity_id: activity_id.into(),
            activity_name: activity_name.into(),
            predicted_delay_status: status.label().to_string(),
        }
    }

    /// Typed label, `None` for unrecognized values.
    #[must_use]
    pub fn status(&self) -> Option<DelayStatus> {
        self.predicted_delay_status.parse().ok()
    }

    /// Presentation style for this row.
    #[must_use]
    pub fn style(&self) -> RowStyle {
        RowStyle::for_status(&self.predicted_delay_status)
    }
}

/// Label counts for summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    /// Rows labelled delayed.
    pub delayed: usize,
    /// Rows labelled on time.
    pub on_time: usize,
    /// Rows with any other value.
    pub other: usize,
}

/// Final prediction output, unique by activity identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PredictionTable {
    rows: Vec<PredictionRow>,
}

impl PredictionTable {
    /// Keeps the first row per identifier, preserving input order.
    #[must_use]
    pub fn from_rows(rows: impl IntoIterator<Item = PredictionRow>) -> Self {
        let mut unique: IndexMap<String, PredictionRow> = IndexMap::new();
        for row in rows {
            unique.entry(row.activity_id.clone()).or_insert(row);
        }
        Self {
            rows: unique.into_values().collect(),
        }
    }

    /// Rows in output order.
    #[must_use]
    pub fn rows(&self) -> &[PredictionRow] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no activity was predicted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row for an identifier.
    #[must_use]
    pub fn get(&self, activity_id: &str) -> Option<&PredictionRow> {
        self.rows.iter().find(|row| row.activity_id == activity_id)
    }

    /// Counts rows per label.
    #[must_use]
    pub fn summary(&self) -> StatusSummary {
        self.rows.iter().fold(StatusSummary::default(), |mut summary, row| {
            match row.status() {
                Some(DelayStatus::Delayed) => summary.delayed += 1,
                Some(DelayStatus::OnTime) => summary.on_time += 1,
                None => summary.other += 1,
            }
            summary
        })
    }

    /// Writes the three output columns as CSV, header included even when
    /// empty.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), ForecastError> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
        writer.write_record(PREDICTION_COLUMNS).map_err(ForecastError::Output)?;
        for row in &self.rows {
            writer.serialize(row).map_err(ForecastError::Output)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Pretty JSON array of rows.
    pub fn to_json(&self) -> Result<String, ForecastError> {
        Ok(serde_json::to_string_pretty(&self.rows)?)
    }

    /// Reads a saved prediction table. `Activity ID` and
    /// `Predicted_Delay_Status` are required; a missing name reads as empty.
    /// Rows are taken as saved, without deduplication.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self, ForecastError> {
        let table = Table::from_csv_reader("predictions", reader)?;
        let id = table.require_column(ACTIVITY_ID)?;
        let status = table.require_column(PREDICTED_STATUS)?;
        let name = table.column_index(ACTIVITY_NAME);
        let text =
            |row: usize, column: usize| table.cell(row, column).as_text().unwrap_or_default();
        let rows = (0..table.len())
            .map(|row| PredictionRow {
                activity_id: text(row, id),
                activity_name: name.map(|column| text(row, column)).unwrap_or_default(),
                predicted_delay_status: text(row, status),
            })
            .collect();
        Ok(Self { rows })
    }

    /// Reads a saved prediction table from disk.
    pub fn read_csv_path(path: impl AsRef<Path>) -> Result<Self, ForecastError> {
        Self::read_csv(File::open(path)?)
    }
}

impl<'a> IntoIterator for &'a PredictionTable {
    type Item = &'a PredictionRow;
    type IntoIter = std::slice::Iter<'a, PredictionRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
