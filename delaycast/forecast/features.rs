use std::io::Write;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::{
    artifacts::encoder::CategoryEncoder,
    data::{
        dates::{floor_days, DateParser},
        reference::ReferenceData,
        Cell, Table, NULL_CELL,
    },
    error::ForecastError,
};

/// Upload identifier column.
pub const ACTIVITY_ID: &str = "Activity ID";
/// Upload display name column.
pub const ACTIVITY_NAME: &str = "Activity Name";
/// Task sheet join key.
pub const TASK_CODE: &str = "task_code";
/// Dependency sheet join key.
pub const TASK_ID: &str = "task_id";
/// Task sheet categorical status.
pub const STATUS_CODE: &str = "status_code";
/// Comma-separated predecessor codes.
pub const PRED_LIST: &str = "pred_list";
/// Comma-separated successor codes.
pub const SUCC_LIST: &str = "succ_list";
/// Planned duration in days.
pub const ORIGINAL_DURATION: &str = "Original Duration";
/// Outstanding duration in days.
pub const REMAINING_DURATION: &str = "Remaining Duration";
/// Schedule slack in days.
pub const TOTAL_FLOAT: &str = "Total Float";
/// Derived predecessor count.
pub const PREDECESSOR_COUNT: &str = "Predecessor_Count";
/// Derived successor count.
pub const SUCCESSOR_COUNT: &str = "Successor_Count";
/// Derived finish slip in days.
pub const DELAY_DURATION: &str = "Delay_Duration";
/// Planned start.
pub const BASELINE_START: &str = "Baseline Start";
/// Planned finish.
pub const BASELINE_FINISH: &str = "Baseline Finish";
/// Actual or forecast start.
pub const START: &str = "Start";
/// Actual or forecast finish.
pub const FINISH: &str = "Finish";
/// Relationship start date.
pub const START_DATE: &str = "start_date";
/// Relationship end date.
pub const END_DATE: &str = "end_date";

/// Date-bearing columns, parsed wherever they appear.
pub const DATE_COLUMNS: [&str; 6] = [
    BASELINE_START,
    BASELINE_FINISH,
    START,
    FINISH,
    START_DATE,
    END_DATE,
];

/// Columns the scaler standardizes, in scaler order.
pub const SCALED_FEATURES: [&str; 6] = [
    ORIGINAL_DURATION,
    REMAINING_DURATION,
    TOTAL_FLOAT,
    PREDECESSOR_COUNT,
    SUCCESSOR_COUNT,
    DELAY_DURATION,
];

/// Columns the model scores: the scaled set without `Delay_Duration`.
pub const MODEL_FEATURES: [&str; 5] = [
    ORIGINAL_DURATION,
    REMAINING_DURATION,
    TOTAL_FLOAT,
    PREDECESSOR_COUNT,
    SUCCESSOR_COUNT,
];

/// Parsed schedule dates for one activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleDates {
    /// Planned start.
    pub baseline_start: Option<NaiveDateTime>,
    /// Planned finish.
    pub baseline_finish: Option<NaiveDateTime>,
    /// Actual start.
    pub start: Option<NaiveDateTime>,
    /// Actual finish.
    pub finish: Option<NaiveDateTime>,
    /// Relationship start.
    pub start_date: Option<NaiveDateTime>,
    /// Relationship end.
    pub end_date: Option<NaiveDateTime>,
}

impl ScheduleDates {
    fn from_array(values: [Option<NaiveDateTime>; 6]) -> Self {
        let [baseline_start, baseline_finish, start, finish, start_date, end_date] = values;
        Self {
            baseline_start,
            baseline_finish,
            start,
            finish,
            start_date,
            end_date,
        }
    }

    const fn as_array(&self) -> [Option<NaiveDateTime>; 6] {
        [
            self.baseline_start,
            self.baseline_finish,
            self.start,
            self.finish,
            self.start_date,
            self.end_date,
        ]
    }
}

/// Engineered row for one matched activity. Join keys, names of related
/// tasks, and WBS bookkeeping are not carried.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    /// Trimmed identifier.
    pub activity_id: String,
    /// Name from the upload.
    pub activity_name: Option<String>,
    /// Encoded `status_code`; `None` when absent or unknown to the encoder.
    pub status_code: Option<u32>,
    /// Planned duration, 0 when missing.
    pub original_duration: f64,
    /// Remaining duration, 0 when missing.
    pub remaining_duration: f64,
    /// Total float, 0 when missing.
    pub total_float: f64,
    /// Number of predecessors.
    pub predecessor_count: u32,
    /// Number of successors.
    pub successor_count: u32,
    /// Finish minus baseline finish in whole days.
    pub delay_duration: Option<i64>,
    /// 1 when `delay_duration` is positive.
    #[serde(skip)]
    pub delay_status: u8,
    /// Parsed dates.
    pub dates: ScheduleDates,
}

impl FeatureRow {
    /// Values in `SCALED_FEATURES` order.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn numeric_features(&self) -> [Option<f64>; 6] {
        [
            Some(self.original_duration),
            Some(self.remaining_duration),
            Some(self.total_float),
            Some(f64::from(self.predecessor_count)),
            Some(f64::from(self.successor_count)),
            self.delay_duration.map(|days| days as f64),
        ]
    }
}

/// How `status_code` was encoded for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEncoding {
    /// Mapping shipped with the model.
    Persisted,
    /// Mapping fitted over this upload's values.
    FittedPerCall,
    /// The task sheet has no `status_code` column.
    NotPresent,
}

/// Row counts collected while building a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    /// Upload rows read.
    pub input_rows: usize,
    /// Rows after both left joins.
    pub joined_rows: usize,
    /// Joined rows dropped for lacking a task match.
    pub unmatched_rows: usize,
    /// Rows whose status the encoder did not know.
    pub unknown_status: usize,
    /// Encoding applied to `status_code`.
    pub encoding: StatusEncoding,
}

/// Feature rows ready for scaling, in upload order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    /// Matched, engineered rows.
    pub rows: Vec<FeatureRow>,
    /// Counts for logging.
    pub stats: FrameStats,
}

impl FeatureFrame {
    /// Writes the frame as CSV with pipeline column names.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), ForecastError> {
        let mut writer = csv::Writer::from_writer(writer);
        let mut header = vec![ACTIVITY_ID, ACTIVITY_NAME, STATUS_CODE];
        header.extend(SCALED_FEATURES);
        header.extend(DATE_COLUMNS);
        writer.write_record(&header).map_err(ForecastError::Output)?;
        for row in &self.rows {
            let mut record = vec![
                row.activity_id.clone(),
                row.activity_name.clone().unwrap_or_default(),
                optional(row.status_code),
            ];
            record.extend(row.numeric_features().iter().map(|value| optional(*value)));
            record.extend(row.dates.as_array().iter().map(|value| {
                value.map_or_else(String::new, |date| date.format("%Y-%m-%d %H:%M:%S").to_string())
            }));
            writer.write_record(&record).map_err(ForecastError::Output)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(String::new, |value| value.to_string())
}

/// Column positions the join and derivations read.
struct TaskColumns {
    code: usize,
    status: Option<usize>,
    original: usize,
    remaining: usize,
    total_float: usize,
}

impl TaskColumns {
    fn resolve(tasks: &Table) -> Result<Self, ForecastError> {
        tasks.require_column(BASELINE_FINISH)?;
        tasks.require_column(FINISH)?;
        Ok(Self {
            code: tasks.require_column(TASK_CODE)?,
            status: tasks.column_index(STATUS_CODE),
            original: tasks.require_column(ORIGINAL_DURATION)?,
            remaining: tasks.require_column(REMAINING_DURATION)?,
            total_float: tasks.require_column(TOTAL_FLOAT)?,
        })
    }
}

struct DependencyColumns {
    id: usize,
    pred: usize,
    succ: usize,
}

impl DependencyColumns {
    fn resolve(dependencies: &Table) -> Result<Self, ForecastError> {
        Ok(Self {
            id: dependencies.require_column(TASK_ID)?,
            pred: dependencies.require_column(PRED_LIST)?,
            succ: dependencies.require_column(SUCC_LIST)?,
        })
    }
}

/// Upload column positions.
#[derive(Debug, Clone, Copy)]
pub struct UploadColumns {
    /// `Activity ID` position.
    pub id: usize,
    /// `Activity Name` position.
    pub name: usize,
}

/// Joins uploads with the reference schedule and derives feature rows.
#[derive(Debug, Clone, Default)]
pub struct FeatureBuilder {
    dates: DateParser,
}

impl FeatureBuilder {
    /// Creates a builder reading text dates with `dates`.
    #[must_use]
    pub const fn new(dates: DateParser) -> Self {
        Self { dates }
    }

    /// Checks the upload carries the identifier and name columns.
    pub fn check_upload(upload: &Table) -> Result<UploadColumns, ForecastError> {
        Ok(UploadColumns {
            id: upload.require_column(ACTIVITY_ID)?,
            name: upload.require_column(ACTIVITY_NAME)?,
        })
    }

    /// Checks both sheets carry the join keys and derivation inputs.
    pub fn check_reference(reference: &ReferenceData) -> Result<(), ForecastError> {
        TaskColumns::resolve(&reference.tasks)?;
        DependencyColumns::resolve(&reference.dependencies)?;
        Ok(())
    }

    /// Left-joins the upload to both sheets, derives delay and dependency
    /// features, drops rows without a task match, imputes, and encodes
    /// `status_code`. With no persisted `encoder` the codes are fitted over
    /// this upload alone.
    pub fn build(
        &self,
        upload: &Table,
        reference: &ReferenceData,
        encoder: Option<&CategoryEncoder>,
    ) -> Result<FeatureFrame, ForecastError> {
        let columns = Self::check_upload(upload)?;
        let task_columns = TaskColumns::resolve(&reference.tasks)?;
        let dependency_columns = DependencyColumns::resolve(&reference.dependencies)?;
        if let Some(encoder) = encoder {
            if encoder.column != STATUS_CODE {
                return Err(ForecastError::InvalidArtifact {
                    artifact: "encoder",
                    reason: format!("encodes `{}`, expected `{STATUS_CODE}`", encoder.column),
                });
            }
        }

        let task_index = reference.tasks.key_index(task_columns.code);
        let dependency_index = reference.dependencies.key_index(dependency_columns.id);

        let mut joined_rows = 0;
        let mut unmatched_rows = 0;
        let mut drafts: Vec<(FeatureRow, Option<String>)> = Vec::new();
        for row in 0..upload.len() {
            let key = upload.cell(row, columns.id).as_key();
            let name = upload.cell(row, columns.name).as_text();
            let tasks = matches(key.as_deref().and_then(|key| task_index.get(key)));
            let dependencies = matches(key.as_deref().and_then(|key| dependency_index.get(key)));
            for task in &tasks {
                for dependency in &dependencies {
                    joined_rows += 1;
                    match (&key, task) {
                        (Some(key), Some(task)) => drafts.push(self.derive(
                            reference,
                            &task_columns,
                            &dependency_columns,
                            key,
                            name.clone(),
                            *task,
                            *dependency,
                        )),
                        _ => unmatched_rows += 1,
                    }
                }
            }
        }

        let (encoding, fitted) = match (task_columns.status, encoder) {
            (None, _) => (StatusEncoding::NotPresent, None),
            (Some(_), Some(_)) => (StatusEncoding::Persisted, None),
            (Some(_), None) => (
                StatusEncoding::FittedPerCall,
                Some(CategoryEncoder::fit(
                    STATUS_CODE,
                    drafts.iter().filter_map(|(_, status)| status.as_deref()),
                )),
            ),
        };
        let active = encoder.or(fitted.as_ref());
        let mut unknown_status = 0;
        let rows = drafts
            .into_iter()
            .map(|(mut row, status)| {
                if let (Some(encoder), Some(status)) = (active, status.as_deref()) {
                    row.status_code = encoder.encode(status);
                    if row.status_code.is_none() {
                        unknown_status += 1;
                    }
                }
                row
            })
            .collect();

        Ok(FeatureFrame {
            rows,
            stats: FrameStats {
                input_rows: upload.len(),
                joined_rows,
                unmatched_rows,
                unknown_status,
                encoding,
            },
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn derive(
        &self,
        reference: &ReferenceData,
        task_columns: &TaskColumns,
        dependency_columns: &DependencyColumns,
        key: &str,
        name: Option<String>,
        task: usize,
        dependency: Option<usize>,
    ) -> (FeatureRow, Option<String>) {
        let tasks = &reference.tasks;
        let dependencies = &reference.dependencies;
        let dependency_cell = |column: usize| {
            dependency.map_or(&NULL_CELL, |row| dependencies.cell(row, column))
        };

        let dates = ScheduleDates::from_array(DATE_COLUMNS.map(|column| {
            if let Some(position) = tasks.column_index(column) {
                self.dates.parse_cell(tasks.cell(task, position))
            } else {
                let position = dependencies.column_index(column)?;
                self.dates.parse_cell(dependency_cell(position))
            }
        }));
        let delay_duration = match (dates.finish, dates.baseline_finish) {
            (Some(finish), Some(baseline)) => Some(floor_days(finish, baseline)),
            _ => None,
        };

        let number = |column: usize| tasks.cell(task, column).as_number().unwrap_or(0.0);
        let row = FeatureRow {
            activity_id: key.to_string(),
            activity_name: name,
            status_code: None,
            original_duration: number(task_columns.original),
            remaining_duration: number(task_columns.remaining),
            total_float: number(task_columns.total_float),
            predecessor_count: count_tokens(dependency_cell(dependency_columns.pred)),
            successor_count: count_tokens(dependency_cell(dependency_columns.succ)),
            delay_duration,
            delay_status: u8::from(delay_duration.is_some_and(|days| days > 0)),
            dates,
        };
        let status = task_columns
            .status
            .and_then(|column| tasks.cell(task, column).as_key());
        (row, status)
    }
}

fn matches(rows: Option<&Vec<usize>>) -> Vec<Option<usize>> {
    match rows {
        Some(rows) if !rows.is_empty() => rows.iter().copied().map(Some).collect(),
        _ => vec![None],
    }
}

/// Number of comma-separated fields in a list cell, empty fields included,
/// so `"A1,"` counts 2 and `" "` counts 1. Missing lists count as zero.
#[must_use]
pub fn count_tokens(cell: &Cell) -> u32 {
    cell.as_text().map_or(0, |list| {
        u32::try_from(list.split(',').count()).unwrap_or(u32::MAX)
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    fn text(value: &str) -> Cell {
        Cell::from_text(value)
    }

    /// Reference schedule with four tasks:
    /// A100 finishes 5 days late with 8 days float, A300 is early, A400 has
    /// no dates, A500 has a malformed finish.
    pub fn reference() -> ReferenceData {
        let mut tasks = Table::new(
            "TASK",
            [
                TASK_CODE,
                "task_name",
                STATUS_CODE,
                ORIGINAL_DURATION,
                REMAINING_DURATION,
                TOTAL_FLOAT,
                BASELINE_START,
                BASELINE_FINISH,
                START,
                FINISH,
                "wbs_id",
            ],
        );
        tasks.push_row(vec![
            text(" A100 "),
            text("Pour slab"),
            text("TK_Active"),
            Cell::Number(10.0),
            Cell::Number(4.0),
            Cell::Number(8.0),
            text("2024-10-01"),
            text("2024-10-10"),
            text("2024-10-01"),
            text("2024-10-15"),
            text("WBS-1"),
        ]);
        tasks.push_row(vec![
            text("A300"),
            text("Cure slab"),
            text("TK_Complete"),
            Cell::Number(3.0),
            Cell::Number(0.0),
            Cell::Number(2.0),
            text("01-Oct-24"),
            text("04-Oct-24"),
            text("01-Oct-24 A"),
            text("03-Oct-24 A"),
            text("WBS-1"),
        ]);
        tasks.push_row(vec![
            text("A400"),
            text("Strip forms"),
            text("TK_NotStart"),
            Cell::Null,
            text("n/a"),
            Cell::Null,
            Cell::Null,
            Cell::Null,
            Cell::Null,
            Cell::Null,
            text("WBS-2"),
        ]);
        tasks.push_row(vec![
            text("A500"),
            text("Backfill"),
            text("TK_Suspended"),
            Cell::Number(6.0),
            Cell::Number(6.0),
            Cell::Number(12.0),
            Cell::Null,
            text("2024-10-20"),
            Cell::Null,
            text("sometime"),
            text("WBS-2"),
        ]);

        let mut dependencies = Table::new(
            "TASKPRED",
            [TASK_ID, PRED_LIST, SUCC_LIST, "pred_details", "lag_hr_cnt"],
        );
        dependencies.push_row(vec![
            text("A100"),
            text("A050, A060"),
            text("A300"),
            text("FS"),
            Cell::Number(0.0),
        ]);
        dependencies.push_row(vec![
            text("A300 "),
            text("A100"),
            Cell::Null,
            text("FS"),
            Cell::Number(0.0),
        ]);
        ReferenceData {
            tasks,
            dependencies,
        }
    }

    /// Upload with the given `(id, name)` rows.
    pub fn upload(rows: &[(&str, &str)]) -> Table {
        let mut table = Table::new("upload", [ACTIVITY_ID, ACTIVITY_NAME, "Notes"]);
        for (id, name) in rows {
            table.push_row(vec![text(id), text(name), Cell::Null]);
        }
        table
    }
}
