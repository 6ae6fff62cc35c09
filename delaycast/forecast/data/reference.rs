use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use calamine::{open_workbook_auto, Data, Reader, Sheets};
use chrono::{NaiveDate, NaiveDateTime};

use super::{Cell, Table};
use crate::error::ForecastError;

/// Default name of the task sheet in a Primavera XER-to-Excel export.
pub const TASK_SHEET: &str = "TASK";
/// Default name of the predecessor/successor sheet.
pub const DEPENDENCY_SHEET: &str = "TASKPRED";

type Workbook = Sheets<BufReader<File>>;

/// Both reference sheets, read fresh for every prediction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceData {
    /// Task sheet rows keyed by `task_code`.
    pub tasks: Table,
    /// Dependency sheet rows keyed by `task_id`.
    pub dependencies: Table,
}

/// Supplies the reference schedule to the pipeline.
pub trait ReferenceSource: Send + Sync {
    /// Loads both sheets. Missing files and sheets are fatal.
    fn load(&self) -> Result<ReferenceData, ForecastError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Reference schedule stored in a spreadsheet (xlsx, xlsm, xlsb, xls, ods).
#[derive(Debug, Clone)]
pub struct WorkbookSource {
    path: PathBuf,
    task_sheet: String,
    dependency_sheet: String,
}

impl WorkbookSource {
    /// Creates a source reading the named sheets from `path`.
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        task_sheet: impl Into<String>,
        dependency_sheet: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            task_sheet: task_sheet.into(),
            dependency_sheet: dependency_sheet.into(),
        }
    }

    /// Creates a source using the default `TASK`/`TASKPRED` sheet names.
    #[must_use]
    pub fn with_default_sheets(path: impl Into<PathBuf>) -> Self {
        Self::new(path, TASK_SHEET, DEPENDENCY_SHEET)
    }

    /// Workbook location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn workbook_error(&self, source: calamine::Error) -> ForecastError {
        ForecastError::Workbook {
            path: self.path.clone(),
            source,
        }
    }

    fn read_sheet(&self, workbook: &mut Workbook, sheet: &str) -> Result<Table, ForecastError> {
        if !workbook.sheet_names().iter().any(|name| name == sheet) {
            return Err(ForecastError::MissingSheet {
                path: self.path.clone(),
                sheet: sheet.to_string(),
            });
        }
        let range = workbook
            .worksheet_range(sheet)
            .map_err(|err| self.workbook_error(err))?;
        let mut rows = range.rows();
        let headers: Vec<String> = rows
            .next()
            .map(|header| header.iter().map(|cell| convert(cell).to_string()).collect())
            .unwrap_or_default();
        let mut table = Table::new(sheet, headers);
        for row in rows {
            table.push_row(row.iter().map(convert).collect());
        }
        Ok(table)
    }
}

impl ReferenceSource for WorkbookSource {
    fn load(&self) -> Result<ReferenceData, ForecastError> {
        let mut workbook =
            open_workbook_auto(&self.path).map_err(|err| self.workbook_error(err))?;
        let tasks = self.read_sheet(&mut workbook, &self.task_sheet)?;
        let dependencies = self.read_sheet(&mut workbook, &self.dependency_sheet)?;
        Ok(ReferenceData {
            tasks,
            dependencies,
        })
    }

    fn describe(&self) -> String {
        format!(
            "{} [{}, {}]",
            self.path.display(),
            self.task_sheet,
            self.dependency_sheet
        )
    }
}

/// In-memory reference, handy for embedding callers and tests.
#[derive(Debug, Clone)]
pub struct StaticReference {
    data: ReferenceData,
}

impl StaticReference {
    /// Wraps already-built sheets.
    #[must_use]
    pub const fn new(data: ReferenceData) -> Self {
        Self { data }
    }
}

impl ReferenceSource for StaticReference {
    fn load(&self) -> Result<ReferenceData, ForecastError> {
        Ok(self.data.clone())
    }

    fn describe(&self) -> String {
        format!(
            "in-memory [{} tasks, {} dependencies]",
            self.data.tasks.len(),
            self.data.dependencies.len()
        )
    }
}

fn convert(cell: &Data) -> Cell {
    match cell {
        Data::Int(value) => {
            #[allow(clippy::cast_precision_loss)]
            let value = *value as f64;
            Cell::Number(value)
        }
        Data::Float(value) => Cell::Number(*value),
        Data::String(text) => Cell::from_text(text),
        Data::Bool(value) => Cell::Text(value.to_string()),
        Data::DateTime(value) => value.as_datetime().map_or(Cell::Null, Cell::Date),
        Data::DateTimeIso(text) => {
            parse_iso(text).map_or_else(|| Cell::from_text(text), Cell::Date)
        }
        Data::DurationIso(text) => Cell::from_text(text),
        Data::Error(_) | Data::Empty => Cell::Null,
    }
}

fn parse_iso(text: &str) -> Option<NaiveDateTime> {
    text.parse::<NaiveDateTime>().ok().or_else(|| {
        text.parse::<NaiveDate>()
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../test-fixtures/reference/schedule.xlsx")
    }

    #[test]
    fn reads_both_sheets_from_workbook() {
        let data = WorkbookSource::with_default_sheets(fixture()).load().unwrap();
        assert!(data.tasks.require_column("task_code").is_ok());
        assert!(data.dependencies.require_column("pred_list").is_ok());
        assert_eq!(data.tasks.len(), 4);
        let code = data.tasks.require_column("task_code").unwrap();
        assert_eq!(data.tasks.cell(0, code).as_key().as_deref(), Some("A100"));
        let duration = data.tasks.require_column("Original Duration").unwrap();
        assert_eq!(data.tasks.cell(0, duration).as_number(), Some(10.0));
    }

    #[test]
    fn missing_sheet_is_reported() {
        let source = WorkbookSource::new(fixture(), "TASK", "RELATIONSHIPS");
        let err = source.load().unwrap_err();
        assert!(matches!(
            err,
            ForecastError::MissingSheet { ref sheet, .. } if sheet == "RELATIONSHIPS"
        ));
        assert_eq!(err.kind(), crate::error::ErrorKind::InputStructure);
    }

    #[test]
    fn missing_workbook_is_reported() {
        let source = WorkbookSource::with_default_sheets("/nonexistent/schedule.xlsx");
        let err = source.load().unwrap_err();
        assert!(matches!(err, ForecastError::Workbook { .. }));
    }

    #[test]
    fn converts_spreadsheet_cells() {
        assert_eq!(convert(&Data::Int(7)), Cell::Number(7.0));
        assert_eq!(convert(&Data::String(String::new())), Cell::Null);
        assert_eq!(convert(&Data::String("  ".into())), Cell::Text("  ".into()));
        assert_eq!(convert(&Data::Empty), Cell::Null);
        assert_eq!(
            convert(&Data::DateTimeIso("2024-10-06".into())),
            Cell::Date(
                NaiveDate::from_ymd_opt(2024, 10, 6)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            )
        );
    }
}
