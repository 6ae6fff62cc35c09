use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Coarse failure classes surfaced to the boundary layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Upload or reference workbook lacks a required sheet or column.
    InputStructure,
    /// Model, scaler, or encoder artifact is missing or corrupt.
    ResourceLoad,
    /// Artifact schema disagrees with the engineered feature columns.
    SchemaMismatch,
    /// Filesystem or output encoding failure.
    Io,
}

/// Errors raised by the forecasting pipeline. Every variant is fatal for the
/// invocation; record-level defects never reach this type.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// A table lacks a column the pipeline depends on.
    #[error("{table} is missing required column `{column}`")]
    MissingColumn {
        /// Table label (upload, TASK, TASKPRED).
        table: String,
        /// Column name that was looked up.
        column: String,
    },
    /// The reference workbook lacks a sheet.
    #[error("workbook {} has no sheet named `{sheet}`", .path.display())]
    MissingSheet {
        /// Workbook path.
        path: PathBuf,
        /// Sheet name that was requested.
        sheet: String,
    },
    /// The reference workbook could not be opened or decoded.
    #[error("failed to read workbook {}: {source}", .path.display())]
    Workbook {
        /// Workbook path.
        path: PathBuf,
        /// Underlying spreadsheet error.
        #[source]
        source: calamine::Error,
    },
    /// The uploaded table is not valid delimited text.
    #[error("failed to read {table} as CSV: {source}")]
    Csv {
        /// Table label.
        table: String,
        /// Underlying CSV error.
        #[source]
        source: csv::Error,
    },
    /// An artifact file could not be read.
    #[error("failed to read {artifact} artifact {}: {source}", .path.display())]
    ArtifactIo {
        /// Artifact role (model, scaler, encoder).
        artifact: &'static str,
        /// Artifact path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// An artifact file is not valid JSON for its role.
    #[error("failed to decode {artifact} artifact {}: {source}", .path.display())]
    ArtifactDecode {
        /// Artifact role.
        artifact: &'static str,
        /// Artifact path.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// An artifact decoded but is internally inconsistent.
    #[error("invalid {artifact} artifact: {reason}")]
    InvalidArtifact {
        /// Artifact role.
        artifact: &'static str,
        /// What failed validation.
        reason: String,
    },
    /// An artifact expects a different feature layout than the pipeline supplies.
    #[error("{artifact} expects features {expected:?} but the pipeline supplies {found:?}")]
    SchemaMismatch {
        /// Artifact role.
        artifact: &'static str,
        /// Feature names declared by the artifact.
        expected: Vec<String>,
        /// Feature names produced by the pipeline.
        found: Vec<String>,
    },
    /// Writing results failed.
    #[error("failed to write output: {0}")]
    Output(#[source] csv::Error),
    /// JSON encoding of results failed.
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForecastError {
    /// Classifies the error for boundary reporting.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingColumn { .. }
            | Self::MissingSheet { .. }
            | Self::Workbook { .. }
            | Self::Csv { .. } => ErrorKind::InputStructure,
            Self::ArtifactIo { .. }
            | Self::ArtifactDecode { .. }
            | Self::InvalidArtifact { .. } => ErrorKind::ResourceLoad,
            Self::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Self::Output(_) | Self::Encode(_) | Self::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn missing_column(table: &str, column: &str) -> Self {
        Self::MissingColumn {
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}
