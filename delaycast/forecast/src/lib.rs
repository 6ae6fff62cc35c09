#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Delaycast forecasting stack: joins uploaded activities with a reference
//! schedule workbook, engineers scheduling features, and classifies each
//! activity as delayed or on time with a pre-trained model.

/// Error taxonomy shared by every pipeline stage.
#[path = "../error.rs"]
pub mod error;

/// TOML configuration for paths, sheets, and thresholds.
#[path = "../config.rs"]
pub mod config;

/// Structured logging handle for pipeline runs.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Tabular inputs: CSV uploads, reference workbook sheets, date parsing.
#[path = "../data/main.rs"]
pub mod data;

/// Serialized model, scaler, and encoder artifacts plus the cached loader.
#[path = "../artifacts/main.rs"]
pub mod artifacts;

/// Join, derivation, imputation, and encoding of feature rows.
#[path = "../features.rs"]
pub mod features;

/// Prediction tables and the presentation contract.
#[path = "../report.rs"]
pub mod report;

/// End-to-end delay prediction entry point.
#[path = "../pipeline.rs"]
pub mod pipeline;

pub use artifacts::{ArtifactPaths, ModelResources, ResourceLoader};
pub use config::DelaycastConfig;
pub use data::{
    reference::{ReferenceData, ReferenceSource, StaticReference, WorkbookSource},
    Cell, Table,
};
pub use error::{ErrorKind, ForecastError};
pub use features::{FeatureFrame, FeatureRow};
pub use pipeline::{DelayPredictor, ScoredActivity, ScoredFrame};
pub use report::{DelayStatus, PredictionRow, PredictionTable};
pub use telemetry::{PipelineTelemetry, PipelineTelemetryBuilder};
