use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use shared_logging::LogLevel;

use crate::{
    artifacts::ArtifactPaths,
    data::{
        dates::{DateParser, DEFAULT_DATE_FORMATS},
        reference::{WorkbookSource, DEPENDENCY_SHEET, TASK_SHEET},
    },
};

/// Top-level configuration for a delaycast deployment.
#[derive(Debug, Clone)]
pub struct DelaycastConfig {
    /// Reference workbook settings.
    pub reference: ReferenceSettings,
    /// Artifact locations.
    pub artifacts: ArtifactSettings,
    /// Thresholding and parsing options.
    pub prediction: PredictionSettings,
    /// Structured log output.
    pub logging: LoggingSettings,
    source_dir: PathBuf,
}

impl Default for DelaycastConfig {
    fn default() -> Self {
        Self {
            reference: ReferenceSettings::default(),
            artifacts: ArtifactSettings::default(),
            prediction: PredictionSettings::default(),
            logging: LoggingSettings::default(),
            source_dir: PathBuf::from("."),
        }
    }
}

impl DelaycastConfig {
    /// Loads configuration from a TOML file. Relative paths resolve against
    /// the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading delaycast config {}", path.display()))?;
        let source_dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::from_toml_str(&raw, source_dir).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses configuration text, resolving relative paths against `source_dir`.
    pub fn from_toml_str(raw: &str, source_dir: impl Into<PathBuf>) -> Result<Self> {
        let document: ConfigSerde = toml::from_str(raw)?;
        let mut config = Self {
            reference: document.reference,
            artifacts: document.artifacts,
            prediction: document.prediction,
            logging: document.logging,
            source_dir: source_dir.into(),
        };
        config.validate()?;
        config.resolve_paths();
        Ok(config)
    }

    /// Loads `path` when given, otherwise the defaults rooted at the working
    /// directory.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// Rejects thresholds outside `0..=1`, blank sheet names, and empty
    /// date format lists.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.prediction.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            bail!("prediction.threshold must be within 0..=1, got {threshold}");
        }
        if self.reference.task_sheet.trim().is_empty()
            || self.reference.dependency_sheet.trim().is_empty()
        {
            bail!("reference sheet names must not be empty");
        }
        if self.prediction.date_formats.is_empty() {
            bail!("prediction.date_formats must list at least one format");
        }
        Ok(())
    }

    fn resolve_paths(&mut self) {
        self.reference.workbook = self.resolve_path(&self.reference.workbook);
        self.artifacts.model = self.resolve_path(&self.artifacts.model);
        self.artifacts.scaler = self.resolve_path(&self.artifacts.scaler);
        self.artifacts.encoder =
            self.artifacts.encoder.as_ref().map(|path| self.resolve_path(path));
        self.logging.path = self.logging.path.as_ref().map(|path| self.resolve_path(path));
    }

    /// Resolves a path relative to the configuration file.
    #[must_use]
    pub fn resolve_path(&self, candidate: impl AsRef<Path>) -> PathBuf {
        let candidate = candidate.as_ref();
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.source_dir.join(candidate)
        }
    }

    /// Directory relative paths were resolved against.
    #[must_use]
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Workbook source for the configured sheets.
    #[must_use]
    pub fn workbook_source(&self) -> WorkbookSource {
        WorkbookSource::new(
            self.reference.workbook.clone(),
            self.reference.task_sheet.clone(),
            self.reference.dependency_sheet.clone(),
        )
    }

    /// Artifact locations for the resource loader.
    #[must_use]
    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths {
            model: self.artifacts.model.clone(),
            scaler: self.artifacts.scaler.clone(),
            encoder: self.artifacts.encoder.clone(),
        }
    }

    /// Date parser over the configured formats.
    #[must_use]
    pub fn date_parser(&self) -> DateParser {
        DateParser::new(self.prediction.date_formats.iter().cloned())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigSerde {
    #[serde(default)]
    reference: ReferenceSettings,
    #[serde(default)]
    artifacts: ArtifactSettings,
    #[serde(default)]
    prediction: PredictionSettings,
    #[serde(default)]
    logging: LoggingSettings,
}

/// Where the reference schedule lives.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceSettings {
    /// Workbook path.
    #[serde(default = "default_workbook")]
    pub workbook: PathBuf,
    /// Task sheet name.
    #[serde(default = "default_task_sheet")]
    pub task_sheet: String,
    /// Dependency sheet name.
    #[serde(default = "default_dependency_sheet")]
    pub dependency_sheet: String,
}

impl Default for ReferenceSettings {
    fn default() -> Self {
        Self {
            workbook: default_workbook(),
            task_sheet: default_task_sheet(),
            dependency_sheet: default_dependency_sheet(),
        }
    }
}

/// Serialized artifact locations.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactSettings {
    /// Classifier JSON.
    #[serde(default = "default_model")]
    pub model: PathBuf,
    /// Scaler JSON.
    #[serde(default = "default_scaler")]
    pub scaler: PathBuf,
    /// Persisted `status_code` encoder. Without one, codes are fitted per call.
    #[serde(default)]
    pub encoder: Option<PathBuf>,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            scaler: default_scaler(),
            encoder: None,
        }
    }
}

/// Inference options.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionSettings {
    /// Scores strictly above this are labelled delayed.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// chrono formats tried for text dates, in order.
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            date_formats: default_date_formats(),
        }
    }
}

/// Structured logging options.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// JSON-lines log file; logging is off when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Minimum level written.
    #[serde(default = "default_level", deserialize_with = "parse_level")]
    pub level: LogLevel,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            path: None,
            level: default_level(),
        }
    }
}

fn parse_level<'de, D>(deserializer: D) -> std::result::Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

fn default_workbook() -> PathBuf {
    PathBuf::from("Data/schedule.xlsx")
}

fn default_task_sheet() -> String {
    TASK_SHEET.into()
}

fn default_dependency_sheet() -> String {
    DEPENDENCY_SHEET.into()
}

fn default_model() -> PathBuf {
    PathBuf::from("Models/delay_status_model.json")
}

fn default_scaler() -> PathBuf {
    PathBuf::from("Models/scaler.json")
}

const fn default_threshold() -> f64 {
    0.5
}

fn default_date_formats() -> Vec<String> {
    DEFAULT_DATE_FORMATS.iter().map(ToString::to_string).collect()
}

const fn default_level() -> LogLevel {
    LogLevel::Info
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = DelaycastConfig::load_or_default(None).unwrap();
        assert!((config.prediction.threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.reference.task_sheet, "TASK");
        assert_eq!(config.reference.dependency_sheet, "TASKPRED");
        assert!(config.artifacts.encoder.is_none());
        assert!(config.logging.path.is_none());
        assert_eq!(config.date_parser().formats().len(), DEFAULT_DATE_FORMATS.len());
    }

    #[test]
    fn resolves_relative_paths_against_config_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("delaycast.toml");
        fs::write(
            &path,
            r#"
[reference]
workbook = "data/plan.xlsx"
task_sheet = "Tasks"

[artifacts]
model = "/opt/models/model.json"
encoder = "Models/status_encoder.json"

[prediction]
threshold = 0.7

[logging]
path = "logs/delaycast.log"
level = "debug"
"#,
        )
        .unwrap();
        let config = DelaycastConfig::load(&path).unwrap();
        assert_eq!(config.reference.workbook, dir.path().join("data/plan.xlsx"));
        assert_eq!(config.reference.task_sheet, "Tasks");
        assert_eq!(config.reference.dependency_sheet, "TASKPRED");
        assert_eq!(config.artifacts.model, PathBuf::from("/opt/models/model.json"));
        assert_eq!(config.artifacts.scaler, dir.path().join("Models/scaler.json"));
        assert_eq!(
            config.artifact_paths().encoder,
            Some(dir.path().join("Models/status_encoder.json"))
        );
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.path, Some(dir.path().join("logs/delaycast.log")));
        assert_eq!(config.workbook_source().path(), dir.path().join("data/plan.xlsx"));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err =
            DelaycastConfig::from_toml_str("[prediction]\nthreshold = 1.5\n", ".").unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[test]
    fn rejects_blank_sheet_and_unknown_section() {
        assert!(DelaycastConfig::from_toml_str("[reference]\ntask_sheet = \" \"\n", ".").is_err());
        assert!(DelaycastConfig::from_toml_str("[metrics]\nenabled = true\n", ".").is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        assert!(DelaycastConfig::from_toml_str("[logging]\nlevel = \"verbose\"\n", ".").is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = DelaycastConfig::load("/nonexistent/delaycast.toml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/delaycast.toml"));
    }
}
