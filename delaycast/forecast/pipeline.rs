use std::{sync::Arc, time::Instant};

use anyhow::Result;
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    artifacts::{ModelResources, ResourceLoader},
    config::DelaycastConfig,
    data::{dates::DateParser, reference::ReferenceSource, Table},
    error::ForecastError,
    features::{
        FeatureBuilder, FeatureFrame, FeatureRow, FrameStats, StatusEncoding, MODEL_FEATURES,
        SCALED_FEATURES,
    },
    report::{DelayStatus, PredictionRow, PredictionTable},
    telemetry::PipelineTelemetry,
};

/// Default decision threshold on model scores.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

const MODULE: &str = "forecast";

/// A feature row with its scaled inputs, score, and label.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredActivity {
    /// Engineered features before scaling.
    pub row: FeatureRow,
    /// Standardized values in scaler column order; `Delay_Duration` stays
    /// `None` when it could not be derived.
    pub scaled: [Option<f64>; 6],
    /// Raw model score.
    pub score: f64,
    /// Thresholded label.
    pub status: DelayStatus,
}

/// Scored rows before deduplication, plus frame counts.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFrame {
    /// One entry per matched feature row, in upload order.
    pub activities: Vec<ScoredActivity>,
    /// Join and encoding counts.
    pub stats: FrameStats,
}

impl ScoredFrame {
    /// Projects to the three output columns, first row per identifier.
    #[must_use]
    pub fn to_table(&self) -> PredictionTable {
        PredictionTable::from_rows(self.activities.iter().map(|activity| {
            PredictionRow::new(
                activity.row.activity_id.clone(),
                activity.row.activity_name.clone().unwrap_or_default(),
                activity.status,
            )
        }))
    }
}

/// End-to-end delay classifier over a reference schedule and cached model
/// artifacts.
pub struct DelayPredictor {
    reference: Arc<dyn ReferenceSource>,
    loader: Arc<ResourceLoader>,
    features: FeatureBuilder,
    threshold: f64,
    telemetry: PipelineTelemetry,
}

impl std::fmt::Debug for DelayPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayPredictor")
            .field("reference", &self.reference.describe())
            .field("threshold", &self.threshold)
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl DelayPredictor {
    /// Creates a predictor with default threshold, date formats, and no
    /// logging.
    #[must_use]
    pub fn new(reference: Arc<dyn ReferenceSource>, loader: Arc<ResourceLoader>) -> Self {
        Self {
            reference,
            loader,
            features: FeatureBuilder::default(),
            threshold: DEFAULT_THRESHOLD,
            telemetry: PipelineTelemetry::disabled(MODULE),
        }
    }

    /// Wires workbook, artifacts, threshold, date formats, and logging from
    /// configuration. Artifacts are read lazily on first use.
    pub fn from_config(config: &DelaycastConfig) -> Result<Self> {
        let mut telemetry = PipelineTelemetry::builder(MODULE).min_level(config.logging.level);
        if let Some(path) = &config.logging.path {
            telemetry = telemetry.log_path(path);
        }
        Ok(Self::new(
            Arc::new(config.workbook_source()),
            Arc::new(ResourceLoader::new(config.artifact_paths())),
        )
        .with_threshold(config.prediction.threshold)
        .with_date_parser(config.date_parser())
        .with_telemetry(telemetry.build()?))
    }

    /// Overrides the decision threshold.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Overrides the text date formats.
    #[must_use]
    pub fn with_date_parser(mut self, dates: DateParser) -> Self {
        self.features = FeatureBuilder::new(dates);
        self
    }

    /// Routes stage logs to `telemetry`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PipelineTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Decision threshold in use.
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Shared artifact cache.
    #[must_use]
    pub const fn loader(&self) -> &Arc<ResourceLoader> {
        &self.loader
    }

    /// Reference source description for logs and reports.
    #[must_use]
    pub fn describe_reference(&self) -> String {
        self.reference.describe()
    }

    /// Labels every matched activity, one row per identifier.
    pub fn predict(&self, upload: &Table) -> Result<PredictionTable, ForecastError> {
        Ok(self.predict_detailed(upload)?.to_table())
    }

    /// Joins, derives, and encodes features without scoring them.
    pub fn engineer(&self, upload: &Table) -> Result<FeatureFrame, ForecastError> {
        self.observe("feature engineering failed", || {
            self.build_frame(upload).map(|(frame, _)| frame)
        })
    }

    /// Scores every matched feature row, keeping duplicates and scaled
    /// inputs for inspection.
    pub fn predict_detailed(&self, upload: &Table) -> Result<ScoredFrame, ForecastError> {
        self.observe("prediction failed", || self.score(upload))
    }

    fn observe<T>(
        &self,
        message: &str,
        run: impl FnOnce() -> Result<T, ForecastError>,
    ) -> Result<T, ForecastError> {
        run().inspect_err(|err| {
            self.telemetry.emit(
                LogLevel::Error,
                message,
                json!({ "kind": err.kind(), "error": err.to_string() }),
            );
        })
    }

    fn build_frame(
        &self,
        upload: &Table,
    ) -> Result<(FeatureFrame, Arc<ModelResources>), ForecastError> {
        FeatureBuilder::check_upload(upload)?;
        let reference = self.reference.load()?;
        FeatureBuilder::check_reference(&reference)?;
        self.telemetry.emit(
            LogLevel::Debug,
            "reference loaded",
            json!({
                "source": self.reference.describe(),
                "tasks": reference.tasks.len(),
                "dependencies": reference.dependencies.len(),
            }),
        );
        let resources = self.loader.load_resources()?;
        let frame = self.features.build(upload, &reference, resources.encoder.as_ref())?;
        let stats = frame.stats;
        if stats.encoding == StatusEncoding::FittedPerCall {
            self.telemetry.emit(
                LogLevel::Warn,
                "no persisted status encoder; status codes fitted over this upload only",
                json!({ "rows": frame.rows.len() }),
            );
        }
        if stats.unknown_status > 0 {
            self.telemetry.emit(
                LogLevel::Warn,
                "status values unknown to the encoder were left empty",
                json!({ "rows": stats.unknown_status }),
            );
        }
        self.telemetry.emit(
            LogLevel::Debug,
            "features engineered",
            json!({
                "input_rows": stats.input_rows,
                "joined_rows": stats.joined_rows,
                "dropped_unmatched": stats.unmatched_rows,
                "feature_rows": frame.rows.len(),
            }),
        );
        Ok((frame, resources))
    }

    fn score(&self, upload: &Table) -> Result<ScoredFrame, ForecastError> {
        let started = Instant::now();
        let (frame, resources) = self.build_frame(upload)?;
        check_schema(&resources)?;

        let mut scaled_rows = Vec::with_capacity(frame.rows.len());
        let mut inputs = Vec::with_capacity(frame.rows.len());
        for row in &frame.rows {
            let mut scaled = row.numeric_features();
            resources.scaler.transform(&mut scaled);
            inputs.push(
                scaled[..MODEL_FEATURES.len()]
                    .iter()
                    .map(|value| value.unwrap_or(0.0))
                    .collect::<Vec<_>>(),
            );
            scaled_rows.push(scaled);
        }
        let scores = resources.model.predict(&inputs);

        let activities: Vec<ScoredActivity> = frame
            .rows
            .into_iter()
            .zip(scaled_rows)
            .zip(scores)
            .map(|((row, scaled), score)| ScoredActivity {
                row,
                scaled,
                score,
                status: DelayStatus::from_score(score, self.threshold),
            })
            .collect();
        let missing_delay = activities
            .iter()
            .filter(|activity| activity.row.delay_duration.is_none())
            .count();
        if missing_delay > 0 {
            self.telemetry.emit(
                LogLevel::Warn,
                "Delay_Duration unavailable; left empty after scaling",
                json!({ "rows": missing_delay }),
            );
        }

        let scored = ScoredFrame {
            activities,
            stats: frame.stats,
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.telemetry.emit(
            LogLevel::Info,
            "prediction complete",
            json!({
                "model": resources.model.kind(),
                "input_rows": scored.stats.input_rows,
                "joined_rows": scored.stats.joined_rows,
                "dropped_unmatched": scored.stats.unmatched_rows,
                "scored_rows": scored.activities.len(),
                "output_rows": scored.to_table().len(),
                "elapsed_ms": elapsed_ms,
            }),
        );
        Ok(scored)
    }
}

/// Checks the scaler and model declare exactly the pipeline's feature
/// columns, in order.
pub fn check_schema(resources: &ModelResources) -> Result<(), ForecastError> {
    let scaler = &resources.scaler.feature_names;
    if !scaler.iter().map(String::as_str).eq(SCALED_FEATURES) {
        return Err(mismatch("scaler", scaler, &SCALED_FEATURES));
    }
    let model = resources.model.feature_names();
    if !model.iter().map(String::as_str).eq(MODEL_FEATURES) {
        return Err(mismatch("model", model, &MODEL_FEATURES));
    }
    Ok(())
}

fn mismatch(artifact: &'static str, expected: &[String], found: &[&str]) -> ForecastError {
    ForecastError::SchemaMismatch {
        artifact,
        expected: expected.to_vec(),
        found: found.iter().map(ToString::to_string).collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use proptest::prelude::*;
    use tempfile::tempdir;

    use super::*;
    use crate::{
        artifacts::{model::DelayModel, scaler::StandardScaler, testing as artifacts},
        data::reference::{ReferenceData, StaticReference},
        error::ErrorKind,
        features::testing,
    };

    struct CountingReference {
        data: ReferenceData,
        loads: AtomicUsize,
    }

    impl ReferenceSource for CountingReference {
        fn load(&self) -> Result<ReferenceData, ForecastError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.data.clone())
        }

        fn describe(&self) -> String {
            "counting".into()
        }
    }

    fn resources(model: DelayModel, scaler: StandardScaler) -> Arc<ResourceLoader> {
        Arc::new(ResourceLoader::preloaded(
            ModelResources::new(model, scaler, None).unwrap(),
        ))
    }

    fn predictor() -> DelayPredictor {
        DelayPredictor::new(
            Arc::new(StaticReference::new(testing::reference())),
            resources(artifacts::float_model(), artifacts::identity_scaler()),
        )
    }

    #[test]
    fn labels_late_activity_and_drops_unknown_ids() {
        let upload =
            testing::upload(&[("A100", "Pour slab"), ("A200", "Missing"), ("A300", "Cure slab")]);
        let table = predictor().predict(&upload).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("A100").unwrap().status(), Some(DelayStatus::Delayed));
        assert_eq!(table.get("A300").unwrap().status(), Some(DelayStatus::OnTime));
        assert!(table.get("A200").is_none());
    }

    #[test]
    fn duplicate_upload_rows_collapse_to_one() {
        let upload = testing::upload(&[("A100", "Pour slab"), (" A100", "Pour slab (copy)")]);
        let table = predictor().predict(&upload).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].activity_name, "Pour slab");
    }

    #[test]
    fn missing_identifier_fails_before_reference_load() {
        let reference = Arc::new(CountingReference {
            data: testing::reference(),
            loads: AtomicUsize::new(0),
        });
        let predictor = DelayPredictor::new(
            reference.clone(),
            resources(artifacts::float_model(), artifacts::identity_scaler()),
        );
        let mut upload = Table::new("upload", ["Activity Name"]);
        upload.push_row(vec![crate::Cell::from_text("Pour slab")]);
        let err = predictor.predict(&upload).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputStructure);
        assert_eq!(reference.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn scaler_schema_mismatch_is_reported() {
        let mut scaler = artifacts::identity_scaler();
        scaler.feature_names.swap(0, 1);
        let predictor = DelayPredictor::new(
            Arc::new(StaticReference::new(testing::reference())),
            resources(artifacts::float_model(), scaler),
        );
        let err = predictor.predict(&testing::upload(&[("A100", "x")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        assert!(matches!(err, ForecastError::SchemaMismatch { artifact: "scaler", .. }));
    }

    #[test]
    fn model_schema_mismatch_is_reported() {
        let model: DelayModel = serde_json::from_value(json!({
            "kind": "linear",
            "feature_names": SCALED_FEATURES,
            "weights": [0.0, 0.0, 0.1, 0.0, 0.0, 0.0],
        }))
        .unwrap();
        let predictor = DelayPredictor::new(
            Arc::new(StaticReference::new(testing::reference())),
            resources(model, artifacts::identity_scaler()),
        );
        let err = predictor.predict(&testing::upload(&[("A100", "x")])).unwrap_err();
        assert!(matches!(err, ForecastError::SchemaMismatch { artifact: "model", .. }));
    }

    #[test]
    fn detailed_scores_keep_missing_delay_empty() {
        let upload = testing::upload(&[("A500", "Backfill"), ("A100", "Pour slab")]);
        let scored = predictor().predict_detailed(&upload).unwrap();
        assert_eq!(scored.activities.len(), 2);
        let backfill = &scored.activities[0];
        assert_eq!(backfill.row.activity_id, "A500");
        assert_eq!(backfill.scaled[5], None);
        assert!((backfill.score - 1.2).abs() < 1e-9);
        assert_eq!(backfill.status, DelayStatus::Delayed);
        assert_eq!(scored.activities[1].scaled[5], Some(5.0));
    }

    #[test]
    fn threshold_is_configurable() {
        let upload = testing::upload(&[("A100", "Pour slab")]);
        let table = predictor().with_threshold(0.9).predict(&upload).unwrap();
        assert_eq!(table.rows()[0].status(), Some(DelayStatus::OnTime));
    }

    #[test]
    fn engineer_stops_before_scaling() {
        let mut scaler = artifacts::identity_scaler();
        scaler.feature_names.reverse();
        let predictor = DelayPredictor::new(
            Arc::new(StaticReference::new(testing::reference())),
            resources(artifacts::float_model(), scaler),
        );
        let frame = predictor.engineer(&testing::upload(&[("A100", "x"), ("A200", "y")])).unwrap();
        assert_eq!(frame.rows.len(), 1);
        assert_eq!(frame.stats.unmatched_rows, 1);
    }

    #[test]
    fn repeated_calls_share_one_load_and_agree() {
        let dir = tempdir().unwrap();
        let loader = Arc::new(ResourceLoader::new(artifacts::write_artifacts(dir.path())));
        let reference = Arc::new(StaticReference::new(testing::reference()));
        let predictor = DelayPredictor::new(reference, loader.clone());
        let upload = testing::upload(&[
            ("A100", "Pour slab"),
            ("A300", "Cure slab"),
            ("A400", "Strip forms"),
        ]);
        let first = predictor.predict(&upload).unwrap();
        let second = predictor.predict(&upload).unwrap();
        assert_eq!(first, second);
        assert_eq!(loader.load_count(), 1);
    }

    #[test]
    fn missing_artifacts_fail_as_resource_errors() {
        let dir = tempdir().unwrap();
        let paths = artifacts::write_artifacts(dir.path());
        fs::remove_file(&paths.model).unwrap();
        let predictor = DelayPredictor::new(
            Arc::new(StaticReference::new(testing::reference())),
            Arc::new(ResourceLoader::new(paths)),
        );
        let err = predictor.predict(&testing::upload(&[("A100", "x")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceLoad);
    }

    #[test]
    fn stage_counts_reach_the_log() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("forecast.log");
        let telemetry = PipelineTelemetry::builder(MODULE)
            .log_path(&log)
            .min_level(LogLevel::Info)
            .build()
            .unwrap();
        let predictor = predictor().with_telemetry(telemetry);
        predictor
            .predict(&testing::upload(&[("A100", "x"), ("A200", "y"), ("A100", "z")]))
            .unwrap();
        let contents = fs::read_to_string(&log).unwrap();
        let last: serde_json::Value =
            serde_json::from_str(contents.lines().last().unwrap()).unwrap();
        assert_eq!(last["message"], "prediction complete");
        assert_eq!(last["metadata"]["input_rows"], 3);
        assert_eq!(last["metadata"]["dropped_unmatched"], 1);
        assert_eq!(last["metadata"]["output_rows"], 1);
        assert!(contents.contains("fitted over this upload"));
    }

    #[test]
    fn predicts_from_checked_in_fixtures() {
        let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../test-fixtures");
        let config = DelaycastConfig::load(fixtures.join("delaycast.toml")).unwrap();
        let predictor = DelayPredictor::from_config(&config).unwrap();
        let upload = Table::from_csv_path("upload", fixtures.join("activities.csv")).unwrap();
        let table = predictor.predict(&upload).unwrap();
        let ids: Vec<_> = table.rows().iter().map(|row| row.activity_id.as_str()).collect();
        assert_eq!(ids, ["A100", "A300", "A400", "A500"]);
        assert_eq!(table.get("A100").unwrap().status(), Some(DelayStatus::Delayed));
        assert_eq!(table.get("A300").unwrap().status(), Some(DelayStatus::OnTime));
    }

    const IDS: [&str; 7] = ["A100", "A200", "A300", "A400", "A500", " A300 ", "ZZZ"];

    proptest! {
        #[test]
        fn output_is_unique_matched_and_ordered(
            picks in proptest::collection::vec(0..IDS.len(), 0..24)
        ) {
            let rows: Vec<(&str, &str)> = picks.iter().map(|&idx| (IDS[idx], "activity")).collect();
            let table = predictor().predict(&testing::upload(&rows)).unwrap();

            let mut expected: Vec<String> = Vec::new();
            for (id, _) in &rows {
                let id = id.trim().to_string();
                let known = ["A100", "A300", "A400", "A500"].contains(&id.as_str());
                if known && !expected.contains(&id) {
                    expected.push(id);
                }
            }
            let actual: Vec<String> =
                table.rows().iter().map(|row| row.activity_id.clone()).collect();
            prop_assert_eq!(actual, expected);
            for row in table.rows() {
                prop_assert!(row.status().is_some());
            }
        }
    }
}
