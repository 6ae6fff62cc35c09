//! Pre-trained artifacts and the initialize-once resource cache.

/// Category encoder persisted next to the model.
pub mod encoder;
/// Delay classifiers.
pub mod model;
/// Feature standardization.
pub mod scaler;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::error::ForecastError;
use encoder::CategoryEncoder;
use model::DelayModel;
use scaler::StandardScaler;

/// Locations of the serialized artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Classifier JSON.
    pub model: PathBuf,
    /// Scaler JSON.
    pub scaler: PathBuf,
    /// Optional persisted category encoder JSON.
    pub encoder: Option<PathBuf>,
}

impl ArtifactPaths {
    /// Conventional layout under a `Models/` directory.
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            model: dir.join("delay_status_model.json"),
            scaler: dir.join("scaler.json"),
            encoder: Some(dir.join("status_encoder.json")),
        }
    }
}

/// Model, scaler, and encoder as one read-only bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResources {
    /// Classifier.
    pub model: DelayModel,
    /// Scaler applied before inference.
    pub scaler: StandardScaler,
    /// Persisted `status_code` mapping, if one was shipped.
    pub encoder: Option<CategoryEncoder>,
}

impl ModelResources {
    /// Bundles artifacts after checking each one is internally consistent.
    pub fn new(
        model: DelayModel,
        scaler: StandardScaler,
        encoder: Option<CategoryEncoder>,
    ) -> Result<Self, ForecastError> {
        model.validate().map_err(|reason| invalid("model", reason))?;
        scaler.validate().map_err(|reason| invalid("scaler", reason))?;
        if let Some(encoder) = &encoder {
            encoder
                .validate()
                .map_err(|reason| invalid("encoder", reason))?;
        }
        Ok(Self {
            model,
            scaler,
            encoder,
        })
    }

    /// Reads and validates every artifact from disk.
    pub fn read(paths: &ArtifactPaths) -> Result<Self, ForecastError> {
        let model = read_json("model", &paths.model)?;
        let scaler = read_json("scaler", &paths.scaler)?;
        let encoder = paths
            .encoder
            .as_deref()
            .map(|path| read_json("encoder", path))
            .transpose()?;
        Self::new(model, scaler, encoder)
    }
}

fn invalid(artifact: &'static str, reason: String) -> ForecastError {
    ForecastError::InvalidArtifact { artifact, reason }
}

fn read_json<T: DeserializeOwned>(artifact: &'static str, path: &Path) -> Result<T, ForecastError> {
    let contents = fs::read_to_string(path).map_err(|source| ForecastError::ArtifactIo {
        artifact,
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ForecastError::ArtifactDecode {
        artifact,
        path: path.to_path_buf(),
        source,
    })
}

/// Loads artifacts on first use and hands out the same bundle afterwards.
///
/// The first caller deserializes while holding the lock, so concurrent
/// callers block until the bundle exists. A failed load leaves the cache
/// empty and the next call retries from disk.
#[derive(Debug)]
pub struct ResourceLoader {
    paths: Option<ArtifactPaths>,
    slot: Mutex<Option<Arc<ModelResources>>>,
    loads: AtomicUsize,
}

impl ResourceLoader {
    /// Creates an empty cache reading from `paths`.
    #[must_use]
    pub fn new(paths: ArtifactPaths) -> Self {
        Self {
            paths: Some(paths),
            slot: Mutex::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    /// Creates a cache already holding `resources`; it never touches disk.
    #[must_use]
    pub fn preloaded(resources: ModelResources) -> Self {
        Self {
            paths: None,
            slot: Mutex::new(Some(Arc::new(resources))),
            loads: AtomicUsize::new(0),
        }
    }

    /// Returns the cached bundle, reading it from disk on the first call.
    pub fn load_resources(&self) -> Result<Arc<ModelResources>, ForecastError> {
        let mut slot = self.slot.lock();
        if let Some(resources) = slot.as_ref() {
            return Ok(Arc::clone(resources));
        }
        let paths = self.paths.as_ref().ok_or_else(|| ForecastError::InvalidArtifact {
            artifact: "model",
            reason: "no artifact paths configured".into(),
        })?;
        let resources = Arc::new(ModelResources::read(paths)?);
        self.loads.fetch_add(1, Ordering::SeqCst);
        *slot = Some(Arc::clone(&resources));
        Ok(resources)
    }

    /// Number of successful reads from disk.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// True once a bundle is cached.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Drops the cached bundle so the next call reads from disk again.
    pub fn reset(&self) {
        self.slot.lock().take();
    }

    /// Configured artifact locations, if the loader reads from disk.
    #[must_use]
    pub const fn paths(&self) -> Option<&ArtifactPaths> {
        self.paths.as_ref()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::json;

    use super::*;
    use crate::features::{MODEL_FEATURES, SCALED_FEATURES};

    /// Identity scaler over the six pipeline columns.
    pub fn identity_scaler() -> StandardScaler {
        StandardScaler {
            feature_names: SCALED_FEATURES.iter().map(ToString::to_string).collect(),
            mean: vec![0.0; SCALED_FEATURES.len()],
            scale: vec![1.0; SCALED_FEATURES.len()],
        }
    }

    /// Linear model scoring `0.1 * Total Float`, so float above 5 days reads
    /// as delayed.
    pub fn float_model() -> DelayModel {
        DelayModel::Linear(model::LinearModel {
            feature_names: MODEL_FEATURES.iter().map(ToString::to_string).collect(),
            weights: vec![0.0, 0.0, 0.1, 0.0, 0.0],
            bias: 0.0,
        })
    }

    /// Writes a full artifact set into `dir`.
    pub fn write_artifacts(dir: &Path) -> ArtifactPaths {
        let paths = ArtifactPaths::in_dir(dir);
        fs::create_dir_all(dir).unwrap();
        fs::write(&paths.model, serde_json::to_string(&float_model()).unwrap()).unwrap();
        fs::write(&paths.scaler, serde_json::to_string(&identity_scaler()).unwrap()).unwrap();
        fs::write(
            paths.encoder.as_ref().unwrap(),
            json!({
                "column": "status_code",
                "classes": ["TK_Active", "TK_Complete", "TK_NotStart"],
            })
            .to_string(),
        )
        .unwrap();
        paths
    }
}
