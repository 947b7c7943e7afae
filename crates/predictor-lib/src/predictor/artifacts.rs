//! Artifact loading and caching
//!
//! Each backend needs a fitted classifier plus the scaler and label map it was
//! trained with, all written by the offline training step into one models
//! directory:
//!
//! | file | used by |
//! |---|---|
//! | `rf_model.json` | tree backend |
//! | `dl_model.onnx` / `dl_model.json` | neural backend |
//! | `scaler.json`, `label_map.json` | both (required) |
//! | `background.json` | both (optional, enables sampled attribution) |
//! | `checksums.json` | both (optional, SHA-256 per file) |
//!
//! Artifacts are loaded lazily, at most once per backend, and never change
//! afterwards.

use super::features::FeatureSchema;
use super::forest::RandomForest;
use super::inference::{FittedModel, NeuralNet};
use super::network::DenseNetwork;
use super::scaler::StandardScaler;
use super::Classifier;
use crate::error::PredictError;
use crate::models::{Backend, Label};
use crate::observability::{PredictorMetrics, StructuredLogger};
use anyhow::{bail, ensure, Context, Result};
use once_cell::sync::OnceCell;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub const FOREST_FILE: &str = "rf_model.json";
pub const ONNX_FILE: &str = "dl_model.onnx";
pub const DENSE_FILE: &str = "dl_model.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const LABEL_MAP_FILE: &str = "label_map.json";
pub const BACKGROUND_FILE: &str = "background.json";
pub const CHECKSUM_FILE: &str = "checksums.json";

/// Number of classes every label map must describe
const N_LABELS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Unloaded,
    Loaded,
}

/// Class index to label, as written by the training step
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    labels: Vec<Label>,
}

impl LabelMap {
    pub fn new(labels: Vec<Label>) -> Result<Self> {
        ensure!(
            labels.len() == N_LABELS,
            "label map has {} entries, expected {}",
            labels.len(),
            N_LABELS
        );
        let distinct: HashSet<_> = labels.iter().collect();
        ensure!(distinct.len() == labels.len(), "label map repeats a label");
        Ok(Self { labels })
    }

    /// Parse `{"0": "Average", "1": "Good", "2": "Needs Attention"}`
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let raw: HashMap<String, String> = serde_json::from_slice(bytes)?;
        ensure!(
            raw.len() == N_LABELS,
            "label map has {} entries, expected {}",
            raw.len(),
            N_LABELS
        );
        let mut labels = Vec::with_capacity(N_LABELS);
        for index in 0..N_LABELS {
            let name = raw
                .get(&index.to_string())
                .with_context(|| format!("label map has no entry for class {}", index))?;
            labels.push(name.parse::<Label>()?);
        }
        Self::new(labels)
    }

    pub fn get(&self, index: usize) -> Option<Label> {
        self.labels.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Sample of standardized training rows used as the attribution baseline
#[derive(Debug, Clone)]
pub struct Background {
    rows: Vec<Vec<f32>>,
}

impl Background {
    pub fn new(rows: Vec<Vec<f32>>) -> Result<Self> {
        ensure!(!rows.is_empty(), "background sample is empty");
        let width = rows[0].len();
        for (i, row) in rows.iter().enumerate() {
            ensure!(
                row.len() == width,
                "background row {} has {} values, expected {}",
                i,
                row.len(),
                width
            );
            ensure!(
                row.iter().all(|v| v.is_finite()),
                "background row {} has non-finite values",
                i
            );
        }
        Ok(Self { rows })
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Self::new(serde_json::from_slice(bytes)?)
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    pub fn width(&self) -> usize {
        self.rows[0].len()
    }
}

/// Everything one backend needs to predict and explain
pub struct ArtifactSet {
    backend: Backend,
    schema: FeatureSchema,
    model: FittedModel,
    scaler: StandardScaler,
    labels: LabelMap,
    background: Option<Background>,
}

impl ArtifactSet {
    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn schema(&self) -> FeatureSchema {
        self.schema
    }

    pub fn feature_names(&self) -> &'static [String] {
        self.schema.names()
    }

    pub fn model(&self) -> &FittedModel {
        &self.model
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn background(&self) -> Option<&Background> {
        self.background.as_ref()
    }
}

/// Lazily loaded, process-wide artifact cache
pub struct ArtifactStore {
    models_dir: PathBuf,
    tree: OnceCell<Arc<ArtifactSet>>,
    neural: OnceCell<Arc<ArtifactSet>>,
    load_attempts: [AtomicUsize; 2],
    metrics: PredictorMetrics,
    logger: StructuredLogger,
}

impl ArtifactStore {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            tree: OnceCell::new(),
            neural: OnceCell::new(),
            load_attempts: [AtomicUsize::new(0), AtomicUsize::new(0)],
            metrics: PredictorMetrics::new(),
            logger: StructuredLogger::new("artifact-store"),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    fn slot(&self, backend: Backend) -> (&OnceCell<Arc<ArtifactSet>>, &AtomicUsize) {
        match backend {
            Backend::Tree => (&self.tree, &self.load_attempts[0]),
            Backend::Neural => (&self.neural, &self.load_attempts[1]),
        }
    }

    /// Load the backend's artifacts on first use and return the shared set.
    ///
    /// Concurrent first callers wait for a single load. A failed load is not
    /// cached, so the next call tries again.
    pub fn ensure_loaded(&self, backend: Backend) -> Result<Arc<ArtifactSet>, PredictError> {
        let (cell, attempts) = self.slot(backend);
        cell.get_or_try_init(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            match load_artifacts(&self.models_dir, backend) {
                Ok(set) => {
                    self.metrics.set_artifacts_loaded(backend, true);
                    self.logger.log_artifacts_loaded(
                        backend,
                        set.model.display_name(),
                        set.scaler.n_features(),
                        set.background.is_some(),
                    );
                    Ok(Arc::new(set))
                }
                Err(err) => {
                    self.metrics.set_artifacts_loaded(backend, false);
                    self.logger
                        .log_artifacts_unavailable(backend, &err.to_string());
                    Err(err)
                }
            }
        })
        .map(Arc::clone)
    }

    pub fn state(&self, backend: Backend) -> LoadState {
        if self.slot(backend).0.get().is_some() {
            LoadState::Loaded
        } else {
            LoadState::Unloaded
        }
    }

    /// Number of times a load of `backend` was started
    pub fn load_attempts(&self, backend: Backend) -> usize {
        self.slot(backend).1.load(Ordering::SeqCst)
    }
}

/// Read and validate one backend's artifacts from `dir`
pub(crate) fn load_artifacts(dir: &Path, backend: Backend) -> Result<ArtifactSet, PredictError> {
    let model_file = model_file(dir, backend)?;
    for name in [model_file, SCALER_FILE, LABEL_MAP_FILE] {
        if !dir.join(name).is_file() {
            return Err(PredictError::artifacts_unavailable(
                backend,
                format!(
                    "{} not found in {}; {}",
                    name,
                    dir.display(),
                    producing_step(name)
                ),
            ));
        }
    }

    read_artifacts(dir, backend, model_file).map_err(|e| {
        PredictError::artifacts_unavailable(
            backend,
            format!("{:#}; regenerate the artifacts with the training step", e),
        )
    })
}

fn model_file(dir: &Path, backend: Backend) -> Result<&'static str, PredictError> {
    if backend == Backend::Tree {
        return Ok(FOREST_FILE);
    }
    let has_onnx = dir.join(ONNX_FILE).is_file();
    let has_dense = dir.join(DENSE_FILE).is_file();
    if has_onnx && cfg!(feature = "onnx") {
        Ok(ONNX_FILE)
    } else if has_dense {
        Ok(DENSE_FILE)
    } else if has_onnx {
        Err(PredictError::artifacts_unavailable(
            backend,
            format!(
                "{} found but this build has no ONNX runtime; rebuild with the `onnx` feature or export {}",
                ONNX_FILE, DENSE_FILE
            ),
        ))
    } else {
        Err(PredictError::artifacts_unavailable(
            backend,
            format!(
                "neither {} nor {} found in {}; {}",
                ONNX_FILE,
                DENSE_FILE,
                dir.display(),
                producing_step(DENSE_FILE)
            ),
        ))
    }
}

fn producing_step(file: &str) -> &'static str {
    match file {
        FOREST_FILE => "run the random forest training step to produce it",
        ONNX_FILE | DENSE_FILE => "run the neural network training step to produce it",
        _ => "run either training step to produce it",
    }
}

fn read_artifacts(dir: &Path, backend: Backend, model_file: &str) -> Result<ArtifactSet> {
    let checksums = read_checksums(dir)?;
    let read = |name: &str| read_verified(dir, name, checksums.as_ref());

    let scaler = StandardScaler::from_json(&read(SCALER_FILE)?)
        .with_context(|| format!("{} is malformed", SCALER_FILE))?;
    let schema = FeatureSchema::for_width(scaler.n_features()).with_context(|| {
        format!(
            "{} describes {} features, which matches no known feature schema",
            SCALER_FILE,
            scaler.n_features()
        )
    })?;
    let labels = LabelMap::from_json(&read(LABEL_MAP_FILE)?)
        .with_context(|| format!("{} is malformed", LABEL_MAP_FILE))?;

    let bytes = read(model_file)?;
    let model = match model_file {
        FOREST_FILE => FittedModel::Forest(
            RandomForest::from_json(&bytes).with_context(|| format!("{} is malformed", FOREST_FILE))?,
        ),
        DENSE_FILE => FittedModel::Network(NeuralNet::Dense(
            DenseNetwork::from_json(&bytes).with_context(|| format!("{} is malformed", DENSE_FILE))?,
        )),
        #[cfg(feature = "onnx")]
        ONNX_FILE => FittedModel::Network(NeuralNet::Onnx(
            super::inference::OnnxNetwork::from_bytes(&bytes, scaler.n_features(), labels.len())
                .with_context(|| format!("{} is malformed", ONNX_FILE))?,
        )),
        other => bail!("no loader for {}", other),
    };

    ensure!(
        model.n_features() == scaler.n_features(),
        "{} expects {} features but {} has {}",
        model_file,
        model.n_features(),
        SCALER_FILE,
        scaler.n_features()
    );
    ensure!(
        model.n_classes() == labels.len(),
        "{} predicts {} classes but {} has {}",
        model_file,
        model.n_classes(),
        LABEL_MAP_FILE,
        labels.len()
    );

    // only the sampled explainer uses the background
    let background = match backend {
        Backend::Tree => None,
        Backend::Neural => read_background(dir, backend, scaler.n_features(), &read),
    };

    Ok(ArtifactSet {
        backend,
        schema,
        model,
        scaler,
        labels,
        background,
    })
}

/// Optional background sample; any problem with it drops it with a warning
fn read_background(
    dir: &Path,
    backend: Backend,
    width: usize,
    read: impl Fn(&str) -> Result<Vec<u8>>,
) -> Option<Background> {
    if !dir.join(BACKGROUND_FILE).is_file() {
        debug!(backend = %backend, "No background sample; sampled attribution disabled");
        return None;
    }
    let loaded = read(BACKGROUND_FILE).and_then(|bytes| {
        Background::from_json(&bytes).with_context(|| format!("{} is malformed", BACKGROUND_FILE))
    });
    match loaded {
        Ok(background) if background.width() == width => Some(background),
        Ok(background) => {
            warn!(
                backend = %backend,
                expected = width,
                actual = background.width(),
                "Ignoring background sample with the wrong width"
            );
            None
        }
        Err(e) => {
            warn!(backend = %backend, error = %format!("{:#}", e), "Ignoring unreadable background sample");
            None
        }
    }
}

fn read_checksums(dir: &Path) -> Result<Option<HashMap<String, String>>> {
    let path = dir.join(CHECKSUM_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = fs::read(&path).with_context(|| format!("Failed to read {}", CHECKSUM_FILE))?;
    let checksums = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is malformed", CHECKSUM_FILE))?;
    Ok(Some(checksums))
}

fn read_verified(
    dir: &Path,
    name: &str,
    checksums: Option<&HashMap<String, String>>,
) -> Result<Vec<u8>> {
    let bytes = fs::read(dir.join(name)).with_context(|| format!("Failed to read {}", name))?;
    if let Some(expected) = checksums.and_then(|c| c.get(name)) {
        let computed = compute_checksum(&bytes);
        if !computed.eq_ignore_ascii_case(expected) {
            bail!(
                "checksum mismatch for {}: expected {}, got {}",
                name,
                expected,
                computed
            );
        }
        debug!(file = %name, checksum = %computed, "Artifact checksum validated");
    }
    Ok(bytes)
}

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
