//! Ownership and lifecycle of the two goal regressors.
//!
//! Loaded models live in an async single-initialization cell: concurrent
//! first requests wait on the same in-flight load, so each artifact is read
//! from disk at most once per successful load. A failed load leaves the cell
//! empty and the next caller retries. Under the lazy policy a load whose
//! feature schema cannot be resolved counts as failed too.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, error, info, warn};

use super::booster::TreeEnsemble;
use super::{ModelSide, Regressor};
use crate::config::LoadPolicy;
use crate::features::{schema, FeatureEncoder, FeatureMatrix, SchemaError, SchemaPolicy};

pub const HOME_MODEL_FILE: &str = "home_model.json";
pub const AWAY_MODEL_FILE: &str = "away_model.json";

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("missing model file: {}", .path.display())]
    MissingArtifact { path: PathBuf },
    #[error("invalid model file {}: {reason}", .path.display())]
    InvalidArtifact { path: PathBuf, reason: String },
    #[error("models are not loaded")]
    NotReady,
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Source of decoded regressors.
#[async_trait]
pub trait ArtifactLoader: Send + Sync {
    /// Read and decode one model artifact.
    async fn load(&self, path: &Path) -> Result<Arc<dyn Regressor>, StoreError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Size and modification time of one artifact file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ArtifactStamp {
    len: u64,
    modified: Option<SystemTime>,
}

async fn artifact_stamp(path: &Path) -> Option<ArtifactStamp> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some(ArtifactStamp {
        len: meta.len(),
        modified: meta.modified().ok(),
    })
}

/// Reads XGBoost JSON artifacts from the local filesystem.
pub struct FsArtifactLoader;

/// Whether `path` exists as a non-empty file.
pub async fn artifact_present(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

#[async_trait]
impl ArtifactLoader for FsArtifactLoader {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn load(&self, path: &Path) -> Result<Arc<dyn Regressor>, StoreError> {
        let missing = || StoreError::MissingArtifact {
            path: path.to_path_buf(),
        };
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(missing()),
            Err(e) => {
                return Err(StoreError::InvalidArtifact {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };
        if !meta.is_file() || meta.len() == 0 {
            return Err(missing());
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::InvalidArtifact {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let model = TreeEnsemble::from_json(&bytes).map_err(|e| StoreError::InvalidArtifact {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(
            "Decoded {} ({} trees, {} features)",
            path.display(),
            model.n_trees(),
            model.feature_names().len()
        );
        Ok(Arc::new(model))
    }
}

/// Both regressors plus the encoder selected from their metadata.
pub struct LoadedModels {
    home: Arc<dyn Regressor>,
    away: Arc<dyn Regressor>,
    encoder: Result<FeatureEncoder, SchemaError>,
    loaded_at: DateTime<Utc>,
}

impl LoadedModels {
    pub fn new(
        home: Arc<dyn Regressor>,
        away: Arc<dyn Regressor>,
        schema_policy: SchemaPolicy,
    ) -> Self {
        let encoder = schema::resolve(schema_policy, home.feature_names())
            .map(|s| FeatureEncoder::for_schema(&s));
        LoadedModels {
            home,
            away,
            encoder,
            loaded_at: Utc::now(),
        }
    }

    pub fn regressor(&self, side: ModelSide) -> &dyn Regressor {
        match side {
            ModelSide::Home => self.home.as_ref(),
            ModelSide::Away => self.away.as_ref(),
        }
    }

    /// The encoder for the resolved schema, or why none could be resolved.
    pub fn encoder(&self) -> Result<&FeatureEncoder, SchemaError> {
        self.encoder.as_ref().map_err(Clone::clone)
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Health snapshot of the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub models_loaded: bool,
    pub artifacts_present: bool,
    pub schema: Option<&'static str>,
    pub feature_count: Option<usize>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub load_attempts: u64,
    pub last_error: Option<String>,
    /// The last load attempt failed and the artifact files have not changed
    /// since.
    pub load_failed: bool,
}

impl StoreStatus {
    /// Whether predictions can currently be served (or, under a lazy policy,
    /// would be once loaded).
    pub fn is_serviceable(&self, policy: LoadPolicy) -> bool {
        if self.models_loaded {
            self.schema.is_some()
        } else {
            policy == LoadPolicy::Lazy && self.artifacts_present && !self.load_failed
        }
    }
}

pub struct ModelStore {
    dir: PathBuf,
    policy: LoadPolicy,
    schema_policy: SchemaPolicy,
    loader: Arc<dyn ArtifactLoader>,
    models: OnceCell<Arc<LoadedModels>>,
    last_error: RwLock<Option<String>>,
    failed_stamps: RwLock<Option<[Option<ArtifactStamp>; 2]>>,
    attempts: AtomicU64,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>, policy: LoadPolicy, schema_policy: SchemaPolicy) -> Self {
        Self::with_loader(dir, policy, schema_policy, Arc::new(FsArtifactLoader))
    }

    pub fn with_loader(
        dir: impl Into<PathBuf>,
        policy: LoadPolicy,
        schema_policy: SchemaPolicy,
        loader: Arc<dyn ArtifactLoader>,
    ) -> Self {
        ModelStore {
            dir: dir.into(),
            policy,
            schema_policy,
            loader,
            models: OnceCell::new(),
            last_error: RwLock::new(None),
            failed_stamps: RwLock::new(None),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> LoadPolicy {
        self.policy
    }

    pub fn artifact_path(&self, side: ModelSide) -> PathBuf {
        match side {
            ModelSide::Home => self.dir.join(HOME_MODEL_FILE),
            ModelSide::Away => self.dir.join(AWAY_MODEL_FILE),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.models.initialized()
    }

    /// The loaded models, if a load has already succeeded.
    pub fn loaded(&self) -> Option<Arc<LoadedModels>> {
        self.models.get().cloned()
    }

    /// Load both artifacts, or return the already-loaded pair.
    pub async fn load(&self) -> Result<Arc<LoadedModels>, StoreError> {
        let models = self.models.get_or_try_init(|| self.load_from_source()).await?;
        Ok(models.clone())
    }

    /// Models for a prediction request under the configured policy: eager
    /// stores never retry here, lazy stores load on demand.
    pub async fn ensure_loaded(&self) -> Result<Arc<LoadedModels>, StoreError> {
        match self.policy {
            LoadPolicy::Eager => self.loaded().ok_or(StoreError::NotReady),
            LoadPolicy::Lazy => self.load().await,
        }
    }

    /// Run one regressor over the full matrix.
    pub fn predict(&self, side: ModelSide, matrix: &FeatureMatrix) -> Result<Vec<f64>, StoreError> {
        let models = self.models.get().ok_or(StoreError::NotReady)?;
        Ok(models.regressor(side).predict(matrix))
    }

    async fn load_from_source(&self) -> Result<Arc<LoadedModels>, StoreError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Loading models from {} (attempt {}, loader={})",
            self.dir.display(),
            attempt,
            self.loader.name()
        );

        let stamps = self.stamps().await;
        let result = self.read_pair().await;
        let mut last_error = self.last_error.write().await;
        let mut failed_stamps = self.failed_stamps.write().await;
        let models = match result {
            Ok(models) => models,
            Err(e) => {
                warn!("Model load attempt {} failed: {}", attempt, e);
                *last_error = Some(e.to_string());
                *failed_stamps = Some(stamps);
                return Err(e);
            }
        };

        match models.encoder() {
            Ok(encoder) => {
                info!("Models loaded: schema={}", encoder.kind().as_str());
                *last_error = None;
                *failed_stamps = None;
            }
            Err(e) => {
                error!("Models loaded but feature schema is unusable: {}", e);
                *last_error = Some(e.to_string());
                if self.policy == LoadPolicy::Lazy {
                    *failed_stamps = Some(stamps);
                    return Err(StoreError::Schema(e));
                }
            }
        }
        Ok(Arc::new(models))
    }

    async fn stamps(&self) -> [Option<ArtifactStamp>; 2] {
        [
            artifact_stamp(&self.artifact_path(ModelSide::Home)).await,
            artifact_stamp(&self.artifact_path(ModelSide::Away)).await,
        ]
    }

    async fn read_pair(&self) -> Result<LoadedModels, StoreError> {
        let home_path = self.artifact_path(ModelSide::Home);
        let away_path = self.artifact_path(ModelSide::Away);
        let home = self.loader.load(&home_path).await?;
        let away = self.loader.load(&away_path).await?;

        // Both regressors must consume the same encoded matrix.
        let (home_names, away_names) = (home.feature_names(), away.feature_names());
        if !home_names.is_empty() && !away_names.is_empty() && home_names != away_names {
            return Err(StoreError::InvalidArtifact {
                path: away_path,
                reason: "feature names differ from the home model".into(),
            });
        }
        Ok(LoadedModels::new(home, away, self.schema_policy))
    }

    /// Whether both artifact files exist and are non-empty, without reading them.
    pub async fn artifacts_present(&self) -> bool {
        artifact_present(&self.artifact_path(ModelSide::Home)).await
            && artifact_present(&self.artifact_path(ModelSide::Away)).await
    }

    pub async fn status(&self) -> StoreStatus {
        let loaded = self.loaded();
        let encoder = loaded.as_ref().and_then(|m| m.encoder().ok());
        let failed_stamps = self.failed_stamps.read().await.clone();
        let load_failed = match failed_stamps {
            Some(failed) => failed == self.stamps().await,
            None => false,
        };
        StoreStatus {
            models_loaded: self.is_ready(),
            artifacts_present: self.artifacts_present().await,
            schema: encoder.map(|e| e.kind().as_str()),
            feature_count: encoder.map(FeatureEncoder::width),
            loaded_at: loaded.as_ref().map(|m| m.loaded_at()),
            load_attempts: self.attempts.load(Ordering::SeqCst),
            last_error: self.last_error.read().await.clone(),
            load_failed,
        }
    }
}
