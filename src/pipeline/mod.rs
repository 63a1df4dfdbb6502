pub mod face;
pub mod metadata;
pub mod pool;
pub mod thumb;

pub use pool::{ModelFactory, PoolConfig, WorkerPool};

use crate::db::FaceRepository;
use crate::error::{ModelLoadError, TaskError};
use crate::face::{DetectorConfig, EmbeddingExtractor, ExtractorConfig, FaceDetector};
use crate::models::TaskKind;
use crate::storage::AssetStore;
use image::DynamicImage;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What to do with an image. Each variant carries only its own parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSpec {
    Thumbnail { max_size: u32 },
    Metadata,
    FaceDetection,
}

impl TaskSpec {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskSpec::Thumbnail { .. } => TaskKind::Thumbnail,
            TaskSpec::Metadata => TaskKind::Metadata,
            TaskSpec::FaceDetection => TaskKind::FaceDetection,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub image_path: PathBuf,
    /// Identifies the image in the task table and the pending set.
    pub entity_key: String,
    pub spec: TaskSpec,
}

impl Job {
    pub fn new(image_path: impl Into<PathBuf>, spec: TaskSpec) -> Self {
        let image_path = image_path.into();
        let entity_key = image_path.to_string_lossy().into_owned();
        Self { image_path, entity_key, spec }
    }

    pub fn key(&self) -> (String, TaskKind) {
        (self.entity_key.clone(), self.spec.kind())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDepths {
    pub queued: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct QueueGauges {
    pub queued: AtomicUsize,
    pub completed: AtomicUsize,
    pub failed: AtomicUsize,
}

impl QueueGauges {
    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            queued: self.queued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Where each worker finds its networks and how it configures them.
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    pub detector_path: Option<PathBuf>,
    pub legacy_detector_path: Option<PathBuf>,
    pub recognition_path: Option<PathBuf>,
    pub detector: DetectorConfig,
    pub extractor: ExtractorConfig,
}

/// Inference state owned by a single worker thread.
pub struct WorkerModels {
    pub detector: FaceDetector,
    pub extractor: EmbeddingExtractor,
}

impl WorkerModels {
    pub fn disabled() -> Self {
        Self {
            detector: FaceDetector::disabled(DetectorConfig::default()),
            extractor: EmbeddingExtractor::disabled(ExtractorConfig::default()),
        }
    }

    pub fn load(config: &ModelConfig) -> Result<Self, ModelLoadError> {
        let detector = FaceDetector::load(
            config.detector_path.as_deref(),
            config.legacy_detector_path.as_deref(),
            config.detector.clone(),
        )?;
        let extractor = EmbeddingExtractor::load(config.recognition_path.as_deref(), config.extractor.clone())?;
        Ok(Self { detector, extractor })
    }
}

/// Collaborators shared by every worker.
#[derive(Clone)]
pub struct TaskContext {
    pub repo: Arc<dyn FaceRepository>,
    pub assets: Arc<dyn AssetStore>,
}

/// Opens and decodes an image, sorting failures into missing, unreadable
/// and undecodable.
pub fn open_image(path: &Path) -> Result<DynamicImage, TaskError> {
    let reader = image::io::Reader::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => TaskError::SourceMissing(path.to_path_buf()),
        _ => TaskError::Unreadable { path: path.to_path_buf(), message: e.to_string() },
    })?;
    let reader = reader
        .with_guessed_format()
        .map_err(|e| TaskError::Unreadable { path: path.to_path_buf(), message: e.to_string() })?;
    reader
        .decode()
        .map_err(|e| TaskError::Decode { path: path.to_path_buf(), message: e.to_string() })
}
