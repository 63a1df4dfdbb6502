use crate::face::{geometry::AnchorConfig, DetectorConfig, EmbeddingFamily, ExtractorConfig};
use crate::pipeline::{ModelConfig, PoolConfig};
use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Config {
    pub data: PathBuf,
    pub face_threads: usize,
    pub queue_capacity: usize,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    pub detector_model: PathBuf,
    pub legacy_detector_model: PathBuf,
    pub recognition_model: PathBuf,
    pub embedding_family: EmbeddingFamily,
    pub input_size: u32,
    pub thumb_size: u32,
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn unit_interval(key: &str, default: f32) -> f32 {
    parse_var::<f32>(key).filter(|v| (0.0..=1.0).contains(v)).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let data = PathBuf::from(env::var("NAZR_DATA").unwrap_or_else(|_| "/nazr-data".to_string()));
        let models = data.join("models");
        let face_threads = parse_var("NAZR_FACE_THREADS").filter(|&n| n > 0).unwrap_or(2);
        let queue_capacity = parse_var("NAZR_QUEUE_CAPACITY").filter(|&n| n > 0).unwrap_or(4096);
        let confidence_threshold = unit_interval("NAZR_FACE_CONFIDENCE_THRESHOLD", 0.5);
        let nms_iou_threshold = unit_interval("NAZR_FACE_NMS_IOU_THRESHOLD", 0.5);
        let detector_model = env::var("NAZR_FACE_DETECTOR_MODEL")
            .map(PathBuf::from)
            .unwrap_or_else(|_| models.join("retinaface_mobile0.25.onnx"));
        let legacy_detector_model = env::var("NAZR_FACE_LEGACY_DETECTOR_MODEL")
            .map(PathBuf::from)
            .unwrap_or_else(|_| models.join("face_detector_legacy.onnx"));
        let recognition_model = env::var("NAZR_FACE_RECOGNITION_MODEL")
            .map(PathBuf::from)
            .unwrap_or_else(|_| models.join("face_recognition.onnx"));
        let embedding_family = parse_var("NAZR_FACE_EMBEDDING_FAMILY").unwrap_or(EmbeddingFamily::Modern);
        let input_size = parse_var("NAZR_FACE_INPUT_SIZE").filter(|&n| n >= 32).unwrap_or(640);
        let thumb_size = parse_var("NAZR_THUMB_SIZE").filter(|&n| n > 0).unwrap_or(256);
        Self {
            data,
            face_threads,
            queue_capacity,
            confidence_threshold,
            nms_iou_threshold,
            detector_model,
            legacy_detector_model,
            recognition_model,
            embedding_family,
            input_size,
            thumb_size,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data.join("db").join("nazr.db")
    }

    pub fn derived_dir(&self) -> PathBuf {
        self.data.join("derived")
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig { workers: self.face_threads, queue_capacity: self.queue_capacity }
    }

    pub fn model_config(&self) -> ModelConfig {
        let model_name = self
            .recognition_model
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "face_recognition".to_string());
        ModelConfig {
            detector_path: Some(self.detector_model.clone()),
            legacy_detector_path: Some(self.legacy_detector_model.clone()),
            recognition_path: Some(self.recognition_model.clone()),
            detector: DetectorConfig {
                confidence_threshold: self.confidence_threshold,
                nms_iou_threshold: self.nms_iou_threshold,
                anchors: AnchorConfig::square(self.input_size),
                ..DetectorConfig::default()
            },
            extractor: ExtractorConfig { family: self.embedding_family, model_name },
        }
    }
}
