#![allow(dead_code)]

use nazr_faces::db::{self, SqliteFaceRepository};
use nazr_faces::face::geometry::AnchorConfig;
use nazr_faces::face::{
    DetectorConfig, DetectorKind, EmbeddingExtractor, ExtractorConfig, FaceDetector, InferenceModel, OutputTensor,
};
use nazr_faces::pipeline::{ModelFactory, TaskContext, WorkerModels};
use nazr_faces::storage::FsAssetStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Reference resolution the fake detector is built for.
pub const FAKE_INPUT_SIZE: u32 = 64;

pub struct TestEnv {
    pub tmp: TempDir,
    pub repo: Arc<SqliteFaceRepository>,
    pub assets: Arc<FsAssetStore>,
    pub photos: PathBuf,
}

impl TestEnv {
    pub fn ctx(&self) -> TaskContext {
        TaskContext { repo: self.repo.clone(), assets: self.assets.clone() }
    }

    pub fn photo(&self, name: &str, width: u32, height: u32) -> PathBuf {
        let path = self.photos.join(name);
        create_test_image(&path, width, height);
        path
    }
}

/// Temporary database, asset store and photo directory.
pub fn setup_test_env() -> TestEnv {
    nazr_faces::utils::logging::try_init();
    let tmp = TempDir::new().unwrap();
    let db_dir = tmp.path().join("db");
    let photos = tmp.path().join("photos");
    std::fs::create_dir_all(&db_dir).unwrap();
    std::fs::create_dir_all(&photos).unwrap();
    let pool = db::create_pool(db_dir.join("nazr.db"), 4).unwrap();
    let repo = Arc::new(SqliteFaceRepository::new(pool));
    let assets = Arc::new(FsAssetStore::new(tmp.path().join("derived")));
    TestEnv { tmp, repo, assets, photos }
}

/// Writes a gradient PNG.
pub fn create_test_image(path: &Path, width: u32, height: u32) {
    let img = image::RgbImage::from_fn(width, height, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    img.save(path).unwrap();
}

/// Polls `condition` until it holds. Returns whether it did.
pub fn wait_for_condition<F>(mut condition: F, max_attempts: usize, delay_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..max_attempts {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(delay_ms));
    }
    condition()
}

pub fn factory<F>(f: F) -> ModelFactory
where
    F: Fn(usize) -> anyhow::Result<WorkerModels> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Anchor detector stand-in: every anchor is background except `hits`.
pub struct FakeAnchorModel {
    pub hits: Vec<(usize, f32)>,
}

impl InferenceModel for FakeAnchorModel {
    fn run(&mut self, shape: [i64; 4], _input: Vec<f32>) -> anyhow::Result<Vec<OutputTensor>> {
        let cfg = AnchorConfig { width: shape[3] as u32, height: shape[2] as u32, ..AnchorConfig::default() };
        let n = cfg.anchor_count();
        let mut conf = vec![0.0; n * 2];
        for i in 0..n {
            conf[i * 2] = 1.0;
        }
        for &(idx, score) in &self.hits {
            conf[idx * 2] = 1.0 - score;
            conf[idx * 2 + 1] = score;
        }
        Ok(vec![
            OutputTensor { name: "loc".into(), shape: vec![1, n as i64, 4], data: vec![0.0; n * 4] },
            OutputTensor { name: "conf".into(), shape: vec![1, n as i64, 2], data: conf },
            OutputTensor { name: "landms".into(), shape: vec![1, n as i64, 10], data: vec![0.0; n * 10] },
        ])
    }
}

/// Recognition stand-in returning the same vector for every crop.
pub struct FakeEmbeddingModel(pub Vec<f32>);

impl InferenceModel for FakeEmbeddingModel {
    fn run(&mut self, _shape: [i64; 4], _input: Vec<f32>) -> anyhow::Result<Vec<OutputTensor>> {
        Ok(vec![OutputTensor { name: "embedding".into(), shape: vec![1, self.0.len() as i64], data: self.0.clone() }])
    }
}

/// A network that blows up mid-inference.
pub struct PanickingModel;

impl InferenceModel for PanickingModel {
    fn run(&mut self, _shape: [i64; 4], _input: Vec<f32>) -> anyhow::Result<Vec<OutputTensor>> {
        panic!("simulated inference crash");
    }
}

pub fn fake_detector_config() -> DetectorConfig {
    DetectorConfig { anchors: AnchorConfig::square(FAKE_INPUT_SIZE), ..DetectorConfig::default() }
}

/// Two well separated hits for a 64x64 anchor grid: the first stride-8 cell
/// and a large stride-16 anchor further in.
pub const TWO_FACES: [(usize, f32); 2] = [(0, 0.95), (148, 0.8)];

pub fn fake_models(hits: &[(usize, f32)], embedding: Option<Vec<f32>>) -> WorkerModels {
    let detector = FaceDetector::with_model(
        DetectorKind::Anchor,
        Box::new(FakeAnchorModel { hits: hits.to_vec() }),
        fake_detector_config(),
    );
    let extractor = match embedding {
        Some(v) => EmbeddingExtractor::with_model(Box::new(FakeEmbeddingModel(v)), ExtractorConfig::default()),
        None => EmbeddingExtractor::disabled(ExtractorConfig::default()),
    };
    WorkerModels { detector, extractor }
}

/// Unit vector whose dot product with `[1, 0, ...]` is `similarity`.
pub fn vector_with_similarity(similarity: f32, dim: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[0] = similarity;
    v[1] = (1.0 - similarity * similarity).max(0.0).sqrt();
    v
}

pub fn unit_x(dim: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[0] = 1.0;
    v
}
