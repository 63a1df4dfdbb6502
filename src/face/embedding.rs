use crate::error::ModelLoadError;
use crate::face::inference::{load_model, InferenceModel, ModelState};
use crate::models::BoundingBox;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Input conventions of the supported recognition networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingFamily {
    /// 112x112 RGB, scaled to `[0, 1]`.
    Modern,
    /// 160x160 RGB, `(p - 127.5) / 128`.
    Legacy,
}

impl EmbeddingFamily {
    pub fn input_size(&self) -> u32 {
        match self {
            EmbeddingFamily::Modern => 112,
            EmbeddingFamily::Legacy => 160,
        }
    }

    fn scale_pixel(&self, p: u8) -> f32 {
        match self {
            EmbeddingFamily::Modern => p as f32 / 255.0,
            EmbeddingFamily::Legacy => (p as f32 - 127.5) / 128.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingFamily::Modern => "modern",
            EmbeddingFamily::Legacy => "legacy",
        }
    }
}

impl FromStr for EmbeddingFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "modern" => Ok(EmbeddingFamily::Modern),
            "legacy" => Ok(EmbeddingFamily::Legacy),
            other => anyhow::bail!("unknown embedding family: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    pub family: EmbeddingFamily,
    pub model_name: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self { family: EmbeddingFamily::Modern, model_name: "face_recognition".to_string() }
    }
}

pub struct EmbeddingExtractor {
    state: ModelState<Box<dyn InferenceModel>>,
    config: ExtractorConfig,
}

impl EmbeddingExtractor {
    pub fn disabled(config: ExtractorConfig) -> Self {
        Self { state: ModelState::Disabled, config }
    }

    pub fn with_model(model: Box<dyn InferenceModel>, config: ExtractorConfig) -> Self {
        Self { state: ModelState::Loaded(model), config }
    }

    pub fn load(path: Option<&Path>, config: ExtractorConfig) -> Result<Self, ModelLoadError> {
        let state = load_model(path, "face recognition")?;
        Ok(Self { state, config })
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }

    /// Returns the L2-normalized identity vector for a face crop, or `None`
    /// when disabled or when inference fails.
    pub fn extract_embedding(&mut self, face: &DynamicImage) -> Option<Vec<f32>> {
        let model = match &mut self.state {
            ModelState::Disabled => return None,
            ModelState::Loaded(m) => m,
        };
        let (shape, input) = preprocess_face(face, self.config.family);
        let outputs = match model.run(shape, input) {
            Ok(o) => o,
            Err(e) => {
                warn!("Embedding inference failed: {:#}", e);
                return None;
            }
        };
        let raw = outputs.into_iter().next().map(|t| t.data).unwrap_or_default();
        if raw.is_empty() {
            warn!("Recognition model produced an empty embedding");
            return None;
        }
        Some(normalize(raw))
    }
}

/// Squash-resizes the crop to the family's square input and lays it out as
/// RGB NCHW.
pub fn preprocess_face(face: &DynamicImage, family: EmbeddingFamily) -> ([i64; 4], Vec<f32>) {
    let size = family.input_size();
    let rgb = face.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let s = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, s, s));
    for (x, y, p) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = family.scale_pixel(p[c]);
        }
    }
    ([1, 3, size as i64, size as i64], tensor.into_raw_vec())
}

/// Scales `v` to unit length. A zero vector comes back unchanged.
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Dot product of two normalized vectors. Mismatched or empty input gives 0.
pub fn calculate_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cuts the face region out of the full image, clamped to its bounds.
pub fn crop_face(image: &DynamicImage, bbox: &BoundingBox) -> Option<DynamicImage> {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x1 = (bbox.x as i64).clamp(0, w);
    let y1 = (bbox.y as i64).clamp(0, h);
    let x2 = (bbox.x2() as i64).clamp(0, w);
    let y2 = (bbox.y2() as i64).clamp(0, h);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(image.crop_imm(x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
}
