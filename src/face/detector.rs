use crate::error::{ModelLoadError, ShapeError};
use crate::face::geometry::{self, Anchor, AnchorConfig};
use crate::face::inference::{load_model, InferenceModel, ModelState, OutputTensor};
use crate::face::pose;
use crate::models::{DetectionResult, Landmark};
use anyhow::Context;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::{Array4, ArrayView2};
use std::path::Path;
use tracing::{debug, warn};

pub const LEGACY_INPUT_SIZE: u32 = 300;
const LEGACY_MEAN_BGR: [f32; 3] = [104.0, 177.0, 123.0];
const LEGACY_ROW: usize = 7;
const LANDMARK_VALUES: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    pub anchors: AnchorConfig,
    /// BGR mean subtracted from the anchor detector input.
    pub mean: [f32; 3],
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_iou_threshold: 0.5,
            anchors: AnchorConfig::default(),
            mean: [104.0, 117.0, 123.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    /// Anchor-based detector with landmarks and NMS.
    Anchor,
    /// Single-stage fallback. Produces no landmarks and skips NMS.
    Legacy,
}

impl DetectorKind {
    pub fn model_name(&self) -> &'static str {
        match self {
            DetectorKind::Anchor => "retinaface",
            DetectorKind::Legacy => "ssd_legacy",
        }
    }
}

struct LoadedDetector {
    kind: DetectorKind,
    model: Box<dyn InferenceModel>,
    /// Precomputed for the anchor detector; empty for legacy.
    anchors: Vec<Anchor>,
}

pub struct FaceDetector {
    state: ModelState<LoadedDetector>,
    config: DetectorConfig,
}

impl FaceDetector {
    pub fn disabled(config: DetectorConfig) -> Self {
        Self { state: ModelState::Disabled, config }
    }

    pub fn with_model(kind: DetectorKind, model: Box<dyn InferenceModel>, config: DetectorConfig) -> Self {
        let anchors = match kind {
            DetectorKind::Anchor => geometry::generate_anchors(&config.anchors),
            DetectorKind::Legacy => Vec::new(),
        };
        Self {
            state: ModelState::Loaded(LoadedDetector { kind, model, anchors }),
            config,
        }
    }

    /// Prefers the anchor model and falls back to the legacy one only when
    /// the anchor model is unavailable.
    pub fn load(
        anchor_path: Option<&Path>,
        legacy_path: Option<&Path>,
        config: DetectorConfig,
    ) -> Result<Self, ModelLoadError> {
        if let ModelState::Loaded(model) = load_model(anchor_path, "face detector")? {
            return Ok(Self::with_model(DetectorKind::Anchor, model, config));
        }
        if legacy_path.is_some() {
            if let ModelState::Loaded(model) = load_model(legacy_path, "legacy face detector")? {
                warn!("Using legacy face detector; results are not NMS-filtered");
                return Ok(Self::with_model(DetectorKind::Legacy, model, config));
            }
        }
        Ok(Self::disabled(config))
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    pub fn kind(&self) -> Option<DetectorKind> {
        match &self.state {
            ModelState::Loaded(d) => Some(d.kind),
            ModelState::Disabled => None,
        }
    }

    pub fn model_name(&self) -> Option<&'static str> {
        self.kind().map(|k| k.model_name())
    }

    /// Finds faces in `image`. Disabled detectors and failed inference both
    /// yield an empty list.
    pub fn detect(&mut self, image: &DynamicImage) -> Vec<DetectionResult> {
        let config = &self.config;
        let loaded = match &mut self.state {
            ModelState::Disabled => return Vec::new(),
            ModelState::Loaded(d) => d,
        };
        let result = match loaded.kind {
            DetectorKind::Anchor => run_anchor(loaded, image, config),
            DetectorKind::Legacy => run_legacy(loaded, image, config),
        };
        match result {
            Ok(faces) => {
                debug!("{} detector found {} faces", loaded.kind.model_name(), faces.len());
                faces
            }
            Err(e) => {
                warn!("Face detection produced no usable output: {:#}", e);
                Vec::new()
            }
        }
    }
}

fn run_anchor(
    loaded: &mut LoadedDetector,
    image: &DynamicImage,
    config: &DetectorConfig,
) -> anyhow::Result<Vec<DetectionResult>> {
    let (shape, input) = preprocess_bgr(image, config.anchors.width, config.anchors.height, config.mean);
    let outputs = loaded.model.run(shape, input)?;

    let loc = find_output(&outputs, 4).ok_or(ShapeError::MissingOutput("box"))?;
    let conf = find_output(&outputs, 2).ok_or(ShapeError::MissingOutput("score"))?;
    let landm = find_output(&outputs, LANDMARK_VALUES as i64);

    let faces = decode_anchor_outputs(
        &loc.data,
        &conf.data,
        landm.map(|t| t.data.as_slice()),
        &loaded.anchors,
        image.width(),
        image.height(),
        config,
    )
    .context("anchor detector output")?;
    Ok(faces)
}

fn run_legacy(
    loaded: &mut LoadedDetector,
    image: &DynamicImage,
    config: &DetectorConfig,
) -> anyhow::Result<Vec<DetectionResult>> {
    let (shape, input) = preprocess_bgr(image, LEGACY_INPUT_SIZE, LEGACY_INPUT_SIZE, LEGACY_MEAN_BGR);
    let outputs = loaded.model.run(shape, input)?;
    let raw = find_output(&outputs, LEGACY_ROW as i64)
        .or_else(|| outputs.first())
        .ok_or(ShapeError::MissingOutput("detection"))?;
    let faces = decode_legacy_output(&raw.data, image.width(), image.height(), config.confidence_threshold)
        .context("legacy detector output")?;
    Ok(faces)
}

fn find_output(outputs: &[OutputTensor], last_dim: i64) -> Option<&OutputTensor> {
    outputs.iter().find(|t| t.last_dim() == last_dim)
}

/// Squash-resizes to `width`x`height` and lays the BGR pixels, minus `mean`,
/// out as NCHW.
pub fn preprocess_bgr(image: &DynamicImage, width: u32, height: u32, mean: [f32; 3]) -> ([i64; 4], Vec<f32>) {
    let rgb = image.resize_exact(width, height, FilterType::Triangle).to_rgb8();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, p) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = p[2] as f32 - mean[0];
        tensor[[0, 1, y, x]] = p[1] as f32 - mean[1];
        tensor[[0, 2, y, x]] = p[0] as f32 - mean[2];
    }
    ([1, 3, height as i64, width as i64], tensor.into_raw_vec())
}

fn check_len(tensor: &'static str, data: &[f32], rows: usize, width: usize) -> Result<(), ShapeError> {
    if data.len() != rows * width {
        return Err(ShapeError::Mismatch { tensor, expected: rows * width, actual: data.len() });
    }
    Ok(())
}

/// Maps per-anchor predictions back onto `anchors` by index, thresholds,
/// decodes and applies NMS. Any length mismatch is rejected.
pub fn decode_anchor_outputs(
    loc: &[f32],
    conf: &[f32],
    landm: Option<&[f32]>,
    anchors: &[Anchor],
    img_w: u32,
    img_h: u32,
    config: &DetectorConfig,
) -> Result<Vec<DetectionResult>, ShapeError> {
    let n = anchors.len();
    check_len("box", loc, n, 4)?;
    check_len("score", conf, n, 2)?;
    if let Some(landm) = landm {
        check_len("landmark", landm, n, LANDMARK_VALUES)?;
    }
    let mismatch = |tensor, width: usize, actual| ShapeError::Mismatch { tensor, expected: n * width, actual };
    let loc = ArrayView2::from_shape((n, 4), loc).map_err(|_| mismatch("box", 4, loc.len()))?;
    let conf = ArrayView2::from_shape((n, 2), conf).map_err(|_| mismatch("score", 2, conf.len()))?;
    let landm = landm
        .map(|l| ArrayView2::from_shape((n, LANDMARK_VALUES), l).map_err(|_| mismatch("landmark", LANDMARK_VALUES, l.len())))
        .transpose()?;

    let image_area = img_w as f32 * img_h as f32;
    let variances = config.anchors.variances;
    let mut candidates = Vec::new();

    for (i, anchor) in anchors.iter().enumerate() {
        let score = conf[[i, 1]];
        if !(score >= config.confidence_threshold) {
            continue;
        }
        let raw = [loc[[i, 0]], loc[[i, 1]], loc[[i, 2]], loc[[i, 3]]];
        let corners = geometry::decode_box(raw, anchor, variances);
        let Some(bbox) = geometry::scale_and_clip(corners, img_w, img_h) else {
            continue;
        };

        let landmarks: Vec<Landmark> = match &landm {
            Some(landm) => geometry::decode_landmarks(&landm.row(i).to_vec(), anchor, variances)
                .into_iter()
                .map(|(x, y)| Landmark { x: x * img_w as f32, y: y * img_h as f32 })
                .collect(),
            None => Vec::new(),
        };

        let confidence = score.clamp(0.0, 1.0);
        let quality = if image_area > 0.0 {
            Some(confidence * (bbox.area() as f32 / image_area) * 100.0)
        } else {
            None
        };

        candidates.push(DetectionResult {
            bbox,
            confidence,
            quality,
            pose: pose::estimate(&landmarks),
            landmarks,
            embedding: None,
            model: DetectorKind::Anchor.model_name().to_string(),
        });
    }

    Ok(geometry::non_max_suppression(candidates, config.nms_iou_threshold))
}

/// Decodes `[_, _, confidence, x1, y1, x2, y2]` rows. No NMS.
pub fn decode_legacy_output(
    raw: &[f32],
    img_w: u32,
    img_h: u32,
    threshold: f32,
) -> Result<Vec<DetectionResult>, ShapeError> {
    if raw.len() % LEGACY_ROW != 0 {
        return Err(ShapeError::Ragged { tensor: "detection", len: raw.len(), row: LEGACY_ROW });
    }
    let mut faces = Vec::new();
    for row in raw.chunks_exact(LEGACY_ROW) {
        let score = row[2];
        if !(score >= threshold) {
            continue;
        }
        let Some(bbox) = geometry::scale_and_clip([row[3], row[4], row[5], row[6]], img_w, img_h) else {
            continue;
        };
        faces.push(DetectionResult {
            bbox,
            confidence: score.clamp(0.0, 1.0),
            quality: None,
            landmarks: Vec::new(),
            pose: None,
            embedding: None,
            model: DetectorKind::Legacy.model_name().to_string(),
        });
    }
    Ok(faces)
}
