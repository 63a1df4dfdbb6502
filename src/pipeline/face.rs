use crate::db::FaceRepository;
use crate::error::TaskError;
use crate::face::embedding::crop_face;
use crate::pipeline::{open_image, WorkerModels};
use serde_json::json;
use std::path::Path;
use tracing::{debug, info};

/// Detects faces in one image, embeds them when a recognition model is
/// loaded, and replaces the image's untagged faces with the new set.
pub fn run_detection(
    path: &Path,
    image_key: &str,
    models: &mut WorkerModels,
    repo: &dyn FaceRepository,
) -> Result<serde_json::Value, TaskError> {
    if !models.detector.is_enabled() {
        return Err(TaskError::DetectorDisabled);
    }
    let image = open_image(path)?;

    let mut faces = models.detector.detect(&image);
    if models.extractor.is_enabled() {
        for face in faces.iter_mut() {
            match crop_face(&image, &face.bbox) {
                Some(crop) => face.embedding = models.extractor.extract_embedding(&crop),
                None => debug!("Face box {:?} falls outside {:?}", face.bbox, path),
            }
        }
    }
    let embedded = faces.iter().filter(|f| f.embedding.is_some()).count();

    let face_ids = repo
        .replace_untagged_faces(image_key, &faces, models.extractor.model_name())
        .map_err(|e| TaskError::Persistence(format!("{:#}", e)))?;

    info!("Detected {} faces ({} embedded) in {:?}", face_ids.len(), embedded, path);
    Ok(json!({
        "faces": face_ids.len(),
        "face_ids": face_ids,
        "embeddings": embedded,
        "model": models.detector.model_name(),
    }))
}
