//! Face detection, embedding and matching. Nothing in here knows about the
//! job queue.

pub mod detector;
pub mod embedding;
pub mod geometry;
pub mod inference;
pub mod matcher;
pub mod pose;

pub use detector::{DetectorConfig, DetectorKind, FaceDetector};
pub use embedding::{EmbeddingExtractor, EmbeddingFamily, ExtractorConfig};
pub use inference::{InferenceModel, ModelState, OutputTensor};
pub use matcher::{FaceMatcher, PersonSuggestion, SimilarFace};
