pub mod face;
pub mod task;

pub use face::{BoundingBox, DetectionResult, EmbeddingCandidate, Face, FaceEmbeddingRecord, Landmark, Pose};
pub use task::{TaskKind, TaskOutcome, TaskRecord, TaskStatus};
