use crate::db::{query, writer, DbPool};
use crate::models::{
    DetectionResult, EmbeddingCandidate, Face, FaceEmbeddingRecord, TaskKind, TaskOutcome, TaskRecord,
};
use anyhow::{Context, Result};

/// Everything the pipeline and the matcher need from storage.
pub trait FaceRepository: Send + Sync {
    fn mark_task_pending(&self, image_path: &str, task: TaskKind) -> Result<()>;
    fn mark_task_processing(&self, image_path: &str, task: TaskKind) -> Result<()>;
    fn update_task_result(&self, image_path: &str, task: TaskKind, outcome: &TaskOutcome) -> Result<()>;
    fn task_status(&self, image_path: &str, task: TaskKind) -> Result<Option<TaskRecord>>;

    /// Replaces the untagged faces of an image atomically; returns new face ids.
    fn replace_untagged_faces(
        &self,
        image_path: &str,
        detections: &[DetectionResult],
        embedding_model: &str,
    ) -> Result<Vec<i64>>;
    fn delete_untagged_faces(&self, image_path: &str) -> Result<usize>;

    fn tag_face(&self, face_id: i64, person_id: i64) -> Result<bool>;
    /// Like `tag_face` but leaves faces that already have an owner alone.
    fn tag_untagged_face(&self, face_id: i64, person_id: i64) -> Result<bool>;
    fn untag_face(&self, face_id: i64) -> Result<bool>;

    fn get_face(&self, face_id: i64) -> Result<Option<Face>>;
    fn faces_for_image(&self, image_path: &str) -> Result<Vec<Face>>;
    fn faces_for_person(&self, person_id: i64) -> Result<Vec<Face>>;
    fn embedding_for_face(&self, face_id: i64) -> Result<Option<FaceEmbeddingRecord>>;
    fn embedding_candidates(&self) -> Result<Vec<EmbeddingCandidate>>;
    fn person_display_name(&self, person_id: i64) -> Result<Option<String>>;
}

#[derive(Clone)]
pub struct SqliteFaceRepository {
    pool: DbPool,
}

impl SqliteFaceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>> {
        self.pool.get().context("Failed to get database connection")
    }

    pub fn insert_person(&self, name: Option<&str>) -> Result<i64> {
        writer::insert_person(&*self.conn()?, name)
    }

    pub fn add_person_alias(&self, person_id: i64, alias: &str) -> Result<i64> {
        writer::add_person_alias(&*self.conn()?, person_id, alias)
    }

    pub fn soft_delete_face(&self, face_id: i64) -> Result<bool> {
        writer::soft_delete_face(&*self.conn()?, face_id)
    }
}

impl FaceRepository for SqliteFaceRepository {
    fn mark_task_pending(&self, image_path: &str, task: TaskKind) -> Result<()> {
        writer::mark_task_pending(&*self.conn()?, image_path, task)
    }

    fn mark_task_processing(&self, image_path: &str, task: TaskKind) -> Result<()> {
        writer::mark_task_processing(&*self.conn()?, image_path, task)
    }

    fn update_task_result(&self, image_path: &str, task: TaskKind, outcome: &TaskOutcome) -> Result<()> {
        writer::update_task_result(&*self.conn()?, image_path, task, outcome)
    }

    fn task_status(&self, image_path: &str, task: TaskKind) -> Result<Option<TaskRecord>> {
        query::task_status(&*self.conn()?, image_path, task)
    }

    fn replace_untagged_faces(
        &self,
        image_path: &str,
        detections: &[DetectionResult],
        embedding_model: &str,
    ) -> Result<Vec<i64>> {
        writer::replace_untagged_faces(&*self.conn()?, image_path, detections, embedding_model)
    }

    fn delete_untagged_faces(&self, image_path: &str) -> Result<usize> {
        writer::delete_untagged_faces(&*self.conn()?, image_path)
    }

    fn tag_face(&self, face_id: i64, person_id: i64) -> Result<bool> {
        writer::update_face_person(&*self.conn()?, face_id, Some(person_id))
    }

    fn tag_untagged_face(&self, face_id: i64, person_id: i64) -> Result<bool> {
        writer::tag_face_if_untagged(&*self.conn()?, face_id, person_id)
    }

    fn untag_face(&self, face_id: i64) -> Result<bool> {
        writer::update_face_person(&*self.conn()?, face_id, None)
    }

    fn get_face(&self, face_id: i64) -> Result<Option<Face>> {
        query::get_face(&*self.conn()?, face_id)
    }

    fn faces_for_image(&self, image_path: &str) -> Result<Vec<Face>> {
        query::faces_for_image(&*self.conn()?, image_path)
    }

    fn faces_for_person(&self, person_id: i64) -> Result<Vec<Face>> {
        query::faces_for_person(&*self.conn()?, person_id)
    }

    fn embedding_for_face(&self, face_id: i64) -> Result<Option<FaceEmbeddingRecord>> {
        query::embedding_for_face(&*self.conn()?, face_id)
    }

    fn embedding_candidates(&self) -> Result<Vec<EmbeddingCandidate>> {
        query::embedding_candidates(&*self.conn()?)
    }

    fn person_display_name(&self, person_id: i64) -> Result<Option<String>> {
        query::person_display_name(&*self.conn()?, person_id)
    }
}
