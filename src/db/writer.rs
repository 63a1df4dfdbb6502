use crate::models::{DetectionResult, TaskKind, TaskOutcome, TaskStatus};
use anyhow::Result;
use rusqlite::{params, Connection};

pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn insert_person(conn: &Connection, name: Option<&str>) -> Result<i64> {
    let created_at = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO persons (name, created_at) VALUES (?1, ?2)",
        params![name, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn add_person_alias(conn: &Connection, person_id: i64, alias: &str) -> Result<i64> {
    let created_at = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO person_aliases (person_id, alias, created_at) VALUES (?1, ?2, ?3)",
        params![person_id, alias, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Inserts one detected face and, when it carries a vector, its embedding.
pub fn insert_face(conn: &Connection, image_path: &str, det: &DetectionResult, embedding_model: &str) -> Result<i64> {
    let now = chrono::Utc::now().timestamp();
    let landmarks_json = if det.landmarks.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&det.landmarks)?)
    };
    let pose_json = det.pose.as_ref().map(serde_json::to_string).transpose()?;
    let recognition_confidence = det.embedding.as_ref().map(|_| det.confidence as f64);

    conn.execute(
        "INSERT INTO faces (image_path, person_id, x, y, width, height, confidence, recognition_confidence,
                            quality, landmarks_json, pose_json, model, created_at, updated_at)
         VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            image_path,
            det.bbox.x,
            det.bbox.y,
            det.bbox.width,
            det.bbox.height,
            det.confidence as f64,
            recognition_confidence,
            det.quality.map(|q| q as f64),
            landmarks_json,
            pose_json,
            det.model,
            now,
        ],
    )?;
    let face_id = conn.last_insert_rowid();

    if let Some(vector) = &det.embedding {
        conn.execute(
            "INSERT INTO face_embeddings (face_id, embedding_blob, dim, model, quality, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                face_id,
                encode_embedding(vector),
                vector.len() as i64,
                embedding_model,
                det.quality.map(|q| q as f64),
                now,
            ],
        )?;
    }
    Ok(face_id)
}

/// Deletes every live untagged face (and its embedding) recorded for
/// `image_path`. Soft-deleted faces stay as tombstones.
pub fn delete_untagged_faces(conn: &Connection, image_path: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM face_embeddings WHERE face_id IN
           (SELECT id FROM faces WHERE image_path = ?1 AND person_id IS NULL AND deleted_at IS NULL)",
        params![image_path],
    )?;
    let deleted = conn.execute(
        "DELETE FROM faces WHERE image_path = ?1 AND person_id IS NULL AND deleted_at IS NULL",
        params![image_path],
    )?;
    Ok(deleted)
}

/// Swaps the untagged faces of an image for a fresh detection run in one
/// transaction. Tagged faces are left alone.
pub fn replace_untagged_faces(
    conn: &Connection,
    image_path: &str,
    detections: &[DetectionResult],
    embedding_model: &str,
) -> Result<Vec<i64>> {
    let tx = conn.unchecked_transaction()?;
    delete_untagged_faces(&tx, image_path)?;
    let mut ids = Vec::with_capacity(detections.len());
    for det in detections {
        ids.push(insert_face(&tx, image_path, det, embedding_model)?);
    }
    tx.commit()?;
    Ok(ids)
}

pub fn update_face_person(conn: &Connection, face_id: i64, person_id: Option<i64>) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let updated = conn.execute(
        "UPDATE faces SET person_id = ?1, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
        params![person_id, now, face_id],
    )?;
    Ok(updated > 0)
}

/// Tags `face_id` only if nobody else has claimed it in the meantime.
pub fn tag_face_if_untagged(conn: &Connection, face_id: i64, person_id: i64) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let updated = conn.execute(
        "UPDATE faces SET person_id = ?1, updated_at = ?2
         WHERE id = ?3 AND person_id IS NULL AND deleted_at IS NULL",
        params![person_id, now, face_id],
    )?;
    Ok(updated > 0)
}

/// Soft-deletes a face together with its embedding.
pub fn soft_delete_face(conn: &Connection, face_id: i64) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let tx = conn.unchecked_transaction()?;
    let updated = tx.execute(
        "UPDATE faces SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        params![now, face_id],
    )?;
    tx.execute(
        "UPDATE face_embeddings SET deleted_at = ?1 WHERE face_id = ?2 AND deleted_at IS NULL",
        params![now, face_id],
    )?;
    tx.commit()?;
    Ok(updated > 0)
}

// Moves a task into a non-terminal state, clearing the previous run's outcome.
fn reset_task(conn: &Connection, image_path: &str, task: TaskKind, status: TaskStatus) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO image_tasks (image_path, task, status, error, result_json, processed_at, updated_at)
         VALUES (?1, ?2, ?3, NULL, NULL, NULL, ?4)
         ON CONFLICT(image_path, task) DO UPDATE SET
           status = ?3, error = NULL, result_json = NULL, processed_at = NULL, updated_at = ?4",
        params![image_path, task.as_str(), status.as_str(), now],
    )?;
    Ok(())
}

pub fn mark_task_pending(conn: &Connection, image_path: &str, task: TaskKind) -> Result<()> {
    reset_task(conn, image_path, task, TaskStatus::Pending)
}

pub fn mark_task_processing(conn: &Connection, image_path: &str, task: TaskKind) -> Result<()> {
    reset_task(conn, image_path, task, TaskStatus::Processing)
}

pub fn update_task_result(conn: &Connection, image_path: &str, task: TaskKind, outcome: &TaskOutcome) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let (error, result) = match outcome {
        TaskOutcome::Done(value) => (None, Some(value)),
        TaskOutcome::Failed(message) => (Some(message.as_str()), None),
    };
    conn.execute(
        "INSERT INTO image_tasks (image_path, task, status, error, result_json, processed_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(image_path, task) DO UPDATE SET
           status = ?3, error = ?4, result_json = ?5, processed_at = ?6, updated_at = ?6",
        params![image_path, task.as_str(), outcome.status().as_str(), error, result, now],
    )?;
    Ok(())
}
