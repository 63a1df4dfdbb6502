use crate::models::{BoundingBox, EmbeddingCandidate, Face, FaceEmbeddingRecord, TaskKind, TaskRecord};
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

const FACE_COLUMNS: &str = "id, person_id, image_path, x, y, width, height, confidence, recognition_confidence,
                            quality, landmarks_json, pose_json, created_at, updated_at";

fn row_to_face(row: &Row<'_>) -> rusqlite::Result<Face> {
    let landmarks_json: Option<String> = row.get(10)?;
    let pose_json: Option<String> = row.get(11)?;
    Ok(Face {
        id: row.get(0)?,
        person_id: row.get(1)?,
        image_path: row.get(2)?,
        bbox: BoundingBox {
            x: row.get(3)?,
            y: row.get(4)?,
            width: row.get(5)?,
            height: row.get(6)?,
        },
        confidence: row.get::<_, f64>(7)? as f32,
        recognition_confidence: row.get::<_, Option<f64>>(8)?.map(|v| v as f32),
        quality: row.get::<_, Option<f64>>(9)?.map(|v| v as f32),
        landmarks: landmarks_json.and_then(|s| serde_json::from_str(&s).ok()),
        pose: pose_json.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn collect_faces(conn: &Connection, sql: &str, param: &dyn rusqlite::ToSql) -> Result<Vec<Face>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([param], row_to_face)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn get_face(conn: &Connection, face_id: i64) -> Result<Option<Face>> {
    let sql = format!("SELECT {} FROM faces WHERE id = ?1 AND deleted_at IS NULL", FACE_COLUMNS);
    let face = conn.query_row(&sql, params![face_id], row_to_face).optional()?;
    Ok(face)
}

pub fn faces_for_image(conn: &Connection, image_path: &str) -> Result<Vec<Face>> {
    let sql = format!(
        "SELECT {} FROM faces WHERE image_path = ?1 AND deleted_at IS NULL ORDER BY id",
        FACE_COLUMNS
    );
    collect_faces(conn, &sql, &image_path)
}

pub fn faces_for_person(conn: &Connection, person_id: i64) -> Result<Vec<Face>> {
    let sql = format!(
        "SELECT {} FROM faces WHERE person_id = ?1 AND deleted_at IS NULL ORDER BY id",
        FACE_COLUMNS
    );
    collect_faces(conn, &sql, &person_id)
}

pub fn decode_embedding_blob(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        anyhow::bail!("Embedding blob length is not a multiple of 4");
    }
    let mut embedding = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        let bytes: [u8; 4] = [chunk[0], chunk[1], chunk[2], chunk[3]];
        embedding.push(f32::from_le_bytes(bytes));
    }
    Ok(embedding)
}

pub fn embedding_for_face(conn: &Connection, face_id: i64) -> Result<Option<FaceEmbeddingRecord>> {
    let row: Option<(Vec<u8>, String, Option<f64>)> = conn
        .query_row(
            "SELECT e.embedding_blob, e.model, e.quality FROM face_embeddings e
             JOIN faces f ON f.id = e.face_id
             WHERE e.face_id = ?1 AND e.deleted_at IS NULL AND f.deleted_at IS NULL",
            params![face_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    match row {
        Some((blob, model, quality)) => Ok(Some(FaceEmbeddingRecord {
            face_id,
            vector: decode_embedding_blob(&blob)?,
            model,
            quality: quality.map(|q| q as f32),
        })),
        None => Ok(None),
    }
}

/// All live embeddings with their current owner. Undecodable blobs are
/// skipped.
pub fn embedding_candidates(conn: &Connection) -> Result<Vec<EmbeddingCandidate>> {
    let mut stmt = conn.prepare(
        "SELECT f.id, f.person_id, e.embedding_blob FROM face_embeddings e
         JOIN faces f ON f.id = e.face_id
         WHERE e.deleted_at IS NULL AND f.deleted_at IS NULL
         ORDER BY f.id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?, row.get::<_, Vec<u8>>(2)?))
    })?;
    let mut out = Vec::new();
    for r in rows {
        let (face_id, person_id, blob) = r?;
        match decode_embedding_blob(&blob) {
            Ok(vector) => out.push(EmbeddingCandidate { face_id, person_id, vector }),
            Err(e) => {
                tracing::warn!("Failed to decode embedding for face {}: {}", face_id, e);
                continue;
            }
        }
    }
    Ok(out)
}

/// The person's name, else their oldest alias.
pub fn person_display_name(conn: &Connection, person_id: i64) -> Result<Option<String>> {
    let name: Option<Option<String>> = conn
        .query_row("SELECT name FROM persons WHERE id = ?1", params![person_id], |row| row.get(0))
        .optional()?;
    match name {
        None => Ok(None),
        Some(Some(name)) if !name.trim().is_empty() => Ok(Some(name)),
        Some(_) => {
            let alias = conn
                .query_row(
                    "SELECT alias FROM person_aliases WHERE person_id = ?1 ORDER BY id LIMIT 1",
                    params![person_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(alias)
        }
    }
}

pub fn task_status(conn: &Connection, image_path: &str, task: TaskKind) -> Result<Option<TaskRecord>> {
    let row: Option<(String, Option<String>, Option<serde_json::Value>, Option<i64>)> = conn
        .query_row(
            "SELECT status, error, result_json, processed_at FROM image_tasks WHERE image_path = ?1 AND task = ?2",
            params![image_path, task.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;
    match row {
        Some((status, error, result, processed_at)) => Ok(Some(TaskRecord {
            image_path: image_path.to_string(),
            task,
            status: status.parse()?,
            error,
            result,
            processed_at,
        })),
        None => Ok(None),
    }
}
