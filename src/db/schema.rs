use anyhow::Result;
use rusqlite::Connection;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection settings. Runs for every connection the pool opens.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS persons (
  id INTEGER PRIMARY KEY,
  name TEXT,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS person_aliases (
  id INTEGER PRIMARY KEY,
  person_id INTEGER NOT NULL,
  alias TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  FOREIGN KEY(person_id) REFERENCES persons(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_person_aliases_person ON person_aliases(person_id);

CREATE TABLE IF NOT EXISTS faces (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  image_path TEXT NOT NULL,
  person_id INTEGER,
  x INTEGER NOT NULL,
  y INTEGER NOT NULL,
  width INTEGER NOT NULL,
  height INTEGER NOT NULL,
  confidence REAL NOT NULL,
  recognition_confidence REAL,
  quality REAL,
  landmarks_json TEXT,
  pose_json TEXT,
  model TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL,
  deleted_at INTEGER,
  FOREIGN KEY(person_id) REFERENCES persons(id)
);

CREATE INDEX IF NOT EXISTS idx_faces_image ON faces(image_path);
CREATE INDEX IF NOT EXISTS idx_faces_person ON faces(person_id);

CREATE TABLE IF NOT EXISTS face_embeddings (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  face_id INTEGER NOT NULL UNIQUE,
  embedding_blob BLOB NOT NULL,
  dim INTEGER NOT NULL,
  model TEXT NOT NULL,
  quality REAL,
  created_at INTEGER NOT NULL,
  deleted_at INTEGER,
  FOREIGN KEY(face_id) REFERENCES faces(id)
);

CREATE TABLE IF NOT EXISTS image_tasks (
  id INTEGER PRIMARY KEY,
  image_path TEXT NOT NULL,
  task TEXT NOT NULL,
  status TEXT NOT NULL,
  error TEXT,
  result_json TEXT,
  processed_at INTEGER,
  updated_at INTEGER NOT NULL,
  UNIQUE(image_path, task)
);

CREATE INDEX IF NOT EXISTS idx_image_tasks_status ON image_tasks(status);
    "#,
    )?;
    Ok(())
}
