pub mod schema;
pub mod writer;
pub mod query;
pub mod repository;

pub use repository::{FaceRepository, SqliteFaceRepository};

use anyhow::{Context, Result};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

pub fn open_or_create<P: AsRef<Path>>(db_path: P) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    schema::apply_pragmas(&conn)?;
    schema::apply_schema(&conn)?;
    Ok(conn)
}

/// Opens a pooled database, creating the schema on first use.
pub fn create_pool<P: AsRef<Path>>(db_path: P, max_size: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path.as_ref()).with_init(|c| schema::apply_pragmas(c));
    let pool = r2d2::Pool::builder()
        .max_size(max_size.max(1))
        .build(manager)
        .with_context(|| format!("Failed to open database {:?}", db_path.as_ref()))?;
    schema::apply_schema(&*pool.get()?)?;
    Ok(pool)
}
