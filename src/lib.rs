pub mod db;
pub mod error;
pub mod face;
pub mod models;
pub mod pipeline;
pub mod storage;
pub mod utils;

use std::path::PathBuf;
use utils::config::Config;

#[derive(Clone, Debug)]
pub struct AppPaths {
    pub data: PathBuf,
    pub db_path: PathBuf,
    pub derived: PathBuf,
}

impl AppPaths {
    pub fn from_config(cfg: &Config) -> Self {
        Self { data: cfg.data.clone(), db_path: cfg.db_path(), derived: cfg.derived_dir() }
    }

    /// Creates the database and derived-asset directories.
    pub fn ensure(&self) -> std::io::Result<()> {
        if let Some(db_dir) = self.db_path.parent() {
            std::fs::create_dir_all(db_dir)?;
        }
        std::fs::create_dir_all(&self.derived)
    }
}
