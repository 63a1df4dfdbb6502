//! Named binary assets (thumbnails, banners, archives) kept outside the
//! database.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    Thumbnail,
    Banner,
    Archive,
}

impl AssetCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetCategory::Thumbnail => "thumbnail",
            AssetCategory::Banner => "banner",
            AssetCategory::Archive => "archive",
        }
    }
}

pub trait AssetStore: Send + Sync {
    /// Stores `data` under `name`, replacing any previous content.
    fn save(&self, category: AssetCategory, name: &str, data: &[u8]) -> Result<PathBuf>;
    fn load(&self, category: AssetCategory, name: &str) -> Result<Option<Vec<u8>>>;
    /// `false` if nothing was stored under `name`.
    fn delete(&self, category: AssetCategory, name: &str) -> Result<bool>;
    fn resolve(&self, category: AssetCategory, name: &str) -> Result<PathBuf>;
}

/// Lays assets out as `<root>/<category>/<first two chars>/<name>`.
#[derive(Debug, Clone)]
pub struct FsAssetStore {
    root: PathBuf,
}

impl FsAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') {
        bail!("invalid asset name {:?}", name);
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')) {
        bail!("invalid asset name {:?}", name);
    }
    Ok(())
}

impl AssetStore for FsAssetStore {
    fn resolve(&self, category: AssetCategory, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let shard = &name[..name.len().min(2)];
        Ok(self.root.join(category.as_str()).join(shard).join(name))
    }

    fn save(&self, category: AssetCategory, name: &str, data: &[u8]) -> Result<PathBuf> {
        let dst = self.resolve(category, name)?;
        let dir = dst.parent().context("asset path has no parent")?;
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;

        let tmp = dir.join(format!(".{}.tmp", name));
        let write_result = fs::write(&tmp, data)
            .and_then(|_| fs::rename(&tmp, &dst))
            .with_context(|| format!("Failed to write asset {:?}", dst));
        if let Err(e) = write_result {
            if let Err(rm_err) = fs::remove_file(&tmp) {
                if rm_err.kind() != ErrorKind::NotFound {
                    warn!("Failed to clean up partial asset {:?}: {}", tmp, rm_err);
                }
            }
            return Err(e);
        }
        Ok(dst)
    }

    fn load(&self, category: AssetCategory, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(category, name)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read asset {:?}", path)),
        }
    }

    fn delete(&self, category: AssetCategory, name: &str) -> Result<bool> {
        let path = self.resolve(category, name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete asset {:?}", path)),
        }
    }
}
