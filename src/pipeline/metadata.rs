use crate::error::TaskError;
use memmap2::MmapOptions;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;
use xxhash_rust::xxh3::Xxh3;

// Memory mapping beats buffered reads from here on.
const MMAP_THRESHOLD: u64 = 8 * 1024 * 1024;
const CHUNK_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHash {
    pub xxh3_64: u64,
    pub sha256: Vec<u8>,
}

pub fn hash_file(path: &Path, size_bytes: u64) -> std::io::Result<ContentHash> {
    let file = File::open(path)?;
    let mut xx = Xxh3::new();
    let mut sha = Sha256::new();

    if size_bytes >= MMAP_THRESHOLD {
        // Safety: the mapping is read-only and dropped before returning.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        for chunk in mmap.chunks(CHUNK_SIZE) {
            xx.update(chunk);
            sha.update(chunk);
        }
    } else {
        let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            xx.update(&buf[..n]);
            sha.update(&buf[..n]);
        }
    }

    Ok(ContentHash { xxh3_64: xx.digest(), sha256: sha.finalize().to_vec() })
}

/// File facts, pixel dimensions (header only) and content hashes.
pub fn run_metadata(path: &Path) -> Result<serde_json::Value, TaskError> {
    let unreadable = |e: std::io::Error| TaskError::Unreadable { path: path.to_path_buf(), message: e.to_string() };
    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => TaskError::SourceMissing(path.to_path_buf()),
        _ => unreadable(e),
    })?;
    let size_bytes = meta.len();
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64);

    let (width, height) = image::image_dimensions(path)
        .map_err(|e| TaskError::Decode { path: path.to_path_buf(), message: e.to_string() })?;
    let mime = mime_guess::from_path(path).first_or_octet_stream().to_string();
    let hash = hash_file(path, size_bytes).map_err(unreadable)?;

    Ok(json!({
        "size_bytes": size_bytes,
        "mtime": mtime,
        "width": width,
        "height": height,
        "mime": mime,
        "xxh3_64": format!("{:016x}", hash.xxh3_64),
        "sha256": hex::encode(&hash.sha256),
    }))
}
