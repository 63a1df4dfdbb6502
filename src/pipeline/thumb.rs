use crate::error::TaskError;
use crate::pipeline::open_image;
use crate::storage::{AssetCategory, AssetStore};
use image::{DynamicImage, ImageOutputFormat};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

pub const JPEG_QUALITY: u8 = 85;

/// Asset name for an image's thumbnail: the SHA-256 of its key.
pub fn thumbnail_name(image_key: &str) -> String {
    format!("{}.jpg", hex::encode(Sha256::digest(image_key.as_bytes())))
}

/// Shrinks to fit within `max_size` (never enlarges), keeping aspect ratio.
pub fn make_thumbnail(img: &DynamicImage, max_size: u32) -> DynamicImage {
    if img.width() > max_size || img.height() > max_size {
        img.thumbnail(max_size, max_size)
    } else {
        img.clone()
    }
}

pub fn run_thumbnail(
    path: &Path,
    image_key: &str,
    max_size: u32,
    assets: &dyn AssetStore,
) -> Result<serde_json::Value, TaskError> {
    let img = open_image(path)?;
    let thumb = DynamicImage::ImageRgb8(make_thumbnail(&img, max_size).to_rgb8());

    let mut buf = Cursor::new(Vec::new());
    thumb
        .write_to(&mut buf, ImageOutputFormat::Jpeg(JPEG_QUALITY))
        .map_err(|e| TaskError::Encode { what: "thumbnail", message: e.to_string() })?;

    let name = thumbnail_name(image_key);
    let stored = assets
        .save(AssetCategory::Thumbnail, &name, buf.get_ref())
        .map_err(|e| TaskError::Persistence(format!("{:#}", e)))?;
    debug!("Thumbnail for {:?} written to {:?}", path, stored);

    Ok(json!({
        "asset": name,
        "width": thumb.width(),
        "height": thumb.height(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_fits_and_keeps_aspect() {
        let img = DynamicImage::new_rgb8(400, 200);
        let t = make_thumbnail(&img, 100);
        assert_eq!((t.width(), t.height()), (100, 50));
    }

    #[test]
    fn test_small_images_are_not_enlarged() {
        let img = DynamicImage::new_rgb8(40, 20);
        let t = make_thumbnail(&img, 100);
        assert_eq!((t.width(), t.height()), (40, 20));
    }

    #[test]
    fn test_thumbnail_name_is_stable() {
        let a = thumbnail_name("/photos/a.jpg");
        assert_eq!(a, thumbnail_name("/photos/a.jpg"));
        assert_ne!(a, thumbnail_name("/photos/b.jpg"));
        assert_eq!(a.len(), 64 + 4);
    }
}
