use serde::{Deserialize, Serialize};

/// Axis-aligned face rectangle in whole image pixels.
///
/// Always has a positive width and height; use [`BoundingBox::from_corners`]
/// to build one from decoded floating point corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    /// Rounds the corners to whole pixels. Returns `None` when the rounded
    /// rectangle is empty.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Option<Self> {
        if !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
            return None;
        }
        let (x1, y1, x2, y2) = (x1.round() as i32, y1.round() as i32, x2.round() as i32, y2.round() as i32);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Self { x: x1, y: y1, width: x2 - x1, height: y2 - y1 })
    }

    pub fn x2(&self) -> i32 {
        self.x + self.width
    }

    pub fn y2(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

/// Approximate head orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

/// One face found by a single inference call. Not persisted as-is; the
/// repository turns it into a [`Face`] row (plus an embedding row when
/// `embedding` is set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub quality: Option<f32>,
    /// Up to five points: left eye, right eye, nose, left and right mouth corner.
    pub landmarks: Vec<Landmark>,
    pub pose: Option<Pose>,
    pub embedding: Option<Vec<f32>>,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub id: i64,
    /// `None` means the face is untagged.
    pub person_id: Option<i64>,
    pub image_path: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub recognition_confidence: Option<f32>,
    pub quality: Option<f32>,
    pub landmarks: Option<Vec<Landmark>>,
    pub pose: Option<Pose>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Face {
    pub fn is_tagged(&self) -> bool {
        self.person_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEmbeddingRecord {
    pub face_id: i64,
    pub vector: Vec<f32>,
    pub model: String,
    pub quality: Option<f32>,
}

/// A stored embedding together with the owner of its face, as consumed by
/// the matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingCandidate {
    pub face_id: i64,
    pub person_id: Option<i64>,
    pub vector: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_corners_rounds_to_pixels() {
        let b = BoundingBox::from_corners(10.4, 20.6, 50.5, 80.2).unwrap();
        assert_eq!(b, BoundingBox { x: 10, y: 21, width: 41, height: 59 });
        assert_eq!(b.x2(), 51);
        assert_eq!(b.y2(), 80);
        assert_eq!(b.area(), 41 * 59);
    }

    #[test]
    fn test_from_corners_rejects_degenerate() {
        assert!(BoundingBox::from_corners(10.0, 10.0, 10.0, 20.0).is_none());
        assert!(BoundingBox::from_corners(10.0, 10.0, 20.0, 5.0).is_none());
        assert!(BoundingBox::from_corners(10.0, 10.0, 10.3, 20.0).is_none());
        assert!(BoundingBox::from_corners(f32::NAN, 0.0, 1.0, 1.0).is_none());
    }
}
