//! Prior boxes, offset decoding and overlap suppression.
//!
//! Everything here is pure. The anchor enumeration order is part of the
//! contract with the detector network: prediction `i` belongs to anchor `i`.

use crate::models::{BoundingBox, DetectionResult};

/// Prior box in normalized centre form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnchorConfig {
    /// Reference resolution the network runs at.
    pub width: u32,
    pub height: u32,
    pub steps: [u32; 3],
    /// Two anchor sizes (in reference pixels) per step.
    pub min_sizes: [[f32; 2]; 3],
    pub variances: [f32; 2],
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self::square(640)
    }
}

impl AnchorConfig {
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
            steps: [8, 16, 32],
            min_sizes: [[16.0, 32.0], [64.0, 128.0], [256.0, 512.0]],
            variances: [0.1, 0.2],
        }
    }

    /// `(rows, cols)` of each feature map.
    pub fn feature_maps(&self) -> [(u32, u32); 3] {
        self.steps.map(|step| {
            (
                (self.height as f32 / step as f32).ceil() as u32,
                (self.width as f32 / step as f32).ceil() as u32,
            )
        })
    }

    pub fn anchor_count(&self) -> usize {
        self.feature_maps()
            .iter()
            .zip(self.min_sizes.iter())
            .map(|(&(rows, cols), sizes)| rows as usize * cols as usize * sizes.len())
            .sum()
    }
}

/// Anchors in (row, column, size) order per feature map, stride by stride.
pub fn generate_anchors(cfg: &AnchorConfig) -> Vec<Anchor> {
    let (w, h) = (cfg.width as f32, cfg.height as f32);
    let mut anchors = Vec::with_capacity(cfg.anchor_count());
    for (k, &(rows, cols)) in cfg.feature_maps().iter().enumerate() {
        let step = cfg.steps[k] as f32;
        for row in 0..rows {
            for col in 0..cols {
                let cx = (col as f32 + 0.5) * step / w;
                let cy = (row as f32 + 0.5) * step / h;
                for &size in &cfg.min_sizes[k] {
                    anchors.push(Anchor { cx, cy, w: size / w, h: size / h });
                }
            }
        }
    }
    anchors
}

/// Applies `[dx, dy, dw, dh]` to an anchor and returns normalized corners
/// `[x1, y1, x2, y2]`.
pub fn decode_box(raw: [f32; 4], anchor: &Anchor, variances: [f32; 2]) -> [f32; 4] {
    let cx = anchor.cx + raw[0] * variances[0] * anchor.w;
    let cy = anchor.cy + raw[1] * variances[0] * anchor.h;
    let w = anchor.w * (raw[2] * variances[1]).exp();
    let h = anchor.h * (raw[3] * variances[1]).exp();
    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

/// Decodes five `(x, y)` landmark offsets into normalized points.
pub fn decode_landmarks(raw: &[f32], anchor: &Anchor, variances: [f32; 2]) -> Vec<(f32, f32)> {
    raw.chunks_exact(2)
        .take(5)
        .map(|p| {
            (
                anchor.cx + p[0] * variances[0] * anchor.w,
                anchor.cy + p[1] * variances[0] * anchor.h,
            )
        })
        .collect()
}

/// Scales normalized corners to pixels, clips them to the image and rounds
/// to a pixel box. `None` for anything degenerate after clipping.
pub fn scale_and_clip(corners: [f32; 4], width: u32, height: u32) -> Option<BoundingBox> {
    let (w, h) = (width as f32, height as f32);
    let x1 = (corners[0] * w).clamp(0.0, w);
    let y1 = (corners[1] * h).clamp(0.0, h);
    let x2 = (corners[2] * w).clamp(0.0, w);
    let y2 = (corners[3] * h).clamp(0.0, h);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    BoundingBox::from_corners(x1, y1, x2, y2)
}

pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = a.x2().min(b.x2());
    let y2 = a.y2().min(b.y2());
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let intersection = (x2 - x1) as i64 * (y2 - y1) as i64;
    let union = a.area() + b.area() - intersection;
    if union <= 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

/// Greedy NMS. Ties on confidence keep their input order.
pub fn non_max_suppression(detections: Vec<DetectionResult>, iou_threshold: f32) -> Vec<DetectionResult> {
    if detections.is_empty() {
        return detections;
    }
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| {
        detections[b]
            .confidence
            .partial_cmp(&detections[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut suppressed = vec![false; detections.len()];
    let mut keep = Vec::new();
    for (pos, &ia) in order.iter().enumerate() {
        if suppressed[ia] {
            continue;
        }
        keep.push(ia);
        for &ib in order.iter().skip(pos + 1) {
            if !suppressed[ib] && iou(&detections[ia].bbox, &detections[ib].bbox) > iou_threshold {
                suppressed[ib] = true;
            }
        }
    }

    let mut slots: Vec<Option<DetectionResult>> = detections.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|idx| slots[idx].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: i32, y: i32, w: i32, h: i32, confidence: f32) -> DetectionResult {
        DetectionResult {
            bbox: BoundingBox { x, y, width: w, height: h },
            confidence,
            quality: None,
            landmarks: Vec::new(),
            pose: None,
            embedding: None,
            model: "test".to_string(),
        }
    }

    #[test]
    fn test_anchor_count_for_640() {
        let cfg = AnchorConfig::default();
        // 80x80x2 + 40x40x2 + 20x20x2
        assert_eq!(cfg.anchor_count(), 16_800);
        assert_eq!(generate_anchors(&cfg).len(), 16_800);
    }

    #[test]
    fn test_anchor_order_is_row_col_size() {
        let cfg = AnchorConfig::square(64);
        let anchors = generate_anchors(&cfg);
        // first cell of stride 8: both sizes before moving a column
        assert_eq!(anchors[0], Anchor { cx: 4.0 / 64.0, cy: 4.0 / 64.0, w: 16.0 / 64.0, h: 16.0 / 64.0 });
        assert_eq!(anchors[1], Anchor { cx: 4.0 / 64.0, cy: 4.0 / 64.0, w: 32.0 / 64.0, h: 32.0 / 64.0 });
        assert_eq!(anchors[2].cx, 12.0 / 64.0);
        assert_eq!(anchors[2].cy, 4.0 / 64.0);
        // second row of the 8x8 map starts after 8 cells * 2 sizes
        assert_eq!(anchors[16].cx, 4.0 / 64.0);
        assert_eq!(anchors[16].cy, 12.0 / 64.0);
        // stride 16 begins after 8*8*2 anchors
        assert_eq!(anchors[128].w, 64.0 / 64.0);
        assert_eq!(anchors[128].cx, 8.0 / 64.0);
        assert_eq!(anchors.len(), 128 + 32 + 8);
    }

    #[test]
    fn test_feature_maps_round_up() {
        let cfg = AnchorConfig::square(100);
        assert_eq!(cfg.feature_maps(), [(13, 13), (7, 7), (4, 4)]);
    }

    #[test]
    fn test_decode_box_zero_offsets_is_anchor() {
        let a = Anchor { cx: 0.5, cy: 0.5, w: 0.2, h: 0.4 };
        let c = decode_box([0.0; 4], &a, [0.1, 0.2]);
        let expected = [0.4, 0.3, 0.6, 0.7];
        for (got, want) in c.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_decode_box_applies_variances() {
        let a = Anchor { cx: 0.5, cy: 0.5, w: 0.2, h: 0.2 };
        let c = decode_box([1.0, -1.0, 0.0, 5.0], &a, [0.1, 0.2]);
        let cx = 0.5 + 0.1 * 0.2;
        let cy = 0.5 - 0.1 * 0.2;
        let h = 0.2 * 1.0f32.exp();
        assert!((c[0] - (cx - 0.1)).abs() < 1e-6);
        assert!((c[2] - (cx + 0.1)).abs() < 1e-6);
        assert!((c[1] - (cy - h / 2.0)).abs() < 1e-6);
        assert!((c[3] - (cy + h / 2.0)).abs() < 1e-6);
        // pure: same input, same output
        assert_eq!(c, decode_box([1.0, -1.0, 0.0, 5.0], &a, [0.1, 0.2]));
    }

    #[test]
    fn test_decode_landmarks() {
        let a = Anchor { cx: 0.5, cy: 0.5, w: 0.2, h: 0.2 };
        let raw = [0.0, 0.0, 1.0, 1.0, -1.0, 0.0, 0.0, -1.0, 2.0, 2.0];
        let pts = decode_landmarks(&raw, &a, [0.1, 0.2]);
        assert_eq!(pts.len(), 5);
        assert_eq!(pts[0], (0.5, 0.5));
        assert!((pts[1].0 - 0.52).abs() < 1e-6);
        assert!((pts[4].1 - 0.54).abs() < 1e-6);
    }

    #[test]
    fn test_scale_and_clip_keeps_corners_ordered() {
        let b = scale_and_clip([-0.1, -0.2, 0.5, 1.3], 200, 100).unwrap();
        assert_eq!(b, BoundingBox { x: 0, y: 0, width: 100, height: 100 });
        assert!(b.x <= b.x2() && b.y <= b.y2());
        // fully outside the image collapses to nothing
        assert!(scale_and_clip([1.1, 0.1, 1.5, 0.5], 200, 100).is_none());
    }

    #[test]
    fn test_iou_values() {
        let a = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        let b = BoundingBox { x: 5, y: 0, width: 10, height: 10 };
        let c = BoundingBox { x: 20, y: 20, width: 5, height: 5 };
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(iou(&a, &c), 0.0);
        // touching edges do not overlap
        let d = BoundingBox { x: 10, y: 0, width: 10, height: 10 };
        assert_eq!(iou(&a, &d), 0.0);
    }

    #[test]
    fn test_nms_keeps_higher_confidence_of_overlapping_pair() {
        let out = non_max_suppression(vec![det(5, 5, 100, 100, 0.7), det(0, 0, 100, 100, 0.9)], 0.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.9);
    }

    #[test]
    fn test_nms_keeps_disjoint_boxes() {
        let out = non_max_suppression(vec![det(0, 0, 10, 10, 0.6), det(50, 50, 10, 10, 0.8)], 0.5);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].confidence, 0.8);
    }

    #[test]
    fn test_nms_stable_on_ties() {
        let out = non_max_suppression(
            vec![det(0, 0, 10, 10, 0.8), det(100, 0, 10, 10, 0.8), det(1, 1, 10, 10, 0.8)],
            0.5,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].bbox.x, 0);
        assert_eq!(out[1].bbox.x, 100);
    }

    #[test]
    fn test_nms_twelve_boxes_two_overlapping_pairs() {
        let mut boxes = vec![
            det(0, 0, 100, 100, 0.95),
            det(5, 5, 100, 100, 0.90),
            det(200, 0, 100, 100, 0.85),
            det(202, 3, 100, 100, 0.99),
        ];
        for i in 0..8 {
            boxes.push(det(400 + i * 120, 0, 100, 100, 0.5 + i as f32 * 0.01));
        }
        assert_eq!(boxes.len(), 12);
        let out = non_max_suppression(boxes, 0.5);
        assert_eq!(out.len(), 10);
        assert!(out.iter().any(|d| d.confidence == 0.95));
        assert!(out.iter().any(|d| d.confidence == 0.99));
        assert!(!out.iter().any(|d| d.confidence == 0.90 || d.confidence == 0.85));
    }

    #[test]
    fn test_nms_is_idempotent() {
        let boxes = vec![
            det(0, 0, 50, 50, 0.9),
            det(10, 10, 50, 50, 0.8),
            det(30, 30, 50, 50, 0.7),
            det(200, 200, 20, 20, 0.6),
        ];
        let once = non_max_suppression(boxes, 0.3);
        let twice = non_max_suppression(once.clone(), 0.3);
        assert_eq!(once, twice);
    }
}
