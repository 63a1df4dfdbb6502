//! Rough head pose from the five detector landmarks.

use crate::models::{Landmark, Pose};

/// Nose position between eye line and mouth line for a level head.
const NEUTRAL_NOSE_RATIO: f32 = 0.5;

/// Estimates `(yaw, pitch, roll)` in degrees from landmarks ordered left eye,
/// right eye, nose, left mouth corner, right mouth corner.
///
/// Roll follows the eye line. Yaw is positive when the nose drifts towards
/// the second eye, pitch is positive when it drifts towards the eyes.
pub fn estimate(landmarks: &[Landmark]) -> Option<Pose> {
    let [left_eye, right_eye, nose, left_mouth, right_mouth] = match landmarks {
        [a, b, c, d, e, ..] => [*a, *b, *c, *d, *e],
        _ => return None,
    };

    let dx = right_eye.x - left_eye.x;
    let dy = right_eye.y - left_eye.y;
    let eye_dist = (dx * dx + dy * dy).sqrt();
    if !(eye_dist > f32::EPSILON) {
        return None;
    }
    let roll = dy.atan2(dx).to_degrees();

    // Work in the eye-aligned frame: u along the eyes, v perpendicular.
    let (ux, uy) = (dx / eye_dist, dy / eye_dist);
    let eye_mid = ((left_eye.x + right_eye.x) / 2.0, (left_eye.y + right_eye.y) / 2.0);
    let mouth_mid = ((left_mouth.x + right_mouth.x) / 2.0, (left_mouth.y + right_mouth.y) / 2.0);

    let (nx, ny) = (nose.x - eye_mid.0, nose.y - eye_mid.1);
    let nose_u = nx * ux + ny * uy;
    let nose_v = ny * ux - nx * uy;
    let mouth_v = (mouth_mid.1 - eye_mid.1) * ux - (mouth_mid.0 - eye_mid.0) * uy;
    if !(mouth_v > f32::EPSILON) {
        return None;
    }

    let yaw = (2.0 * nose_u / eye_dist).clamp(-1.0, 1.0).asin().to_degrees();
    let ratio = nose_v / mouth_v;
    let pitch = (2.0 * (NEUTRAL_NOSE_RATIO - ratio)).clamp(-1.0, 1.0).asin().to_degrees();

    Some(Pose { yaw, pitch, roll })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lm(points: [(f32, f32); 5]) -> Vec<Landmark> {
        points.iter().map(|&(x, y)| Landmark { x, y }).collect()
    }

    #[test]
    fn test_frontal_face_is_level() {
        let pose = estimate(&lm([(30.0, 40.0), (70.0, 40.0), (50.0, 60.0), (35.0, 80.0), (65.0, 80.0)])).unwrap();
        assert!(pose.yaw.abs() < 1e-3);
        assert!(pose.pitch.abs() < 1e-3);
        assert!(pose.roll.abs() < 1e-3);
    }

    #[test]
    fn test_roll_follows_eye_line() {
        let pose = estimate(&lm([(0.0, 0.0), (10.0, 10.0), (0.0, 10.0), (-5.0, 15.0), (0.0, 20.0)])).unwrap();
        assert!((pose.roll - 45.0).abs() < 1e-3);
    }

    #[test]
    fn test_yaw_sign_follows_nose_offset() {
        let turned = estimate(&lm([(30.0, 40.0), (70.0, 40.0), (60.0, 60.0), (35.0, 80.0), (65.0, 80.0)])).unwrap();
        assert!(turned.yaw > 20.0);
        let other = estimate(&lm([(30.0, 40.0), (70.0, 40.0), (40.0, 60.0), (35.0, 80.0), (65.0, 80.0)])).unwrap();
        assert!(other.yaw < -20.0);
    }

    #[test]
    fn test_pitch_up_when_nose_near_eyes() {
        let pose = estimate(&lm([(30.0, 40.0), (70.0, 40.0), (50.0, 48.0), (35.0, 80.0), (65.0, 80.0)])).unwrap();
        assert!(pose.pitch > 0.0);
    }

    #[test]
    fn test_degenerate_landmarks() {
        assert!(estimate(&[]).is_none());
        assert!(estimate(&lm([(5.0, 5.0); 5])).is_none());
    }
}
