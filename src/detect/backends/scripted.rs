//! Scripted exam scene.
//!
//! Stands in for both detectors when running against `stub://` sources. The
//! scene cycles through the situations a proctor cares about, one segment per
//! `SEGMENT_FRAMES` frames, with small seeded jitter on every coordinate so
//! the smoothing stages see realistic noise. Output depends only on the seed
//! and the frame sequence, so the provider is reentrant.

use anyhow::Result;
use nalgebra::{Rotation3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::analysis::pnp::{CameraIntrinsics, MODEL_POINTS};
use crate::detect::provider::{LandmarkProvider, ObjectSignalProvider};
use crate::detect::result::DetectionBox;
use crate::frame::RgbView;
use crate::landmarks::{LandmarkSet, Point3D};

const SEGMENT_FRAMES: u64 = 30;
const FACE_SCALE: f32 = 0.08;
const JITTER: f32 = 0.002;
const LOOK_AWAY_YAW_DEG: f32 = 50.0;

/// Situation rendered for a segment of frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SceneKind {
    Attentive,
    LookingAway,
    Absent,
    Crowded,
    PhoneVisible,
    OffCenter,
    BookVisible,
}

impl SceneKind {
    const CYCLE: [SceneKind; 7] = [
        SceneKind::Attentive,
        SceneKind::LookingAway,
        SceneKind::Absent,
        SceneKind::Crowded,
        SceneKind::PhoneVisible,
        SceneKind::OffCenter,
        SceneKind::BookVisible,
    ];

    pub fn for_sequence(sequence: u64) -> Self {
        let idx = (sequence / SEGMENT_FRAMES) % Self::CYCLE.len() as u64;
        Self::CYCLE[idx as usize]
    }
}

/// Scene face points in the `MODEL_POINTS` frame, compact keypoint order.
/// The pose keypoints are the PnP model itself.
const SCENE_FACE: [[f64; 3]; 10] = [
    MODEL_POINTS[0],
    MODEL_POINTS[1],
    [-90.0, -165.0, 145.0],
    [90.0, -165.0, 145.0],
    MODEL_POINTS[2],
    MODEL_POINTS[3],
    [-340.0, -40.0, 290.0],
    [340.0, -40.0, 290.0],
    MODEL_POINTS[4],
    MODEL_POINTS[5],
];

/// Half the outer-eye span of the face model, in millimetres.
const HALF_EYE_SPAN_MM: f64 = 225.0;

/// Compact landmark set for a face rendered through the pose camera.
///
/// `frame` is the frame size in pixels, `center` the nose tip (normalized),
/// `scale` half the frontal outer-eye span as a fraction of frame width and
/// `yaw_deg` the head turn (positive turns the nose towards image right).
pub fn synthetic_face(frame: (u32, u32), center: (f32, f32), scale: f32, yaw_deg: f32) -> LandmarkSet {
    let (width, height) = (f64::from(frame.0), f64::from(frame.1));
    let camera = CameraIntrinsics::for_frame(frame.0, frame.1);
    let depth = HALF_EYE_SPAN_MM / f64::from(scale).max(1e-3);
    let translation = Vector3::new(
        (f64::from(center.0) * width - camera.cx) * depth / camera.focal,
        (f64::from(center.1) * height - camera.cy) * depth / camera.focal,
        depth,
    );
    let rotation =
        Rotation3::from_axis_angle(&Vector3::y_axis(), -f64::from(yaw_deg).to_radians());
    let points = SCENE_FACE.map(|[x, y, z]| {
        camera
            .project(&(rotation * Vector3::new(x, y, z) + translation))
            .map(|uv| Point3D::new((uv.x / width) as f32, (uv.y / height) as f32))
            .unwrap_or(Point3D::new(center.0, center.1))
    });
    LandmarkSet::from_keypoints(points)
}

#[derive(Clone, Debug)]
pub struct ScriptedSceneProvider {
    seed: u64,
}

impl ScriptedSceneProvider {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn rng_for(&self, sequence: u64, salt: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ sequence.rotate_left(17) ^ salt)
    }

    fn jittered(&self, mut face: LandmarkSet, rng: &mut StdRng) -> LandmarkSet {
        for point in &mut face.points {
            point.x += rng.gen_range(-JITTER..=JITTER);
            point.y += rng.gen_range(-JITTER..=JITTER);
        }
        face
    }

    pub fn faces_for(&self, sequence: u64, width: u32, height: u32) -> Vec<LandmarkSet> {
        let mut rng = self.rng_for(sequence, 0x5eed_face);
        let frame = (width, height);
        let face = |center, scale, yaw| synthetic_face(frame, center, scale, yaw);
        match SceneKind::for_sequence(sequence) {
            SceneKind::Absent => Vec::new(),
            SceneKind::Crowded => vec![
                self.jittered(face((0.40, 0.50), FACE_SCALE, 0.0), &mut rng),
                self.jittered(face((0.70, 0.45), FACE_SCALE * 0.8, 0.0), &mut rng),
            ],
            SceneKind::LookingAway => {
                vec![self.jittered(face((0.50, 0.50), FACE_SCALE, LOOK_AWAY_YAW_DEG), &mut rng)]
            }
            SceneKind::OffCenter => {
                vec![self.jittered(face((0.85, 0.50), FACE_SCALE, 0.0), &mut rng)]
            }
            SceneKind::Attentive | SceneKind::PhoneVisible | SceneKind::BookVisible => {
                vec![self.jittered(face((0.50, 0.50), FACE_SCALE, 0.0), &mut rng)]
            }
        }
    }

    pub fn detections_for(&self, sequence: u64, width: u32, height: u32) -> Vec<DetectionBox> {
        let mut rng = self.rng_for(sequence, 0x0b_1ec7);
        let w = width as f32;
        let h = height as f32;
        let mut boxes = vec![DetectionBox::new(
            "person",
            rng.gen_range(0.80..0.95),
            [0.25 * w, 0.20 * h, 0.75 * w, h],
        )];
        match SceneKind::for_sequence(sequence) {
            SceneKind::PhoneVisible => boxes.push(DetectionBox::new(
                "cell phone",
                rng.gen_range(0.55..0.90),
                [0.62 * w, 0.70 * h, 0.72 * w, 0.88 * h],
            )),
            SceneKind::BookVisible => boxes.push(DetectionBox::new(
                "book",
                rng.gen_range(0.50..0.85),
                [0.10 * w, 0.65 * h, 0.35 * w, 0.95 * h],
            )),
            // Low-confidence phone hallucination that must not raise a flag.
            SceneKind::Attentive => boxes.push(DetectionBox::new(
                "cell phone",
                rng.gen_range(0.05..0.25),
                [0.05 * w, 0.05 * h, 0.10 * w, 0.12 * h],
            )),
            _ => {}
        }
        boxes
    }
}

impl LandmarkProvider for ScriptedSceneProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&self, frame: &RgbView<'_>) -> Result<Vec<LandmarkSet>> {
        Ok(self.faces_for(frame.sequence(), frame.width(), frame.height()))
    }
}

impl ObjectSignalProvider for ScriptedSceneProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&self, frame: &RgbView<'_>) -> Result<Vec<DetectionBox>> {
        Ok(self.detections_for(frame.sequence(), frame.width(), frame.height()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_cycles_by_segment() {
        assert_eq!(SceneKind::for_sequence(0), SceneKind::Attentive);
        assert_eq!(SceneKind::for_sequence(SEGMENT_FRAMES), SceneKind::LookingAway);
        assert_eq!(SceneKind::for_sequence(2 * SEGMENT_FRAMES + 5), SceneKind::Absent);
        assert_eq!(SceneKind::for_sequence(7 * SEGMENT_FRAMES), SceneKind::Attentive);
    }

    #[test]
    fn output_is_deterministic_per_seed_and_frame() {
        let a = ScriptedSceneProvider::new(42);
        let b = ScriptedSceneProvider::new(42);
        assert_eq!(a.faces_for(3, 640, 480), b.faces_for(3, 640, 480));
        assert_eq!(a.detections_for(3, 640, 480), b.detections_for(3, 640, 480));
        assert_ne!(a.faces_for(3, 640, 480), a.faces_for(4, 640, 480));
    }

    #[test]
    fn crowded_segment_has_two_faces() {
        let provider = ScriptedSceneProvider::new(1);
        assert_eq!(provider.faces_for(3 * SEGMENT_FRAMES, 640, 480).len(), 2);
        assert!(provider.faces_for(2 * SEGMENT_FRAMES, 640, 480).is_empty());
    }

    #[test]
    fn phone_segment_reports_a_confident_phone() {
        let provider = ScriptedSceneProvider::new(9);
        let boxes = provider.detections_for(4 * SEGMENT_FRAMES, 640, 480);
        let phone = boxes.iter().find(|b| b.label == "cell phone").unwrap();
        assert!(phone.confidence >= 0.55);
    }
}
