use serde::{Deserialize, Serialize};

use crate::error::{AnalysisStage, ProctorError, ProctorResult};
use crate::fusion::{Flag, PartialFlags};
use crate::landmarks::{Keypoint, LandmarkSet};

pub const DEFAULT_GAZE_THRESHOLD: f32 = 0.3;
pub const DEFAULT_MIN_EYE_DISTANCE_PX: f32 = 1.0;

/// Allowed region for the face centre, normalized coordinates, open interval.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundsRect {
    pub x_min: f32,
    pub x_max: f32,
    pub y_min: f32,
    pub y_max: f32,
}

impl Default for BoundsRect {
    fn default() -> Self {
        Self {
            x_min: 0.25,
            x_max: 0.75,
            y_min: 0.20,
            y_max: 0.80,
        }
    }
}

impl BoundsRect {
    /// Strict containment: points on the edge are out of bounds.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        self.x_min < x && x < self.x_max && self.y_min < y && y < self.y_max
    }

    pub fn is_valid(&self) -> bool {
        [self.x_min, self.x_max, self.y_min, self.y_max]
            .iter()
            .all(|v| v.is_finite() && (0.0..=1.0).contains(v))
            && self.x_min < self.x_max
            && self.y_min < self.y_max
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeometryConfig {
    pub bounds: BoundsRect,
    /// `|gaze_ratio|` strictly above this is looking away.
    pub gaze_threshold: f32,
    /// Eye spans below this (pixels) are treated as degenerate.
    pub min_eye_distance_px: f32,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            bounds: BoundsRect::default(),
            gaze_threshold: DEFAULT_GAZE_THRESHOLD,
            min_eye_distance_px: DEFAULT_MIN_EYE_DISTANCE_PX,
        }
    }
}

/// Geometric verdict for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceAssessment {
    pub face_count: usize,
    pub multiple_faces: bool,
    pub no_face_detected: bool,
    pub face_out_of_bounds: bool,
    pub is_looking_away: bool,
    /// Measured horizontal gaze ratio, when it was evaluated.
    pub gaze_ratio: Option<f32>,
}

impl FaceAssessment {
    fn no_face() -> Self {
        Self {
            face_count: 0,
            multiple_faces: false,
            no_face_detected: true,
            face_out_of_bounds: true,
            is_looking_away: false,
            gaze_ratio: None,
        }
    }

    fn crowded(face_count: usize) -> Self {
        Self {
            face_count,
            multiple_faces: true,
            no_face_detected: false,
            face_out_of_bounds: true,
            is_looking_away: false,
            gaze_ratio: None,
        }
    }

    pub fn partial_flags(&self) -> PartialFlags {
        let mut flags = PartialFlags::default();
        flags.set(Flag::MultipleFaces, self.multiple_faces);
        flags.set(Flag::NoFaceDetected, self.no_face_detected);
        flags.set(Flag::FaceOutOfBounds, self.face_out_of_bounds);
        flags.set(Flag::IsLookingAway, self.is_looking_away);
        flags
    }
}

/// Turns landmark sets into multiplicity, bounds and gaze decisions.
#[derive(Clone, Debug, Default)]
pub struct GeometricFaceAnalyzer {
    config: GeometryConfig,
}

impl GeometricFaceAnalyzer {
    pub fn new(config: GeometryConfig) -> Self {
        Self { config }
    }

    pub fn analyze(
        &self,
        faces: &[LandmarkSet],
        width: u32,
        height: u32,
    ) -> ProctorResult<FaceAssessment> {
        let face = match faces {
            [] => return Ok(FaceAssessment::no_face()),
            [face] => face,
            _ => return Ok(FaceAssessment::crowded(faces.len())),
        };
        if width == 0 || height == 0 {
            return Err(ProctorError::analysis(
                AnalysisStage::Geometry,
                format!("invalid frame dimensions {}x{}", width, height),
            ));
        }

        let nose = face.point(Keypoint::NoseTip).ok_or_else(|| {
            ProctorError::analysis(AnalysisStage::Geometry, "nose tip landmark missing")
        })?;

        if !self.config.bounds.contains(nose.x, nose.y) {
            return Ok(FaceAssessment {
                face_count: 1,
                multiple_faces: false,
                no_face_detected: false,
                face_out_of_bounds: true,
                is_looking_away: false,
                gaze_ratio: None,
            });
        }

        let gaze_ratio = self.gaze_ratio(face, width);
        let is_looking_away = gaze_ratio
            .map(|ratio| ratio.abs() > self.config.gaze_threshold)
            .unwrap_or(false);
        Ok(FaceAssessment {
            face_count: 1,
            multiple_faces: false,
            no_face_detected: false,
            face_out_of_bounds: false,
            is_looking_away,
            gaze_ratio,
        })
    }

    /// Signed nose offset from the eye midpoint, in eye spans, measured in
    /// pixels. `None` when the eyes are missing or too close together.
    pub fn gaze_ratio(&self, face: &LandmarkSet, width: u32) -> Option<f32> {
        let nose = face.point(Keypoint::NoseTip)?;
        let (left, right) = match (
            face.point(Keypoint::LeftEyeOuter),
            face.point(Keypoint::RightEyeOuter),
        ) {
            (Some(left), Some(right)) => (left, right),
            _ => {
                log::warn!("eye landmarks missing; gaze not evaluated");
                return None;
            }
        };
        let w = width as f32;
        let nose_x = nose.x * w;
        let left_x = left.x * w;
        let right_x = right.x * w;

        let eye_distance = (right_x - left_x).abs();
        if eye_distance < self.config.min_eye_distance_px {
            log::debug!("eye span {:.2}px below minimum; gaze not evaluated", eye_distance);
            return None;
        }
        let midpoint = (left_x + right_x) / 2.0;
        Some((nose_x - midpoint) / eye_distance)
    }
}
