//! Head-pose estimation.
//!
//! Two methods:
//! - `Pnp`: solve the pose of a generic face model, then smooth yaw and pitch
//!   with a per-session exponential moving average before classifying.
//! - `Ratio`: instantaneous classification from landmark distance ratios.
//!
//! The label is telemetry. It never feeds `is_looking_away`.

use std::fmt;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize, Serializer};

use crate::analysis::pnp::{self, CameraIntrinsics};
use crate::error::{AnalysisStage, ProctorError, ProctorResult};
use crate::landmarks::{Keypoint, LandmarkSet};

pub const DEFAULT_EMA_ALPHA: f32 = 0.1;
pub const DEFAULT_ANGLE_THRESHOLD_DEG: f32 = 10.0;

const PNP_KEYPOINTS: [Keypoint; 6] = [
    Keypoint::NoseTip,
    Keypoint::Chin,
    Keypoint::LeftEyeOuter,
    Keypoint::RightEyeOuter,
    Keypoint::MouthLeft,
    Keypoint::MouthRight,
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoseMethod {
    #[default]
    Pnp,
    Ratio,
}

impl PoseMethod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pnp" => Some(Self::Pnp),
            "ratio" => Some(Self::Ratio),
            _ => None,
        }
    }
}

/// Head orientation label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeadPose {
    Forward,
    Left,
    Right,
    Up,
    Down,
    NoFace,
    MultipleFaces,
}

impl HeadPose {
    pub fn as_str(self) -> &'static str {
        match self {
            HeadPose::Forward => "Forward",
            HeadPose::Left => "Left",
            HeadPose::Right => "Right",
            HeadPose::Up => "Up",
            HeadPose::Down => "Down",
            HeadPose::NoFace => "No Face",
            HeadPose::MultipleFaces => "Multiple Faces",
        }
    }

    /// Label for frames where the estimator is not invoked.
    pub fn for_face_count(count: usize) -> Option<Self> {
        match count {
            0 => Some(HeadPose::NoFace),
            1 => None,
            _ => Some(HeadPose::MultipleFaces),
        }
    }
}

impl fmt::Display for HeadPose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for HeadPose {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Angles in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PoseEstimate {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

/// Limits for the ratio method.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RatioLimits {
    /// Vertical ratio above this is Down.
    pub down: f32,
    /// Vertical ratio below this is Up.
    pub up: f32,
    /// Horizontal ratio below this is Left.
    pub left: f32,
    /// Horizontal ratio above this is Right.
    pub right: f32,
}

impl Default for RatioLimits {
    fn default() -> Self {
        Self {
            down: 0.50,
            up: 0.20,
            left: 0.35,
            right: 0.65,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseConfig {
    pub method: PoseMethod,
    pub ema_alpha: f32,
    pub pitch_threshold_deg: f32,
    pub yaw_threshold_deg: f32,
    pub ratio: RatioLimits,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            method: PoseMethod::Pnp,
            ema_alpha: DEFAULT_EMA_ALPHA,
            pitch_threshold_deg: DEFAULT_ANGLE_THRESHOLD_DEG,
            yaw_threshold_deg: DEFAULT_ANGLE_THRESHOLD_DEG,
            ratio: RatioLimits::default(),
        }
    }
}

// ----------------------------------------------------------------------------
// Smoothing state (one per session)
// ----------------------------------------------------------------------------

/// Exponential moving average that never steps past its input.
#[derive(Debug)]
struct Ema {
    alpha: f32,
    value: f32,
}

impl Ema {
    fn new(alpha: f32) -> Self {
        Self { alpha, value: 0.0 }
    }

    fn update(&mut self, raw: f32) -> f32 {
        let next = self.alpha * raw + (1.0 - self.alpha) * self.value;
        self.value = if raw >= self.value {
            next.min(raw)
        } else {
            next.max(raw)
        };
        self.value
    }
}

/// Per-session head-pose smoothing accumulators. Starts at a frontal pose.
#[derive(Debug)]
pub struct PoseSmoothing {
    yaw: Ema,
    pitch: Ema,
    roll: f32,
    updates: u64,
}

impl PoseSmoothing {
    pub fn new(alpha: f32) -> Self {
        Self {
            yaw: Ema::new(alpha),
            pitch: Ema::new(alpha),
            roll: 0.0,
            updates: 0,
        }
    }

    /// Fold a raw estimate in and return the smoothed pose.
    pub fn update(&mut self, raw: PoseEstimate) -> PoseEstimate {
        self.yaw.update(raw.yaw);
        self.pitch.update(raw.pitch);
        self.roll = raw.roll;
        self.updates += 1;
        self.current()
    }

    pub fn current(&self) -> PoseEstimate {
        PoseEstimate {
            yaw: self.yaw.value,
            pitch: self.pitch.value,
            roll: self.roll,
        }
    }

    /// Number of successful updates folded in.
    pub fn updates(&self) -> u64 {
        self.updates
    }
}

// ----------------------------------------------------------------------------
// Estimator
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseOutcome {
    pub label: HeadPose,
    /// This frame's unsmoothed angles, when the solve succeeded.
    pub raw: Option<PoseEstimate>,
    /// Smoothed angles after this frame (PnP only).
    pub smoothed: Option<PoseEstimate>,
}

#[derive(Clone, Debug, Default)]
pub struct HeadPoseEstimator {
    config: PoseConfig,
}

impl HeadPoseEstimator {
    pub fn new(config: PoseConfig) -> Self {
        Self { config }
    }

    /// Fresh smoothing state for a new session.
    pub fn new_state(&self) -> PoseSmoothing {
        PoseSmoothing::new(self.config.ema_alpha)
    }

    pub fn estimate(
        &self,
        face: &LandmarkSet,
        width: u32,
        height: u32,
        state: &mut PoseSmoothing,
    ) -> ProctorResult<PoseOutcome> {
        match self.config.method {
            PoseMethod::Pnp => self.estimate_pnp(face, width, height, state),
            PoseMethod::Ratio => self.estimate_ratio(face),
        }
    }

    /// Label for smoothed angles. Vertical wins over horizontal.
    pub fn classify(&self, pose: &PoseEstimate) -> HeadPose {
        let pitch_limit = self.config.pitch_threshold_deg;
        let yaw_limit = self.config.yaw_threshold_deg;
        if pose.pitch < -pitch_limit {
            HeadPose::Up
        } else if pose.pitch > pitch_limit {
            HeadPose::Down
        } else if pose.yaw < -yaw_limit {
            HeadPose::Left
        } else if pose.yaw > yaw_limit {
            HeadPose::Right
        } else {
            HeadPose::Forward
        }
    }

    fn estimate_pnp(
        &self,
        face: &LandmarkSet,
        width: u32,
        height: u32,
        state: &mut PoseSmoothing,
    ) -> ProctorResult<PoseOutcome> {
        let mut image = [Vector2::zeros(); 6];
        for (slot, keypoint) in image.iter_mut().zip(PNP_KEYPOINTS) {
            let point = face.point(keypoint).ok_or_else(|| {
                ProctorError::analysis(
                    AnalysisStage::Pose,
                    format!("{:?} landmark missing", keypoint),
                )
            })?;
            let (x, y) = point.to_pixels(width, height);
            *slot = Vector2::new(x as f64, y as f64);
        }

        let camera = CameraIntrinsics::for_frame(width, height);
        let raw = match pnp::solve(&image, &camera) {
            Ok(solution) => {
                let (yaw, pitch, roll) = solution.euler_degrees();
                Some(PoseEstimate {
                    yaw: yaw as f32,
                    pitch: pitch as f32,
                    roll: roll as f32,
                })
            }
            Err(failure) => {
                log::debug!("pose solve skipped: {}", failure);
                None
            }
        };
        let smoothed = match raw {
            Some(raw) => state.update(raw),
            None => state.current(),
        };
        Ok(PoseOutcome {
            label: self.classify(&smoothed),
            raw,
            smoothed: Some(smoothed),
        })
    }

    fn estimate_ratio(&self, face: &LandmarkSet) -> ProctorResult<PoseOutcome> {
        let get = |keypoint: Keypoint| {
            face.point(keypoint).ok_or_else(|| {
                ProctorError::analysis(
                    AnalysisStage::Pose,
                    format!("{:?} landmark missing", keypoint),
                )
            })
        };
        let nose = get(Keypoint::NoseTip)?;
        let chin = get(Keypoint::Chin)?;
        let left_edge = get(Keypoint::LeftFaceEdge)?;
        let right_edge = get(Keypoint::RightFaceEdge)?;
        let left_eye = get(Keypoint::LeftEyeOuter)?;
        let right_eye = get(Keypoint::RightEyeOuter)?;

        let to_left = (nose.x - left_edge.x).abs();
        let to_right = (nose.x - right_edge.x).abs();
        let horizontal = ratio_or_centred(to_left, to_left + to_right);

        let eye_mid_y = (left_eye.y + right_eye.y) / 2.0;
        let vertical = ratio_or_centred((nose.y - eye_mid_y).abs(), (chin.y - eye_mid_y).abs());

        let limits = &self.config.ratio;
        let label = if vertical > limits.down {
            HeadPose::Down
        } else if vertical < limits.up {
            HeadPose::Up
        } else if horizontal < limits.left {
            HeadPose::Left
        } else if horizontal > limits.right {
            HeadPose::Right
        } else {
            HeadPose::Forward
        };
        Ok(PoseOutcome {
            label,
            raw: None,
            smoothed: None,
        })
    }
}

fn ratio_or_centred(numerator: f32, denominator: f32) -> f32 {
    if denominator <= f32::EPSILON {
        0.5
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::pnp::MODEL_POINTS;
    use crate::detect::synthetic_face;
    use crate::landmarks::Point3D;
    use nalgebra::{Rotation3, Vector3};

    /// Compact landmark set whose PnP keypoints are the model projected at
    /// the given angles.
    fn projected_face(yaw_deg: f64, pitch_deg: f64, width: u32, height: u32) -> LandmarkSet {
        let camera = CameraIntrinsics::for_frame(width, height);
        let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), -yaw_deg.to_radians())
            * Rotation3::from_axis_angle(&Vector3::x_axis(), pitch_deg.to_radians());
        let translation = Vector3::new(0.0, 0.0, 3000.0);
        let project = |i: usize| {
            let p = MODEL_POINTS[i];
            let uv = camera
                .project(&(rotation * Vector3::new(p[0], p[1], p[2]) + translation))
                .unwrap();
            Point3D::new(
                (uv.x / width as f64) as f32,
                (uv.y / height as f64) as f32,
            )
        };
        let mut points = [Point3D::new(0.5, 0.5); 10];
        points[0] = project(0);
        points[1] = project(1);
        points[4] = project(2);
        points[5] = project(3);
        points[8] = project(4);
        points[9] = project(5);
        LandmarkSet::from_keypoints(points)
    }

    #[test]
    fn ema_converges_without_overshoot() {
        let mut ema = Ema::new(0.1);
        let mut previous = 0.0;
        for _ in 0..200 {
            let value = ema.update(30.0);
            assert!(value >= previous);
            assert!(value <= 30.0);
            previous = value;
        }
        assert!((previous - 30.0).abs() < 1e-3);

        let mut falling = Ema::new(1.0);
        assert_eq!(falling.update(-12.0), -12.0);
    }

    #[test]
    fn ema_never_overshoots_from_any_start() {
        let alphas = [0.001, 0.05, 0.1, 0.25, 0.5, 0.75, 0.9, 0.999];
        let starts = [-80.0, -12.5, -0.3, 0.0, 0.7, 9.99, 45.0, 89.0];
        let targets = [-60.0, -10.0, 0.0, 3.25, 10.0, 75.0];
        for alpha in alphas {
            for start in starts {
                for target in targets {
                    let mut ema = Ema { alpha, value: start };
                    let mut previous = start;
                    for _ in 0..100 {
                        let value = ema.update(target);
                        let (lo, hi) = if previous <= target {
                            (previous, target)
                        } else {
                            (target, previous)
                        };
                        assert!(
                            lo <= value && value <= hi,
                            "alpha {} start {} target {}: {} outside [{}, {}]",
                            alpha,
                            start,
                            target,
                            value,
                            lo,
                            hi
                        );
                        assert!((target - value).abs() <= (target - previous).abs());
                        previous = value;
                    }
                }
            }
        }
    }

    #[test]
    fn scene_faces_solve_to_their_rendered_pose() {
        let estimator = HeadPoseEstimator::default();
        for (center, yaw) in [((0.5, 0.5), 0.0), ((0.85, 0.5), 0.0), ((0.5, 0.5), 50.0)] {
            let face = synthetic_face((640, 480), center, 0.08, yaw);
            let mut state = estimator.new_state();
            let mut last = None;
            for _ in 0..61 {
                last = Some(estimator.estimate(&face, 640, 480, &mut state).unwrap());
            }
            let last = last.unwrap();
            let raw = last.raw.unwrap();
            assert!((raw.yaw - yaw).abs() < 1.0, "yaw {} vs {}", raw.yaw, yaw);
            assert!(raw.pitch.abs() < 1.0, "pitch {}", raw.pitch);
            let expected = if yaw > 0.0 {
                HeadPose::Right
            } else {
                HeadPose::Forward
            };
            assert_eq!(last.label, expected);
        }
    }

    #[test]
    fn classification_is_vertical_first() {
        let estimator = HeadPoseEstimator::default();
        let pose = |yaw, pitch| PoseEstimate {
            yaw,
            pitch,
            roll: 0.0,
        };
        assert_eq!(estimator.classify(&pose(-30.0, -11.0)), HeadPose::Up);
        assert_eq!(estimator.classify(&pose(30.0, 11.0)), HeadPose::Down);
        assert_eq!(estimator.classify(&pose(-11.0, 10.0)), HeadPose::Left);
        assert_eq!(estimator.classify(&pose(11.0, -10.0)), HeadPose::Right);
        assert_eq!(estimator.classify(&pose(10.0, 0.0)), HeadPose::Forward);
    }

    #[test]
    fn smoothed_pose_lags_a_sudden_turn() {
        let estimator = HeadPoseEstimator::default();
        let mut state = estimator.new_state();
        let face = projected_face(30.0, 0.0, 640, 480);

        let first = estimator.estimate(&face, 640, 480, &mut state).unwrap();
        let raw = first.raw.unwrap();
        assert!((raw.yaw - 30.0).abs() < 1.0);
        // One step of alpha 0.1 only reaches ~3 degrees.
        assert_eq!(first.label, HeadPose::Forward);

        let mut last = first;
        for _ in 0..40 {
            last = estimator.estimate(&face, 640, 480, &mut state).unwrap();
        }
        assert_eq!(last.label, HeadPose::Right);
        assert!(last.smoothed.unwrap().yaw <= raw.yaw + 1e-3);
        assert_eq!(state.updates(), 41);
    }

    #[test]
    fn failed_solve_keeps_previous_smoothed_pose() {
        let estimator = HeadPoseEstimator::default();
        let mut state = estimator.new_state();
        let face = projected_face(0.0, 25.0, 640, 480);
        for _ in 0..30 {
            estimator.estimate(&face, 640, 480, &mut state).unwrap();
        }
        let before = state.current();

        let collapsed = LandmarkSet::from_keypoints([Point3D::new(0.5, 0.5); 10]);
        let out = estimator.estimate(&collapsed, 640, 480, &mut state).unwrap();
        assert_eq!(out.raw, None);
        assert_eq!(out.smoothed, Some(before));
        assert_eq!(out.label, HeadPose::Down);
    }

    #[test]
    fn missing_keypoints_are_pose_failures() {
        let estimator = HeadPoseEstimator::default();
        let mut state = estimator.new_state();
        let mut face = projected_face(0.0, 0.0, 640, 480);
        face.points.truncate(5);
        let err = estimator.estimate(&face, 640, 480, &mut state).unwrap_err();
        assert_eq!(err.stage(), Some(AnalysisStage::Pose));
        assert_eq!(state.updates(), 0);
    }

    #[test]
    fn ratio_method_labels_turned_faces() {
        let estimator = HeadPoseEstimator::new(PoseConfig {
            method: PoseMethod::Ratio,
            ..PoseConfig::default()
        });
        let mut state = estimator.new_state();
        let label = |face: LandmarkSet, state: &mut PoseSmoothing| {
            estimator.estimate(&face, 640, 480, state).unwrap().label
        };
        assert_eq!(
            label(synthetic_face((640, 480), (0.5, 0.5), 0.1, 0.0), &mut state),
            HeadPose::Forward
        );
        assert_eq!(
            label(synthetic_face((640, 480), (0.5, 0.5), 0.1, -50.0), &mut state),
            HeadPose::Left
        );
        assert_eq!(
            label(synthetic_face((640, 480), (0.5, 0.5), 0.1, 50.0), &mut state),
            HeadPose::Right
        );
        assert_eq!(state.updates(), 0);
    }

    #[test]
    fn labels_render_as_strings() {
        assert_eq!(
            serde_json::to_string(&HeadPose::MultipleFaces).unwrap(),
            "\"Multiple Faces\""
        );
        assert_eq!(HeadPose::for_face_count(0), Some(HeadPose::NoFace));
        assert_eq!(HeadPose::for_face_count(1), None);
        assert_eq!(PoseMethod::parse("RATIO"), Some(PoseMethod::Ratio));
    }
}
