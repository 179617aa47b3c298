//! Facial landmark sets as produced by the external face-mesh detector.
//!
//! Coordinates are normalized to [0,1] per axis. "Left" and "right" always
//! mean image-space directions, not the subject's.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Point3D {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Pixel coordinates for a frame of the given size.
    pub fn to_pixels(&self, width: u32, height: u32) -> (f32, f32) {
        (self.x * width as f32, self.y * height as f32)
    }
}

/// Named keypoints the analyzers rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keypoint {
    NoseTip,
    Chin,
    LeftEyeInner,
    RightEyeInner,
    LeftEyeOuter,
    RightEyeOuter,
    LeftFaceEdge,
    RightFaceEdge,
    MouthLeft,
    MouthRight,
}

impl Keypoint {
    /// Compact layout order.
    pub const ALL: [Keypoint; 10] = [
        Keypoint::NoseTip,
        Keypoint::Chin,
        Keypoint::LeftEyeInner,
        Keypoint::RightEyeInner,
        Keypoint::LeftEyeOuter,
        Keypoint::RightEyeOuter,
        Keypoint::LeftFaceEdge,
        Keypoint::RightFaceEdge,
        Keypoint::MouthLeft,
        Keypoint::MouthRight,
    ];

    fn compact_index(self) -> usize {
        match self {
            Keypoint::NoseTip => 0,
            Keypoint::Chin => 1,
            Keypoint::LeftEyeInner => 2,
            Keypoint::RightEyeInner => 3,
            Keypoint::LeftEyeOuter => 4,
            Keypoint::RightEyeOuter => 5,
            Keypoint::LeftFaceEdge => 6,
            Keypoint::RightFaceEdge => 7,
            Keypoint::MouthLeft => 8,
            Keypoint::MouthRight => 9,
        }
    }

    fn mediapipe_index(self) -> usize {
        match self {
            Keypoint::NoseTip => 1,
            Keypoint::Chin => 152,
            Keypoint::LeftEyeInner => 133,
            Keypoint::RightEyeInner => 362,
            Keypoint::LeftEyeOuter => 33,
            Keypoint::RightEyeOuter => 263,
            Keypoint::LeftFaceEdge => 234,
            Keypoint::RightFaceEdge => 454,
            Keypoint::MouthLeft => 57,
            Keypoint::MouthRight => 287,
        }
    }
}

/// How a landmark set's point indices map to keypoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkLayout {
    /// 468/478-point face mesh.
    #[default]
    #[serde(rename = "mediapipe468", alias = "mediapipe")]
    MediaPipe468,
    /// Only the ten keypoints, in `Keypoint::ALL` order.
    Keypoints,
}

impl LandmarkLayout {
    pub fn index_of(self, keypoint: Keypoint) -> usize {
        match self {
            LandmarkLayout::MediaPipe468 => keypoint.mediapipe_index(),
            LandmarkLayout::Keypoints => keypoint.compact_index(),
        }
    }

    /// Minimum number of points a set must carry to expose every keypoint.
    pub fn min_points(self) -> usize {
        Keypoint::ALL
            .iter()
            .map(|k| self.index_of(*k) + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Landmarks for one detected face in one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    #[serde(default)]
    pub layout: LandmarkLayout,
    pub points: Vec<Point3D>,
}

impl LandmarkSet {
    pub fn new(layout: LandmarkLayout, points: Vec<Point3D>) -> Self {
        Self { layout, points }
    }

    /// Build a compact set from keypoints given in `Keypoint::ALL` order.
    pub fn from_keypoints(points: [Point3D; 10]) -> Self {
        Self {
            layout: LandmarkLayout::Keypoints,
            points: points.to_vec(),
        }
    }

    /// Look up a keypoint. `None` when the index is out of range or the
    /// coordinates are not finite.
    pub fn point(&self, keypoint: Keypoint) -> Option<Point3D> {
        self.points
            .get(self.layout.index_of(keypoint))
            .copied()
            .filter(Point3D::is_finite)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_layout_resolves_every_keypoint() {
        let mut points = [Point3D::default(); 10];
        for (i, p) in points.iter_mut().enumerate() {
            p.x = i as f32 / 10.0;
        }
        let set = LandmarkSet::from_keypoints(points);
        assert_eq!(set.point(Keypoint::NoseTip).unwrap().x, 0.0);
        assert_eq!(set.point(Keypoint::MouthRight).unwrap().x, 0.9);
        assert_eq!(LandmarkLayout::Keypoints.min_points(), 10);
    }

    #[test]
    fn mediapipe_layout_needs_full_mesh() {
        let set = LandmarkSet::new(LandmarkLayout::MediaPipe468, vec![Point3D::new(0.5, 0.5); 10]);
        assert!(set.point(Keypoint::NoseTip).is_some());
        assert!(set.point(Keypoint::Chin).is_none());
        assert_eq!(LandmarkLayout::MediaPipe468.min_points(), 455);
    }

    #[test]
    fn non_finite_points_are_not_exposed() {
        let mut points = [Point3D::new(0.5, 0.5); 10];
        points[0].x = f32::NAN;
        let set = LandmarkSet::from_keypoints(points);
        assert!(set.point(Keypoint::NoseTip).is_none());
        assert!(set.point(Keypoint::Chin).is_some());
    }

    #[test]
    fn layout_deserializes_from_snake_case() {
        let set: LandmarkSet =
            serde_json::from_str(r#"{"layout":"keypoints","points":[{"x":0.1,"y":0.2}]}"#)
                .unwrap();
        assert_eq!(set.layout, LandmarkLayout::Keypoints);
        assert_eq!(set.points[0].z, 0.0);
    }
}
