//! Per-frame analyzers.
//!
//! - `geometry`: face multiplicity, bounds and instantaneous gaze
//! - `pose`: head-pose label with per-session smoothing (`pnp` does the solve)
//! - `objects`: prohibited-item presence from detector boxes

pub mod geometry;
pub mod objects;
pub mod pnp;
pub mod pose;

pub use geometry::{BoundsRect, FaceAssessment, GeometricFaceAnalyzer, GeometryConfig};
pub use objects::{ObjectFlagReducer, ObjectPresence, ObjectTarget, ProhibitedItem};
pub use pose::{
    HeadPose, HeadPoseEstimator, PoseConfig, PoseEstimate, PoseMethod, PoseOutcome,
    PoseSmoothing, RatioLimits,
};
