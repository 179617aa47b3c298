//! Exam proctoring signal fusion.
//!
//! This crate turns two noisy per-frame signals, facial landmarks and object
//! detections, into one stable, always fully populated violation record per
//! analyzed frame.
//!
//! # Guarantees
//!
//! 1. **Fully populated**: every emitted `ProctorFlags` carries all six flags.
//! 2. **Fail safe**: a failed sub-analysis never clears an alarm and never
//!    invents positive evidence (polarity-aware defaults, see `fusion`).
//! 3. **Consistent**: `multiple_faces` or `no_face_detected` always imply
//!    `face_out_of_bounds` and never coexist with `is_looking_away`.
//! 4. **Isolated sessions**: pose smoothing lives in one `SessionState` per
//!    stream and is never shared.
//! 5. **No frame retention**: frame bytes are zeroized on drop and never logged.
//!
//! # Module Structure
//!
//! - `frame`, `landmarks`: input types (`Frame`, `RgbView`, `LandmarkSet`)
//! - `detect`: provider contracts, registry, bundled providers
//! - `analysis`: geometry, head pose (PnP + smoothing), object reduction
//! - `fusion`: `ProctorFlags` and the default-fill policy
//! - `session`: streaming loop, sinks, statistics
//! - `ingest`: frame sources (`stub://`, raw files)
//! - `config`: `ProctorConfig` loading (file, env, validation)

pub mod analysis;
#[cfg(feature = "annotate")]
pub mod annotate;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod fusion;
pub mod ingest;
pub mod landmarks;
pub mod session;

pub use analysis::{
    BoundsRect, FaceAssessment, GeometricFaceAnalyzer, GeometryConfig, HeadPose,
    HeadPoseEstimator, ObjectFlagReducer, ObjectPresence, ObjectTarget, PoseConfig, PoseEstimate,
    PoseMethod, PoseOutcome, PoseSmoothing, ProhibitedItem, RatioLimits,
};
pub use config::{ProctorConfig, ProviderKind, ProviderSettings};
pub use detect::{
    DetectionBox, LandmarkProvider, ObjectSignalProvider, ProviderRegistry, ReplayEntry,
    ReplayProvider, ScriptedSceneProvider, StaticProvider,
};
pub use error::{AnalysisStage, ProctorError, ProctorResult};
pub use frame::{Frame, PixelFormat, RgbView};
pub use fusion::{Flag, FlagFusionEngine, PartialFlags, Polarity, ProctorFlags};
pub use ingest::{FrameSource, RawFileSource, SourceConfig, SourceStats, SyntheticSource};
pub use landmarks::{Keypoint, LandmarkLayout, LandmarkSet, Point3D};
pub use session::{
    ChannelSink, FrameReport, FrameSink, JsonLinesSink, OutputVariant, SessionConfig,
    SessionPhase, SessionReport, SessionState, SessionStats, StopSignal, StreamingSession,
    Termination,
};
