mod backends;
mod provider;
mod registry;
mod result;

pub use backends::{
    synthetic_face, ReplayEntry, ReplayProvider, SceneKind, ScriptedSceneProvider, StaticProvider,
};
pub use provider::{LandmarkProvider, ObjectSignalProvider};
pub use registry::ProviderRegistry;
pub use result::DetectionBox;
pub(crate) use result::normalize_label;
