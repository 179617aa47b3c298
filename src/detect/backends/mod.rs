pub mod replay;
pub mod scripted;
pub mod static_output;

pub use replay::{ReplayEntry, ReplayProvider};
pub use scripted::{synthetic_face, ScriptedSceneProvider, SceneKind};
pub use static_output::StaticProvider;
