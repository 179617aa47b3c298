use anyhow::Result;

use crate::detect::result::DetectionBox;
use crate::frame::RgbView;
use crate::landmarks::LandmarkSet;

/// Face-mesh detector contract.
///
/// Providers are loaded once per process and shared across sessions, so
/// `detect` takes `&self` and implementations must be reentrant. Any
/// per-call scratch state belongs behind the implementation's own locking.
///
/// Implementations must treat the pixel slice as read-only and must not keep
/// it beyond the call.
pub trait LandmarkProvider: Send + Sync {
    /// Provider identifier.
    fn name(&self) -> &'static str;

    /// Detect zero or more faces.
    fn detect(&self, frame: &RgbView<'_>) -> Result<Vec<LandmarkSet>>;

    /// Optional warm-up hook, run once at registration.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

/// Object detector contract. Same sharing rules as `LandmarkProvider`.
pub trait ObjectSignalProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, frame: &RgbView<'_>) -> Result<Vec<DetectionBox>>;

    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
