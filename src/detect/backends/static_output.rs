use anyhow::Result;

use crate::detect::provider::{LandmarkProvider, ObjectSignalProvider};
use crate::detect::result::DetectionBox;
use crate::frame::RgbView;
use crate::landmarks::LandmarkSet;

/// Provider that returns the same output for every frame. For tests and
/// wiring checks.
#[derive(Clone, Debug, Default)]
pub struct StaticProvider {
    faces: Vec<LandmarkSet>,
    detections: Vec<DetectionBox>,
}

impl StaticProvider {
    pub fn new(faces: Vec<LandmarkSet>, detections: Vec<DetectionBox>) -> Self {
        Self { faces, detections }
    }
}

impl LandmarkProvider for StaticProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    fn detect(&self, _frame: &RgbView<'_>) -> Result<Vec<LandmarkSet>> {
        Ok(self.faces.clone())
    }
}

impl ObjectSignalProvider for StaticProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    fn detect(&self, _frame: &RgbView<'_>) -> Result<Vec<DetectionBox>> {
        Ok(self.detections.clone())
    }
}
