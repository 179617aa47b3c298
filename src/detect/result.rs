use serde::{Deserialize, Serialize};

/// One object detection for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    /// Class name as reported by the detector (e.g. "cell phone").
    pub label: String,
    /// Detector confidence in [0,1].
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in pixels.
    #[serde(default, alias = "bounding_box")]
    pub bbox: [f32; 4],
}

impl DetectionBox {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    /// Label normalized for matching against configured targets.
    pub fn normalized_label(&self) -> String {
        normalize_label(&self.label)
    }
}

pub(crate) fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}
