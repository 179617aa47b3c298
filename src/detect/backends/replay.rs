//! Replay of recorded detector output.
//!
//! The log is JSON lines, one entry per frame sequence:
//!
//! ```text
//! {"sequence":0,"faces":[{"layout":"keypoints","points":[...]}],"detections":[{"label":"book","confidence":0.7,"bbox":[0,0,10,10]}]}
//! {"sequence":1,"error":"detector timeout"}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. A frame with no entry
//! is reported as a provider failure, not as an empty scene.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::detect::provider::{LandmarkProvider, ObjectSignalProvider};
use crate::detect::result::DetectionBox;
use crate::frame::RgbView;
use crate::landmarks::LandmarkSet;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayEntry {
    pub sequence: u64,
    #[serde(default)]
    pub faces: Vec<LandmarkSet>,
    #[serde(default)]
    pub detections: Vec<DetectionBox>,
    /// Recorded detector failure for this frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct ReplayProvider {
    entries: HashMap<u64, ReplayEntry>,
}

impl ReplayProvider {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay log {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut entries = HashMap::new();
        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry: ReplayEntry = serde_json::from_str(line)
                .with_context(|| format!("invalid replay entry on line {}", idx + 1))?;
            if entries.insert(entry.sequence, entry).is_some() {
                return Err(anyhow!("duplicate replay entry on line {}", idx + 1));
            }
        }
        if entries.is_empty() {
            return Err(anyhow!("replay log contains no entries"));
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, sequence: u64) -> Result<&ReplayEntry> {
        let entry = self
            .entries
            .get(&sequence)
            .ok_or_else(|| anyhow!("no recorded output for frame {}", sequence))?;
        if let Some(err) = &entry.error {
            return Err(anyhow!("recorded failure for frame {}: {}", sequence, err));
        }
        Ok(entry)
    }
}

impl LandmarkProvider for ReplayProvider {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&self, frame: &RgbView<'_>) -> Result<Vec<LandmarkSet>> {
        Ok(self.entry(frame.sequence())?.faces.clone())
    }
}

impl ObjectSignalProvider for ReplayProvider {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&self, frame: &RgbView<'_>) -> Result<Vec<DetectionBox>> {
        Ok(self.entry(frame.sequence())?.detections.clone())
    }
}
