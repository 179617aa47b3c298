use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detect::{normalize_label, DetectionBox};
use crate::fusion::{Flag, PartialFlags};

pub const DEFAULT_OBJECT_THRESHOLD: f32 = 0.4;

/// Item classes the exam policy prohibits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProhibitedItem {
    Phone,
    Book,
}

impl ProhibitedItem {
    pub fn flag(self) -> Flag {
        match self {
            ProhibitedItem::Phone => Flag::PhoneDetected,
            ProhibitedItem::Book => Flag::BookDetected,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "phone" => Some(Self::Phone),
            "book" => Some(Self::Book),
            _ => None,
        }
    }
}

/// One detector label the policy watches for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectTarget {
    pub label: String,
    pub item: ProhibitedItem,
    #[serde(default = "default_threshold", alias = "threshold")]
    pub min_confidence: f32,
}

fn default_threshold() -> f32 {
    DEFAULT_OBJECT_THRESHOLD
}

impl ObjectTarget {
    pub fn new(label: impl Into<String>, item: ProhibitedItem, min_confidence: f32) -> Self {
        Self {
            label: label.into(),
            item,
            min_confidence,
        }
    }

    /// The detector classes mapped by default.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("cell phone", ProhibitedItem::Phone, DEFAULT_OBJECT_THRESHOLD),
            Self::new("book", ProhibitedItem::Book, DEFAULT_OBJECT_THRESHOLD),
        ]
    }
}

/// Presence per target label and per prohibited item for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectPresence {
    labels: BTreeMap<String, bool>,
    items: BTreeMap<ProhibitedItem, bool>,
}

impl ObjectPresence {
    /// Presence for a target label; `None` for labels that are not targets.
    pub fn label(&self, label: &str) -> Option<bool> {
        self.labels.get(&normalize_label(label)).copied()
    }

    /// Presence for an item; `None` when no target maps to it.
    pub fn item(&self, item: ProhibitedItem) -> Option<bool> {
        self.items.get(&item).copied()
    }

    pub fn labels(&self) -> impl Iterator<Item = (&str, bool)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn partial_flags(&self) -> PartialFlags {
        let mut flags = PartialFlags::default();
        for (item, present) in &self.items {
            flags.set(item.flag(), *present);
        }
        flags
    }
}

/// Reduces detector boxes to per-label presence.
#[derive(Clone, Debug)]
pub struct ObjectFlagReducer {
    targets: Vec<ObjectTarget>,
}

impl Default for ObjectFlagReducer {
    fn default() -> Self {
        Self::new(ObjectTarget::defaults())
    }
}

impl ObjectFlagReducer {
    pub fn new(targets: Vec<ObjectTarget>) -> Self {
        let targets = targets
            .into_iter()
            .map(|t| ObjectTarget {
                label: normalize_label(&t.label),
                ..t
            })
            .collect();
        Self { targets }
    }

    /// A label is present iff some box carries it with confidence at or
    /// above the target's threshold. Unknown labels are ignored.
    pub fn reduce(&self, boxes: &[DetectionBox]) -> ObjectPresence {
        let mut presence = ObjectPresence::default();
        for target in &self.targets {
            let present = boxes.iter().any(|b| {
                b.confidence.is_finite()
                    && b.confidence >= target.min_confidence
                    && b.normalized_label() == target.label
            });
            let label = presence.labels.entry(target.label.clone()).or_insert(false);
            *label |= present;
            let item = presence.items.entry(target.item).or_insert(false);
            *item |= present;
        }
        presence
    }
}
