//! Flag fusion.
//!
//! Each sub-analysis contributes a partial record. Keys that no source
//! supplied (including every key of a failed source) take their polarity
//! default: flags that need positive evidence default to false, flags whose
//! evidence is the absence of a face default to true. A failure can therefore
//! never clear a "no face" alarm, and never invent a phone.

use serde::{Deserialize, Serialize};

use crate::analysis::{FaceAssessment, ObjectPresence};
use crate::error::ProctorResult;

/// How a flag behaves when its source produced nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    EvidenceRequired,
    AbsenceImpliesRisk,
}

impl Polarity {
    pub fn default_value(self) -> bool {
        matches!(self, Polarity::AbsenceImpliesRisk)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flag {
    MultipleFaces,
    NoFaceDetected,
    FaceOutOfBounds,
    IsLookingAway,
    PhoneDetected,
    BookDetected,
}

impl Flag {
    pub const ALL: [Flag; 6] = [
        Flag::MultipleFaces,
        Flag::NoFaceDetected,
        Flag::FaceOutOfBounds,
        Flag::IsLookingAway,
        Flag::PhoneDetected,
        Flag::BookDetected,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Flag::MultipleFaces => "multiple_faces",
            Flag::NoFaceDetected => "no_face_detected",
            Flag::FaceOutOfBounds => "face_out_of_bounds",
            Flag::IsLookingAway => "is_looking_away",
            Flag::PhoneDetected => "phone_detected",
            Flag::BookDetected => "book_detected",
        }
    }

    pub fn polarity(self) -> Polarity {
        match self {
            Flag::NoFaceDetected | Flag::FaceOutOfBounds => Polarity::AbsenceImpliesRisk,
            _ => Polarity::EvidenceRequired,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Canonical per-frame violation record. Always fully populated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProctorFlags {
    pub multiple_faces: bool,
    pub no_face_detected: bool,
    pub face_out_of_bounds: bool,
    pub is_looking_away: bool,
    pub phone_detected: bool,
    pub book_detected: bool,
}

impl ProctorFlags {
    /// Record for a frame that could not be analyzed at all.
    pub fn conservative() -> Self {
        PartialFlags::default().complete()
    }

    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::MultipleFaces => self.multiple_faces,
            Flag::NoFaceDetected => self.no_face_detected,
            Flag::FaceOutOfBounds => self.face_out_of_bounds,
            Flag::IsLookingAway => self.is_looking_away,
            Flag::PhoneDetected => self.phone_detected,
            Flag::BookDetected => self.book_detected,
        }
    }

    pub fn any_violation(&self) -> bool {
        Flag::ALL.iter().any(|f| self.get(*f))
    }

    pub fn violations(&self) -> impl Iterator<Item = Flag> + '_ {
        Flag::ALL.into_iter().filter(|f| self.get(*f))
    }
}

/// Flags contributed by one sub-analysis. `None` means "no opinion".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartialFlags {
    values: [Option<bool>; 6],
}

impl PartialFlags {
    pub fn set(&mut self, flag: Flag, value: bool) {
        self.values[flag.index()] = Some(value);
    }

    pub fn get(&self, flag: Flag) -> Option<bool> {
        self.values[flag.index()]
    }

    /// Union of keys. Where both sides speak, either raising the flag wins.
    pub fn merge(mut self, other: PartialFlags) -> Self {
        for (mine, theirs) in self.values.iter_mut().zip(other.values) {
            *mine = match (*mine, theirs) {
                (Some(a), Some(b)) => Some(a || b),
                (a, b) => a.or(b),
            };
        }
        self
    }

    /// Fill missing keys with polarity defaults and enforce the face-count
    /// invariant.
    pub fn complete(&self) -> ProctorFlags {
        let value = |flag: Flag| {
            self.get(flag)
                .unwrap_or_else(|| flag.polarity().default_value())
        };
        let mut flags = ProctorFlags {
            multiple_faces: value(Flag::MultipleFaces),
            no_face_detected: value(Flag::NoFaceDetected),
            face_out_of_bounds: value(Flag::FaceOutOfBounds),
            is_looking_away: value(Flag::IsLookingAway),
            phone_detected: value(Flag::PhoneDetected),
            book_detected: value(Flag::BookDetected),
        };
        if flags.multiple_faces || flags.no_face_detected {
            flags.face_out_of_bounds = true;
            flags.is_looking_away = false;
        }
        flags
    }
}

/// Combines the face and object analyses of one frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlagFusionEngine;

impl FlagFusionEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn fuse(
        &self,
        face: &ProctorResult<FaceAssessment>,
        objects: &ProctorResult<ObjectPresence>,
    ) -> ProctorFlags {
        let face_flags = match face {
            Ok(assessment) => assessment.partial_flags(),
            Err(err) => {
                log::warn!("face analysis unavailable, using defaults: {}", err);
                PartialFlags::default()
            }
        };
        let object_flags = match objects {
            Ok(presence) => presence.partial_flags(),
            Err(err) => {
                log::warn!("object analysis unavailable, using defaults: {}", err);
                PartialFlags::default()
            }
        };
        face_flags.merge(object_flags).complete()
    }

    /// Record for a frame that failed before analysis.
    pub fn conservative(&self) -> ProctorFlags {
        ProctorFlags::conservative()
    }
}
