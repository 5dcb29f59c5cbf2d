//! Pure presence-state tracking.

use serde::{Deserialize, Serialize};

/// Whether the watched key is currently plugged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Present,
    Absent,
}

impl Presence {
    #[must_use]
    pub const fn from_bool(present: bool) -> Self {
        if present { Self::Present } else { Self::Absent }
    }

    #[must_use]
    pub const fn is_present(self) -> bool {
        matches!(self, Self::Present)
    }
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Present => f.write_str("present"),
            Self::Absent => f.write_str("absent"),
        }
    }
}

/// What changed between two consecutive presence observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    NoChange,
    BecamePresent,
    BecameAbsent,
}

/// Classify the edge between the previous and the current observation.
#[must_use]
pub const fn transition(prev: Presence, next: Presence) -> Transition {
    match (prev, next) {
        (Presence::Absent, Presence::Present) => Transition::BecamePresent,
        (Presence::Present, Presence::Absent) => Transition::BecameAbsent,
        _ => Transition::NoChange,
    }
}
