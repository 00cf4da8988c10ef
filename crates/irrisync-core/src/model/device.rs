// ── Device domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a single valve/piston.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PistonState {
    Active,
    Inactive,
}

impl PistonState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// The opposite state, for toggle requests.
    pub fn toggled(&self) -> Self {
        match self {
            Self::Active => Self::Inactive,
            Self::Inactive => Self::Active,
        }
    }
}

/// One controllable output channel on a device.
///
/// `version` is the reconciliation stamp: every accepted mutation
/// carries a strictly greater stamp, which is how stale fetches and
/// re-delivered push events are recognized and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piston {
    /// Piston number, positive and unique within its device.
    pub number: u32,
    pub state: PistonState,
    pub last_triggered: Option<DateTime<Utc>>,
    /// Monotonically increasing version stamp.
    pub version: u64,
}

/// A controllable device and its pistons, ordered by piston number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Opaque server-assigned identifier.
    pub id: String,
    pub name: String,
    pub pistons: Vec<Piston>,
}

impl Device {
    /// Look up a piston by number.
    pub fn piston(&self, number: u32) -> Option<&Piston> {
        self.pistons.iter().find(|p| p.number == number)
    }

    /// Pistons currently in the active state.
    pub fn active_pistons(&self) -> impl Iterator<Item = &Piston> {
        self.pistons.iter().filter(|p| p.state.is_active())
    }
}
