//! Temporal arbitration between two sessions.
//!
//! Only one capture pipeline can run at a time, so when two windows overlap the
//! session that starts later wins: by the time it starts, whatever else is queued
//! or running has to make room. Windows are half-open, so a session ending exactly
//! when another begins does not conflict with it.

use crate::window::Windowed;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Outcome of comparing `subject` against `other`, seen from `subject`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConflictOutcome {
    NoConflict,
    /// `subject` starts later and will cancel `other`.
    CancelsOther,
    /// `other` starts later and will cancel `subject`.
    CancelledByOther,
}

impl ConflictOutcome {
    /// The same comparison seen from the other side.
    pub fn reversed(self) -> Self {
        match self {
            Self::NoConflict => Self::NoConflict,
            Self::CancelsOther => Self::CancelledByOther,
            Self::CancelledByOther => Self::CancelsOther,
        }
    }

    pub fn is_conflict(self) -> bool {
        self != Self::NoConflict
    }
}

/// Equal start times never yield a cancelling outcome; callers that must rule such
/// pairs out do so themselves.
pub fn conflict_of<S, O>(subject: &S, other: &O) -> ConflictOutcome
where
    S: Windowed + ?Sized,
    O: Windowed + ?Sized,
{
    let subject = subject.window();
    let other = other.window();
    if !subject.overlaps(&other) {
        return ConflictOutcome::NoConflict;
    }
    match subject.start.cmp(&other.start) {
        Ordering::Greater => ConflictOutcome::CancelsOther,
        Ordering::Less => ConflictOutcome::CancelledByOther,
        Ordering::Equal => ConflictOutcome::NoConflict,
    }
}
