use serde::{Deserialize, Serialize};

/// When a running session stops by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AutoStopMode {
    /// Runs until stopped by hand.
    Off,
    /// Runs for `auto_stop_value` minutes.
    Time,
    /// Stops after `auto_stop_value` frames.
    Frames,
}

impl AutoStopMode {
    pub fn is_bounded(self) -> bool {
        !matches!(self, Self::Off)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SessionStatus {
    Active,
    Completed,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "PascalCase")]
pub enum CancelReason {
    User,
    /// Lost arbitration against a later-starting booking.
    Conflict { by: crate::types::ids::RequestCode },
}
