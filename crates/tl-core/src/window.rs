use crate::types::{PendingSession, Session};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// End of a session window. `Unbounded` sorts after every instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WindowEnd {
    At(DateTime<FixedOffset>),
    Unbounded,
}

/// Half-open interval `[start, end)` a session occupies. Instants are compared in
/// absolute time, whatever offset they carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionWindow {
    pub start: DateTime<FixedOffset>,
    pub end: WindowEnd,
}

impl SessionWindow {
    pub fn bounded(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        Self {
            start,
            end: WindowEnd::At(end),
        }
    }

    pub fn unbounded(start: DateTime<FixedOffset>) -> Self {
        Self {
            start,
            end: WindowEnd::Unbounded,
        }
    }

    /// Window for settings starting at `start`; saturates to unbounded when the end
    /// is not representable.
    pub fn from_settings(
        start: DateTime<FixedOffset>,
        settings: &crate::types::ImagingSettings,
    ) -> Self {
        let end = settings
            .run_duration()
            .and_then(|duration| start.checked_add_signed(duration))
            .map_or(WindowEnd::Unbounded, WindowEnd::At);
        Self { start, end }
    }

    pub fn overlaps(&self, other: &SessionWindow) -> bool {
        WindowEnd::At(self.start) < other.end && WindowEnd::At(other.start) < self.end
    }

    pub fn contains(&self, instant: DateTime<FixedOffset>) -> bool {
        self.start <= instant && WindowEnd::At(instant) < self.end
    }
}

pub trait Windowed {
    fn window(&self) -> SessionWindow;
}

impl Windowed for SessionWindow {
    fn window(&self) -> SessionWindow {
        *self
    }
}

impl Windowed for PendingSession {
    fn window(&self) -> SessionWindow {
        SessionWindow::from_settings(self.scheduled_start, &self.settings)
    }
}

impl Windowed for Session {
    fn window(&self) -> SessionWindow {
        SessionWindow::from_settings(self.started_at, &self.settings)
    }
}
