use crate::types::ids::RequestCode;
use crate::types::settings::ImagingSettings;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// A booked session waiting for its trigger time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSession {
    pub request_code: RequestCode,
    pub name: String,
    pub settings: ImagingSettings,
    pub scheduled_start: DateTime<FixedOffset>,
}

impl PendingSession {
    /// A fresh booking with a newly generated request code.
    pub fn new(
        name: impl Into<String>,
        settings: ImagingSettings,
        scheduled_start: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            request_code: RequestCode::generate(),
            name: name.into(),
            settings,
            scheduled_start,
        }
    }

    /// The same booking moved to a new start time and/or settings.
    pub fn rescheduled(
        &self,
        settings: ImagingSettings,
        scheduled_start: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            request_code: self.request_code.clone(),
            name: self.name.clone(),
            settings,
            scheduled_start,
        }
    }
}
