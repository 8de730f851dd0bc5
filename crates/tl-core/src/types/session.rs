use crate::types::enums::SessionStatus;
use crate::types::ids::{FrameId, RequestCode, SessionId};
use crate::types::pending::PendingSession;
use crate::types::settings::ImagingSettings;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model: String,
    pub os_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    pub key: String,
    pub value: String,
}

/// An imaging session that has started, running or finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub request_code: Option<RequestCode>,
    pub name: String,
    pub settings: ImagingSettings,
    pub status: SessionStatus,
    pub started_at: DateTime<FixedOffset>,
    pub ended_at: Option<DateTime<FixedOffset>>,
    pub location: Option<Coordinates>,
    pub device: DeviceInfo,
    pub app_version: String,
    pub metadata: Vec<MetadataField>,
}

impl Session {
    pub fn from_pending(
        pending: &PendingSession,
        started_at: DateTime<FixedOffset>,
        device: DeviceInfo,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            id: SessionId::generate(),
            request_code: Some(pending.request_code.clone()),
            name: pending.name.clone(),
            settings: pending.settings,
            status: SessionStatus::Active,
            started_at,
            ended_at: None,
            location: None,
            device,
            app_version: app_version.into(),
            metadata: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub id: FrameId,
    pub session_id: SessionId,
    pub index: u32,
    pub captured_at: DateTime<FixedOffset>,
    pub filename: String,
}
