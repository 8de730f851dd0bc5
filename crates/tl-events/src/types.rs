use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// Envelope for everything the scheduler announces. `seq` is zero until the
/// record has been appended to an [`crate::EventStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub seq: i64,
    pub at: DateTime<Utc>,
    pub request_code: Option<String>,
    pub source: EventSource,
    pub body: Value,
}

impl EventRecord {
    pub fn new(source: EventSource, request_code: Option<String>, body: Value) -> Self {
        Self {
            id: format!("evt_{}", Ulid::new()),
            seq: 0,
            at: Utc::now(),
            request_code,
            source,
            body,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EventSource {
    Api,
    Alarm,
    Restore,
}

impl EventSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "Api",
            Self::Alarm => "Alarm",
            Self::Restore => "Restore",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Api" => Some(Self::Api),
            "Alarm" => Some(Self::Alarm),
            "Restore" => Some(Self::Restore),
            _ => None,
        }
    }
}
