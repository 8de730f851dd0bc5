use crate::types::enums::CancelReason;
use crate::types::ids::{RequestCode, SessionId};
use crate::types::pending::PendingSession;
use crate::types::session::Session;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventBody {
    PendingScheduled {
        pending: PendingSession,
    },
    PendingRescheduled {
        previous: PendingSession,
        pending: PendingSession,
    },
    PendingCancelled {
        pending: PendingSession,
        reason: CancelReason,
    },
    SessionTriggered {
        request_code: RequestCode,
        session: Session,
    },
    ActivePreempted {
        session_id: SessionId,
        by: RequestCode,
    },
    TriggerIgnored {
        request_code: RequestCode,
    },
    /// The booking was due but capture could not take over; it is no longer pending.
    TriggerFailed {
        request_code: RequestCode,
        reason: String,
    },
}

impl EventBody {
    pub fn request_code(&self) -> &RequestCode {
        match self {
            Self::PendingScheduled { pending }
            | Self::PendingRescheduled { pending, .. }
            | Self::PendingCancelled { pending, .. } => &pending.request_code,
            Self::SessionTriggered { request_code, .. }
            | Self::TriggerIgnored { request_code }
            | Self::TriggerFailed { request_code, .. } => request_code,
            Self::ActivePreempted { by, .. } => by,
        }
    }
}
