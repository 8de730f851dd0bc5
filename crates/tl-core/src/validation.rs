use crate::error::SchedulerError;
use crate::types::{PendingSession, RequestCode, Session};
use chrono::{DateTime, Utc};

pub fn validate_future_start(
    candidate: &PendingSession,
    now: DateTime<Utc>,
) -> Result<(), SchedulerError> {
    if candidate.scheduled_start.with_timezone(&Utc) <= now {
        return Err(SchedulerError::invalid(format!(
            "start {} is not in the future",
            candidate.scheduled_start
        )));
    }
    Ok(())
}

pub fn validate_name(candidate: &PendingSession) -> Result<(), SchedulerError> {
    if candidate.name.trim().is_empty() {
        return Err(SchedulerError::invalid("session name is empty"));
    }
    Ok(())
}

/// Two bookings sharing a start instant cannot be ordered, so the later-submitted
/// one is refused. `exclude` is the booking being replaced, if any.
pub fn validate_start_collision<'a>(
    candidate: &PendingSession,
    pending: impl IntoIterator<Item = &'a PendingSession>,
    active: Option<&Session>,
    exclude: Option<&RequestCode>,
) -> Result<(), SchedulerError> {
    for other in pending {
        if Some(&other.request_code) == exclude {
            continue;
        }
        if other.scheduled_start == candidate.scheduled_start {
            return Err(SchedulerError::invalid(format!(
                "start time already taken by {}",
                other.request_code
            )));
        }
    }
    if let Some(active) = active {
        if active.started_at == candidate.scheduled_start {
            return Err(SchedulerError::invalid(format!(
                "start time already taken by active session {}",
                active.id
            )));
        }
    }
    Ok(())
}
