use crate::types::enums::AutoStopMode;
use crate::types::ids::RequestCode;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("frame interval must be a positive number of seconds, got {value}")]
    InvalidFrameInterval { value: f64 },
    #[error("auto-stop mode {mode:?} needs a non-zero stop value")]
    MissingStopValue { mode: AutoStopMode },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("storage backend error: {message}")]
    Backend { message: String },
    #[error("corrupt record: {message}")]
    Corrupt { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlarmError {
    #[error("alarm rejected: {message}")]
    Rejected { message: String },
    #[error("alarm facility unavailable")]
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("capture failed: {message}")]
    Failed { message: String },
    #[error("session not found")]
    SessionNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("invalid schedule request: {message}")]
    InvalidScheduleRequest { message: String },
    #[error("could not cancel conflicting session {loser}: {reason}")]
    ConflictResolutionFailure {
        loser: RequestCode,
        /// Losers cancelled before the failure and then put back.
        restored: Vec<RequestCode>,
        reason: String,
    },
    #[error("persistence failure: {message}")]
    PersistenceFailure { message: String },
    #[error("alarm registration failure: {message}")]
    AlarmRegistrationFailure { message: String },
    #[error("capture error: {message}")]
    Capture { message: String },
    #[error("scheduler is not running")]
    Closed,
}

impl SchedulerError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidScheduleRequest {
            message: message.into(),
        }
    }
}

impl From<StoreError> for SchedulerError {
    fn from(value: StoreError) -> Self {
        Self::PersistenceFailure {
            message: value.to_string(),
        }
    }
}

impl From<AlarmError> for SchedulerError {
    fn from(value: AlarmError) -> Self {
        Self::AlarmRegistrationFailure {
            message: value.to_string(),
        }
    }
}

impl From<CaptureError> for SchedulerError {
    fn from(value: CaptureError) -> Self {
        Self::Capture {
            message: value.to_string(),
        }
    }
}
