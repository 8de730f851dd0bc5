use crate::error::CaptureError;
use crate::types::{PendingSession, Session, SessionId};
use async_trait::async_trait;
use std::sync::Arc;

/// Hand-off point to the capture pipeline.
#[async_trait]
pub trait CaptureControl: Send + Sync {
    /// Starts capturing for a triggered booking and returns the new active session.
    async fn start(&self, pending: &PendingSession) -> Result<Session, CaptureError>;
    async fn stop(&self, session_id: &SessionId) -> Result<(), CaptureError>;
}

#[async_trait]
impl<T: CaptureControl + ?Sized> CaptureControl for Arc<T> {
    async fn start(&self, pending: &PendingSession) -> Result<Session, CaptureError> {
        (**self).start(pending).await
    }

    async fn stop(&self, session_id: &SessionId) -> Result<(), CaptureError> {
        (**self).stop(session_id).await
    }
}
