use crate::error::StoreError;
use crate::types::{Frame, Session, SessionId, SessionStatus};
use chrono::{DateTime, FixedOffset};

pub trait SessionRepository {
    fn get(&self, id: &SessionId) -> Result<Session, StoreError>;
    fn get_active(&self) -> Result<Option<Session>, StoreError>;
    fn list(&self) -> Result<Vec<Session>, StoreError>;
    fn create(&self, session: &Session) -> Result<(), StoreError>;
    fn complete(
        &self,
        id: &SessionId,
        status: SessionStatus,
        ended_at: DateTime<FixedOffset>,
    ) -> Result<Session, StoreError>;
}

pub trait FrameRepository {
    fn append(&self, frame: &Frame) -> Result<(), StoreError>;
    fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<Frame>, StoreError>;
}
