use crate::error::StoreError;
use crate::types::{PendingSession, RequestCode};

pub trait PendingRepository {
    /// Every pending session, earliest start first.
    fn list(&self) -> Result<Vec<PendingSession>, StoreError>;
    fn get(&self, code: &RequestCode) -> Result<Option<PendingSession>, StoreError>;
    /// Inserts, or replaces the record with the same request code.
    fn upsert(&self, pending: &PendingSession) -> Result<(), StoreError>;
    /// Returns whether a record was removed.
    fn delete(&self, code: &RequestCode) -> Result<bool, StoreError>;
}
