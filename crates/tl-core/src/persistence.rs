use crate::error::StoreError;
use crate::types::{PendingSession, RequestCode, Session};
use async_trait::async_trait;
use std::sync::Arc;

/// Durable storage the scheduler writes through. Calls may suspend on I/O.
#[async_trait]
pub trait PendingStore: Send + Sync {
    async fn load_all_pending(&self) -> Result<Vec<PendingSession>, StoreError>;
    async fn save(&self, pending: &PendingSession) -> Result<(), StoreError>;
    async fn delete(&self, code: &RequestCode) -> Result<(), StoreError>;
    /// The session currently capturing, if any.
    async fn active_session(&self) -> Result<Option<Session>, StoreError>;
}

#[async_trait]
impl<T: PendingStore + ?Sized> PendingStore for Arc<T> {
    async fn load_all_pending(&self) -> Result<Vec<PendingSession>, StoreError> {
        (**self).load_all_pending().await
    }

    async fn save(&self, pending: &PendingSession) -> Result<(), StoreError> {
        (**self).save(pending).await
    }

    async fn delete(&self, code: &RequestCode) -> Result<(), StoreError> {
        (**self).delete(code).await
    }

    async fn active_session(&self) -> Result<Option<Session>, StoreError> {
        (**self).active_session().await
    }
}
