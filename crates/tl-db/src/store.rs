use crate::frame_repo::FrameRepo;
use crate::pending_repo::PendingRepo;
use crate::session_repo::SessionRepo;
use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tl_core::error::StoreError;
use tl_core::pending::PendingRepository;
use tl_core::persistence::PendingStore;
use tl_core::sessions::{FrameRepository, SessionRepository};
use tl_core::store::Store;
use tl_core::types::{Frame, PendingSession, RequestCode, Session, SessionId};

pub struct DbStore {
    conn: Connection,
}

impl DbStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Store for DbStore {
    type Pending<'a>
        = PendingRepo<'a>
    where
        Self: 'a;
    type Sessions<'a>
        = SessionRepo<'a>
    where
        Self: 'a;
    type Frames<'a>
        = FrameRepo<'a>
    where
        Self: 'a;

    fn pending(&self) -> Self::Pending<'_> {
        PendingRepo::new(&self.conn)
    }

    fn sessions(&self) -> Self::Sessions<'_> {
        SessionRepo::new(&self.conn)
    }

    fn frames(&self) -> Self::Frames<'_> {
        FrameRepo::new(&self.conn)
    }

    fn with_tx<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Self) -> Result<T, StoreError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(crate::util::db_err)?;
        match f(self) {
            Ok(value) => {
                self.conn
                    .execute_batch("COMMIT")
                    .map_err(crate::util::db_err)?;
                Ok(value)
            }
            Err(err) => {
                self.conn
                    .execute_batch("ROLLBACK")
                    .map_err(crate::util::db_err)?;
                Err(err)
            }
        }
    }
}

/// A [`DbStore`] shared with async callers. Every call runs on the blocking pool
/// while holding the connection lock.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<DbStore>>,
}

impl SharedStore {
    pub fn new(store: DbStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub async fn run<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&DbStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let store = inner.lock().map_err(|_| StoreError::Backend {
                message: "store lock poisoned".to_string(),
            })?;
            f(&store)
        })
        .await
        .map_err(|err| StoreError::Backend {
            message: err.to_string(),
        })?
    }

    pub async fn sessions(&self) -> Result<Vec<Session>, StoreError> {
        self.run(|store| store.sessions().list()).await
    }

    /// A session and its frames, read in one transaction.
    pub async fn session_with_frames(
        &self,
        id: &SessionId,
    ) -> Result<(Session, Vec<Frame>), StoreError> {
        let id = id.clone();
        self.run(move |store| {
            store.with_tx(|store| {
                let session = store.sessions().get(&id)?;
                let frames = store.frames().list_for_session(&id)?;
                Ok((session, frames))
            })
        })
        .await
    }
}

#[async_trait]
impl PendingStore for SharedStore {
    async fn load_all_pending(&self) -> Result<Vec<PendingSession>, StoreError> {
        self.run(|store| store.pending().list()).await
    }

    async fn save(&self, pending: &PendingSession) -> Result<(), StoreError> {
        let pending = pending.clone();
        self.run(move |store| store.pending().upsert(&pending)).await
    }

    async fn delete(&self, code: &RequestCode) -> Result<(), StoreError> {
        let code = code.clone();
        self.run(move |store| {
            if !store.pending().delete(&code)? {
                tracing::debug!(request_code = %code, "pending session already gone");
            }
            Ok(())
        })
        .await
    }

    async fn active_session(&self) -> Result<Option<Session>, StoreError> {
        self.run(|store| store.sessions().get_active()).await
    }
}
