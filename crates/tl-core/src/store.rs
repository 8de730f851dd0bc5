use crate::error::StoreError;
use crate::pending::PendingRepository;
use crate::sessions::{FrameRepository, SessionRepository};

pub trait Store {
    type Pending<'a>: PendingRepository
    where
        Self: 'a;
    type Sessions<'a>: SessionRepository
    where
        Self: 'a;
    type Frames<'a>: FrameRepository
    where
        Self: 'a;

    fn pending(&self) -> Self::Pending<'_>;
    fn sessions(&self) -> Self::Sessions<'_>;
    fn frames(&self) -> Self::Frames<'_>;

    fn with_tx<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Self) -> Result<T, StoreError>;
}
