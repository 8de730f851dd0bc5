pub mod alarm;
pub mod capture;
pub mod conflict;
pub mod error;
pub mod pending;
pub mod persistence;
pub mod scheduler;
pub mod sessions;
pub mod store;
pub mod validation;
pub mod window;

pub mod types;

pub use crate::alarm::{AlarmFacility, TokioAlarms};
pub use crate::capture::CaptureControl;
pub use crate::conflict::{ConflictOutcome, conflict_of};
pub use crate::error::SchedulerError;
pub use crate::persistence::PendingStore;
pub use crate::scheduler::{FireOutcome, ImagingScheduler, ScheduleResult, SchedulerHandle};
pub use crate::store::Store;
pub use crate::window::{SessionWindow, WindowEnd, Windowed};
