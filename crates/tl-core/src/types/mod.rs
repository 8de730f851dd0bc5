pub mod enums;
pub mod event;
pub mod ids;
pub mod pending;
pub mod session;
pub mod settings;

pub use enums::{AutoStopMode, CancelReason, SessionStatus};
pub use event::EventBody;
pub use ids::{FrameId, IdError, RequestCode, SessionId};
pub use pending::PendingSession;
pub use session::{Coordinates, DeviceInfo, Frame, MetadataField, Session};
pub use settings::ImagingSettings;
