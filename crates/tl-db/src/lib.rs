pub mod capture;
pub mod frame_repo;
pub mod pending_repo;
pub mod schema;
pub mod session_repo;
pub mod store;
pub mod util;

pub use capture::RecordingCapture;
pub use store::{DbStore, SharedStore};
