use crate::store::SharedStore;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use tl_core::error::{CaptureError, StoreError};
use tl_core::sessions::{FrameRepository, SessionRepository};
use tl_core::store::Store;
use tl_core::types::{DeviceInfo, Frame, FrameId, PendingSession, Session, SessionId, SessionStatus};
use tl_core::window::{SessionWindow, WindowEnd};
use tl_core::CaptureControl;

/// Capture control that only keeps the books: it opens and closes session records
/// and files frames reported by the camera pipeline.
#[derive(Clone)]
pub struct RecordingCapture {
    store: SharedStore,
    device: DeviceInfo,
    app_version: String,
}

impl RecordingCapture {
    pub fn new(store: SharedStore, device: DeviceInfo, app_version: impl Into<String>) -> Self {
        Self {
            store,
            device,
            app_version: app_version.into(),
        }
    }

    /// Files the next frame of `session_id`, numbered after the last one stored.
    pub async fn record_frame(
        &self,
        session_id: &SessionId,
        captured_at: DateTime<FixedOffset>,
        filename: impl Into<String>,
    ) -> Result<Frame, CaptureError> {
        let session_id = session_id.clone();
        let filename = filename.into();
        self.store
            .run(move |store| {
                store.with_tx(|store| {
                    let session = store.sessions().get(&session_id)?;
                    if !session.is_active() {
                        return Err(StoreError::Backend {
                            message: format!("session {session_id} is not capturing"),
                        });
                    }
                    let existing = store.frames().list_for_session(&session_id)?;
                    let index = existing.last().map_or(0, |frame| frame.index + 1);
                    let frame = Frame {
                        id: FrameId::generate(),
                        session_id: session_id.clone(),
                        index,
                        captured_at,
                        filename,
                    };
                    store.frames().append(&frame)?;
                    Ok(frame)
                })
            })
            .await
            .map_err(capture_err)
    }
}

#[async_trait]
impl CaptureControl for RecordingCapture {
    async fn start(&self, pending: &PendingSession) -> Result<Session, CaptureError> {
        let session = Session::from_pending(
            pending,
            Utc::now().with_timezone(pending.scheduled_start.offset()),
            self.device.clone(),
            self.app_version.clone(),
        );
        let record = session.clone();
        self.store
            .run(move |store| store.sessions().create(&record))
            .await
            .map_err(capture_err)?;
        tracing::info!(session_id = %session.id, name = %session.name, "capture started");
        Ok(session)
    }

    async fn stop(&self, session_id: &SessionId) -> Result<(), CaptureError> {
        let session_id = session_id.clone();
        let stopped = self
            .store
            .run(move |store| {
                store.with_tx(|store| {
                    let session = store.sessions().get(&session_id)?;
                    if !session.is_active() {
                        return Ok(session);
                    }
                    let now = Utc::now().with_timezone(session.started_at.offset());
                    let (status, ended_at) = closing_state(&session, now);
                    store.sessions().complete(&session_id, status, ended_at)
                })
            })
            .await
            .map_err(capture_err)?;
        tracing::info!(session_id = %stopped.id, status = ?stopped.status, "capture stopped");
        Ok(())
    }
}

/// A bounded session whose window already closed ran to completion; anything else
/// was cut short now.
fn closing_state(
    session: &Session,
    now: DateTime<FixedOffset>,
) -> (SessionStatus, DateTime<FixedOffset>) {
    match SessionWindow::from_settings(session.started_at, &session.settings).end {
        WindowEnd::At(end) if end <= now => (SessionStatus::Completed, end),
        _ => (SessionStatus::Stopped, now),
    }
}

fn capture_err(err: StoreError) -> CaptureError {
    match err {
        StoreError::NotFound => CaptureError::SessionNotFound,
        other => CaptureError::Failed {
            message: other.to_string(),
        },
    }
}
