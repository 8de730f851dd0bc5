use crate::error::AlarmError;
use crate::types::RequestCode;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Wall-clock wake-ups keyed by request code. Arming an armed code replaces it.
#[async_trait]
pub trait AlarmFacility: Send + Sync {
    async fn arm(
        &self,
        code: &RequestCode,
        fires_at: DateTime<FixedOffset>,
    ) -> Result<(), AlarmError>;
    async fn disarm(&self, code: &RequestCode) -> Result<(), AlarmError>;
}

#[async_trait]
impl<T: AlarmFacility + ?Sized> AlarmFacility for Arc<T> {
    async fn arm(
        &self,
        code: &RequestCode,
        fires_at: DateTime<FixedOffset>,
    ) -> Result<(), AlarmError> {
        (**self).arm(code, fires_at).await
    }

    async fn disarm(&self, code: &RequestCode) -> Result<(), AlarmError> {
        (**self).disarm(code).await
    }
}

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    armed: HashMap<RequestCode, Timer>,
}

/// In-process alarms: one sleeping task per code, firing into a channel.
///
/// Alarms whose time already passed fire immediately. Nothing survives a restart;
/// the scheduler re-arms from the store on startup.
pub struct TokioAlarms {
    timers: Arc<Mutex<Timers>>,
    fired: mpsc::UnboundedSender<RequestCode>,
}

impl TokioAlarms {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RequestCode>) {
        let (fired, receiver) = mpsc::unbounded_channel();
        let alarms = Self {
            timers: Arc::new(Mutex::new(Timers::default())),
            fired,
        };
        (alarms, receiver)
    }

    pub fn armed(&self) -> Vec<RequestCode> {
        let Ok(timers) = self.timers.lock() else {
            return Vec::new();
        };
        let mut codes: Vec<_> = timers.armed.keys().cloned().collect();
        codes.sort();
        codes
    }
}

#[async_trait]
impl AlarmFacility for TokioAlarms {
    async fn arm(
        &self,
        code: &RequestCode,
        fires_at: DateTime<FixedOffset>,
    ) -> Result<(), AlarmError> {
        if self.fired.is_closed() {
            return Err(AlarmError::Unavailable);
        }
        let delay = (fires_at.with_timezone(&Utc) - Utc::now())
            .to_std()
            .unwrap_or_default();

        let mut timers = self.timers.lock().map_err(|_| AlarmError::Unavailable)?;
        let generation = timers.next_generation;
        timers.next_generation += 1;

        let shared = Arc::clone(&self.timers);
        let fired = self.fired.clone();
        let task_code = code.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut timers) = shared.lock() {
                if timers
                    .armed
                    .get(&task_code)
                    .is_some_and(|timer| timer.generation == generation)
                {
                    timers.armed.remove(&task_code);
                }
            }
            if fired.send(task_code.clone()).is_err() {
                tracing::warn!(request_code = %task_code, "alarm fired with no listener");
            }
        });

        if let Some(previous) = timers.armed.insert(code.clone(), Timer { generation, handle }) {
            previous.handle.abort();
        }
        tracing::debug!(request_code = %code, %fires_at, "alarm armed");
        Ok(())
    }

    async fn disarm(&self, code: &RequestCode) -> Result<(), AlarmError> {
        let mut timers = self.timers.lock().map_err(|_| AlarmError::Unavailable)?;
        if let Some(timer) = timers.armed.remove(code) {
            timer.handle.abort();
            tracing::debug!(request_code = %code, "alarm disarmed");
        }
        Ok(())
    }
}
