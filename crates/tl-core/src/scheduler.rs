//! Pending-session coordinator.
//!
//! [`ImagingScheduler`] owns the pending set and is the only thing that mutates it.
//! Methods take `&mut self`, so one call finishes (conflict decision, loser
//! cancellation, persist and arm) before the next starts. [`ImagingScheduler::spawn`]
//! moves it onto its own task and hands out a cloneable [`SchedulerHandle`]; callers
//! queue commands over a channel and each gets its reply on a oneshot.

use crate::alarm::AlarmFacility;
use crate::capture::CaptureControl;
use crate::conflict::{ConflictOutcome, conflict_of};
use crate::error::{CaptureError, SchedulerError};
use crate::persistence::PendingStore;
use crate::types::{CancelReason, EventBody, PendingSession, RequestCode, Session, SessionId};
use crate::validation::{validate_future_start, validate_name, validate_start_collision};
use chrono::Utc;
use std::collections::BTreeMap;
use tl_events::{EventBus, EventRecord, EventSource};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleResult {
    pub scheduled: PendingSession,
    /// Earlier bookings cancelled because `scheduled` overlaps them.
    pub cancelled: Vec<PendingSession>,
    /// Running session `scheduled` will stop when it fires.
    pub preempts_active: Option<SessionId>,
    /// Later bookings that will in turn stop `scheduled` when they fire.
    pub queued_behind: Vec<RequestCode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome {
    Started(Session),
    /// The booking was no longer pending.
    Stale,
}

#[derive(Debug, Default)]
struct Arbitration {
    losers: Vec<RequestCode>,
    queued_behind: Vec<RequestCode>,
    preempts_active: Option<SessionId>,
}

pub struct ImagingScheduler<P, A, C> {
    store: P,
    alarms: A,
    capture: C,
    event_bus: EventBus,
    pending: BTreeMap<RequestCode, PendingSession>,
}

impl<P, A, C> ImagingScheduler<P, A, C>
where
    P: PendingStore,
    A: AlarmFacility,
    C: CaptureControl,
{
    pub fn new(store: P, alarms: A, capture: C, event_bus: EventBus) -> Self {
        Self {
            store,
            alarms,
            capture,
            event_bus,
            pending: BTreeMap::new(),
        }
    }

    /// Loads every stored booking and arms its alarm. Bookings whose start passed
    /// while nothing was running fire as soon as the alarm facility allows.
    pub async fn restore(&mut self) -> Result<usize, SchedulerError> {
        let stored = self.store.load_all_pending().await?;
        let count = stored.len();
        for pending in stored {
            self.alarms
                .arm(&pending.request_code, pending.scheduled_start)
                .await?;
            self.pending
                .insert(pending.request_code.clone(), pending.clone());
            self.publish(EventSource::Restore, EventBody::PendingScheduled { pending });
        }
        info!(count, "restored pending sessions");
        Ok(count)
    }

    /// Pending bookings, earliest start first.
    pub fn list_pending(&self) -> Vec<PendingSession> {
        let mut pending: Vec<_> = self.pending.values().cloned().collect();
        pending.sort_by(|a, b| a.scheduled_start.cmp(&b.scheduled_start));
        pending
    }

    pub fn get_pending(&self, code: &RequestCode) -> Option<&PendingSession> {
        self.pending.get(code)
    }

    /// Saves the candidate, cancels the bookings it beats, then arms it. A failure at
    /// any step leaves the pending set as it was: the candidate record is removed and
    /// cancelled bookings are saved and armed again.
    pub async fn schedule(
        &mut self,
        candidate: PendingSession,
    ) -> Result<ScheduleResult, SchedulerError> {
        validate_name(&candidate)?;
        validate_future_start(&candidate, Utc::now())?;
        if self.pending.contains_key(&candidate.request_code) {
            return Err(SchedulerError::invalid(format!(
                "request code {} is already pending",
                candidate.request_code
            )));
        }

        let code = candidate.request_code.clone();
        let active = self.store.active_session().await?;
        let arbitration = self.arbitrate(&candidate, active.as_ref(), None)?;

        self.store.save(&candidate).await?;
        let cancelled = match self.cancel_losers(&code, &arbitration.losers).await {
            Ok(cancelled) => cancelled,
            Err(err) => {
                self.discard_record(&code).await;
                return Err(err);
            }
        };
        if let Err(err) = self.alarms.arm(&code, candidate.scheduled_start).await {
            self.discard_record(&code).await;
            self.put_back_all(&cancelled).await;
            return Err(err.into());
        }

        self.pending.insert(code.clone(), candidate.clone());
        info!(
            request_code = %code,
            start = %candidate.scheduled_start,
            cancelled = cancelled.len(),
            "session scheduled"
        );
        self.publish_cancelled(&code, &cancelled);
        self.publish(
            EventSource::Api,
            EventBody::PendingScheduled {
                pending: candidate.clone(),
            },
        );

        Ok(ScheduleResult {
            scheduled: candidate,
            cancelled,
            preempts_active: arbitration.preempts_active,
            queued_behind: arbitration.queued_behind,
        })
    }

    /// Moves an existing booking, keeping its request code. On failure the previous
    /// record and alarm are put back along with any booking it had cancelled.
    pub async fn reschedule(
        &mut self,
        candidate: PendingSession,
    ) -> Result<ScheduleResult, SchedulerError> {
        let code = candidate.request_code.clone();
        let Some(previous) = self.pending.get(&code).cloned() else {
            return Err(SchedulerError::invalid(format!("{code} is not pending")));
        };
        validate_name(&candidate)?;
        validate_future_start(&candidate, Utc::now())?;

        let active = self.store.active_session().await?;
        let arbitration = self.arbitrate(&candidate, active.as_ref(), Some(&code))?;

        self.store.save(&candidate).await?;
        let cancelled = match self.cancel_losers(&code, &arbitration.losers).await {
            Ok(cancelled) => cancelled,
            Err(err) => {
                self.put_back(&previous).await;
                return Err(err);
            }
        };
        if let Err(err) = self.alarms.arm(&code, candidate.scheduled_start).await {
            self.put_back(&previous).await;
            self.put_back_all(&cancelled).await;
            return Err(err.into());
        }

        self.pending.insert(code.clone(), candidate.clone());
        info!(
            request_code = %code,
            from = %previous.scheduled_start,
            to = %candidate.scheduled_start,
            "session rescheduled"
        );
        self.publish_cancelled(&code, &cancelled);
        self.publish(
            EventSource::Api,
            EventBody::PendingRescheduled {
                previous,
                pending: candidate.clone(),
            },
        );

        Ok(ScheduleResult {
            scheduled: candidate,
            cancelled,
            preempts_active: arbitration.preempts_active,
            queued_behind: arbitration.queued_behind,
        })
    }

    /// Returns the removed booking, or `None` if the code was not pending.
    pub async fn cancel_pending_session(
        &mut self,
        code: &RequestCode,
        reason: CancelReason,
    ) -> Result<Option<PendingSession>, SchedulerError> {
        let removed = self.remove_pending(code).await?;
        if let Some(pending) = &removed {
            info!(request_code = %code, ?reason, "pending session cancelled");
            self.publish(
                EventSource::Api,
                EventBody::PendingCancelled {
                    pending: pending.clone(),
                    reason,
                },
            );
        }
        Ok(removed)
    }

    /// Starts the booking whose alarm fired, stopping whatever is capturing first.
    pub async fn alarm_fired(&mut self, code: &RequestCode) -> Result<FireOutcome, SchedulerError> {
        let Some(pending) = self.pending.get(code).cloned() else {
            debug!(request_code = %code, "stale trigger ignored");
            self.publish(
                EventSource::Alarm,
                EventBody::TriggerIgnored {
                    request_code: code.clone(),
                },
            );
            return Ok(FireOutcome::Stale);
        };

        if pending.scheduled_start.with_timezone(&Utc) > Utc::now() {
            // a fire queued before the booking was moved later
            debug!(request_code = %code, start = %pending.scheduled_start, "early trigger re-armed");
            if let Err(err) = self.alarms.arm(code, pending.scheduled_start).await {
                warn!(request_code = %code, error = %err, "could not re-arm early trigger");
            }
            self.publish(
                EventSource::Alarm,
                EventBody::TriggerIgnored {
                    request_code: code.clone(),
                },
            );
            return Ok(FireOutcome::Stale);
        }

        let active = self
            .store
            .active_session()
            .await?
            .filter(Session::is_active);
        self.store.delete(code).await?;
        self.pending.remove(code);
        if let Err(err) = self.alarms.disarm(code).await {
            warn!(request_code = %code, error = %err, "could not clear fired alarm");
        }

        if let Some(active) = active {
            if let Err(err) = self.capture.stop(&active.id).await {
                error!(
                    request_code = %code,
                    session_id = %active.id,
                    error = %err,
                    "could not stop running session; trigger dropped"
                );
                self.publish_trigger_failed(code, &err);
                return Err(err.into());
            }
            info!(session_id = %active.id, by = %code, "active session preempted");
            self.publish(
                EventSource::Alarm,
                EventBody::ActivePreempted {
                    session_id: active.id,
                    by: code.clone(),
                },
            );
        }

        let session = match self.capture.start(&pending).await {
            Ok(session) => session,
            Err(err) => {
                error!(request_code = %code, error = %err, "capture failed to start");
                self.publish_trigger_failed(code, &err);
                return Err(err.into());
            }
        };
        info!(request_code = %code, session_id = %session.id, "session triggered");
        self.publish(
            EventSource::Alarm,
            EventBody::SessionTriggered {
                request_code: code.clone(),
                session: session.clone(),
            },
        );
        Ok(FireOutcome::Started(session))
    }

    /// Restores the pending set from the store, then runs on a dedicated task.
    pub async fn spawn(
        mut self,
        fired: mpsc::UnboundedReceiver<RequestCode>,
        command_capacity: usize,
    ) -> Result<(SchedulerHandle, JoinHandle<()>), SchedulerError>
    where
        P: 'static,
        A: 'static,
        C: 'static,
    {
        self.restore().await?;
        let (commands, receiver) = mpsc::channel(command_capacity.max(1));
        let task = tokio::spawn(self.run(receiver, fired));
        Ok((SchedulerHandle { commands }, task))
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut fired: mpsc::UnboundedReceiver<RequestCode>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle(command).await {
                        break;
                    }
                }
                Some(code) = fired.recv() => {
                    if let Err(err) = self.alarm_fired(&code).await {
                        error!(request_code = %code, error = %err, "trigger failed");
                    }
                }
            }
        }
        info!("scheduler stopped");
    }

    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Schedule { candidate, reply } => {
                let _ = reply.send(self.schedule(candidate).await);
            }
            Command::Reschedule { candidate, reply } => {
                let _ = reply.send(self.reschedule(candidate).await);
            }
            Command::Cancel {
                code,
                reason,
                reply,
            } => {
                let _ = reply.send(self.cancel_pending_session(&code, reason).await);
            }
            Command::Fired { code, reply } => {
                let _ = reply.send(self.alarm_fired(&code).await);
            }
            Command::List { reply } => {
                let _ = reply.send(Ok(self.list_pending()));
            }
            Command::Get { code, reply } => {
                let _ = reply.send(Ok(self.get_pending(&code).cloned()));
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(Ok(()));
                return false;
            }
        }
        true
    }

    fn arbitrate(
        &self,
        candidate: &PendingSession,
        active: Option<&Session>,
        exclude: Option<&RequestCode>,
    ) -> Result<Arbitration, SchedulerError> {
        let active = active.filter(|session| session.is_active());
        validate_start_collision(candidate, self.pending.values(), active, exclude)?;

        let mut arbitration = Arbitration::default();
        if let Some(active) = active {
            if conflict_of(candidate, active) == ConflictOutcome::CancelsOther {
                arbitration.preempts_active = Some(active.id.clone());
            }
        }

        let mut losers = Vec::new();
        for other in self.pending.values() {
            if Some(&other.request_code) == exclude {
                continue;
            }
            match conflict_of(candidate, other) {
                ConflictOutcome::CancelsOther => losers.push(other),
                ConflictOutcome::CancelledByOther => {
                    arbitration.queued_behind.push(other.request_code.clone());
                }
                ConflictOutcome::NoConflict => {}
            }
        }
        losers.sort_by(|a, b| a.scheduled_start.cmp(&b.scheduled_start));
        arbitration.losers = losers
            .into_iter()
            .map(|loser| loser.request_code.clone())
            .collect();
        Ok(arbitration)
    }

    /// Removes the losers earliest first. If one cannot be removed, those already
    /// removed are put back before the error is returned.
    async fn cancel_losers(
        &mut self,
        winner: &RequestCode,
        losers: &[RequestCode],
    ) -> Result<Vec<PendingSession>, SchedulerError> {
        let mut cancelled: Vec<PendingSession> = Vec::new();
        for loser in losers {
            match self.remove_pending(loser).await {
                Ok(Some(pending)) => cancelled.push(pending),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        request_code = %loser,
                        winner = %winner,
                        error = %err,
                        "conflicting session could not be cancelled"
                    );
                    self.put_back_all(&cancelled).await;
                    return Err(SchedulerError::ConflictResolutionFailure {
                        loser: loser.clone(),
                        restored: cancelled.into_iter().map(|p| p.request_code).collect(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok(cancelled)
    }

    /// Disarms and deletes a booking without announcing it.
    async fn remove_pending(
        &mut self,
        code: &RequestCode,
    ) -> Result<Option<PendingSession>, SchedulerError> {
        let Some(pending) = self.pending.get(code).cloned() else {
            return Ok(None);
        };
        self.alarms.disarm(code).await?;
        if let Err(err) = self.store.delete(code).await {
            // still pending in memory and in the store, so it must still fire
            if let Err(rearm) = self.alarms.arm(code, pending.scheduled_start).await {
                error!(
                    request_code = %code,
                    error = %rearm,
                    "could not re-arm after failed delete; booking will not fire"
                );
            }
            return Err(err.into());
        }
        self.pending.remove(code);
        Ok(Some(pending))
    }

    /// Saves and arms a booking taken out by an operation that is being undone.
    async fn put_back(&mut self, pending: &PendingSession) {
        let code = &pending.request_code;
        if let Err(err) = self.store.save(pending).await {
            error!(request_code = %code, error = %err, "could not restore record");
        }
        if let Err(err) = self.alarms.arm(code, pending.scheduled_start).await {
            error!(request_code = %code, error = %err, "could not restore alarm");
        }
        self.pending.insert(code.clone(), pending.clone());
        debug!(request_code = %code, "booking restored");
    }

    async fn put_back_all(&mut self, bookings: &[PendingSession]) {
        for pending in bookings {
            self.put_back(pending).await;
        }
    }

    async fn discard_record(&self, code: &RequestCode) {
        if let Err(err) = self.store.delete(code).await {
            warn!(request_code = %code, error = %err, "could not remove record of failed booking");
        }
    }

    fn publish_cancelled(&self, winner: &RequestCode, cancelled: &[PendingSession]) {
        for pending in cancelled {
            info!(request_code = %pending.request_code, by = %winner, "pending session cancelled");
            self.publish(
                EventSource::Api,
                EventBody::PendingCancelled {
                    pending: pending.clone(),
                    reason: CancelReason::Conflict { by: winner.clone() },
                },
            );
        }
    }

    fn publish_trigger_failed(&self, code: &RequestCode, err: &CaptureError) {
        self.publish(
            EventSource::Alarm,
            EventBody::TriggerFailed {
                request_code: code.clone(),
                reason: err.to_string(),
            },
        );
    }

    fn publish(&self, source: EventSource, body: EventBody) {
        let request_code = body.request_code().to_string();
        match serde_json::to_value(&body) {
            Ok(value) => {
                let record = EventRecord::new(source, Some(request_code), value);
                if self.event_bus.publish(record) == 0 {
                    debug!("event published with no listeners");
                }
            }
            Err(err) => warn!(error = %err, "could not encode event"),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, SchedulerError>>;

enum Command {
    Schedule {
        candidate: PendingSession,
        reply: Reply<ScheduleResult>,
    },
    Reschedule {
        candidate: PendingSession,
        reply: Reply<ScheduleResult>,
    },
    Cancel {
        code: RequestCode,
        reason: CancelReason,
        reply: Reply<Option<PendingSession>>,
    },
    Fired {
        code: RequestCode,
        reply: Reply<FireOutcome>,
    },
    List {
        reply: Reply<Vec<PendingSession>>,
    },
    Get {
        code: RequestCode,
        reply: Reply<Option<PendingSession>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Cloneable front for a spawned [`ImagingScheduler`]. Calls are served one at a time
/// in arrival order.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    pub async fn schedule(
        &self,
        candidate: PendingSession,
    ) -> Result<ScheduleResult, SchedulerError> {
        self.call(|reply| Command::Schedule { candidate, reply }).await
    }

    pub async fn reschedule(
        &self,
        candidate: PendingSession,
    ) -> Result<ScheduleResult, SchedulerError> {
        self.call(|reply| Command::Reschedule { candidate, reply })
            .await
    }

    pub async fn cancel_pending_session(
        &self,
        code: RequestCode,
        reason: CancelReason,
    ) -> Result<Option<PendingSession>, SchedulerError> {
        self.call(|reply| Command::Cancel {
            code,
            reason,
            reply,
        })
        .await
    }

    /// Entry point for alarm facilities that call back instead of using the channel
    /// given to [`ImagingScheduler::spawn`].
    pub async fn alarm_fired(&self, code: RequestCode) -> Result<FireOutcome, SchedulerError> {
        self.call(|reply| Command::Fired { code, reply }).await
    }

    pub async fn list_pending(&self) -> Result<Vec<PendingSession>, SchedulerError> {
        self.call(|reply| Command::List { reply }).await
    }

    pub async fn get_pending(
        &self,
        code: RequestCode,
    ) -> Result<Option<PendingSession>, SchedulerError> {
        self.call(|reply| Command::Get { code, reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.call(|reply| Command::Shutdown { reply }).await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SchedulerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SchedulerError::Closed)?;
        response.await.map_err(|_| SchedulerError::Closed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::TokioAlarms;
    use crate::error::{AlarmError, CaptureError, StoreError};
    use crate::types::{DeviceInfo, ImagingSettings, SessionStatus};
    use async_trait::async_trait;
    use chrono::{DateTime, FixedOffset, TimeZone};
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct FakeStore {
        records: Mutex<BTreeMap<RequestCode, PendingSession>>,
        active: Mutex<Option<Session>>,
        fail_save: AtomicBool,
        fail_delete: Mutex<HashSet<RequestCode>>,
    }

    impl FakeStore {
        fn contains(&self, code: &RequestCode) -> bool {
            self.records.lock().unwrap().contains_key(code)
        }

        fn record(&self, code: &RequestCode) -> Option<PendingSession> {
            self.records.lock().unwrap().get(code).cloned()
        }
    }

    #[async_trait]
    impl PendingStore for FakeStore {
        async fn load_all_pending(&self) -> Result<Vec<PendingSession>, StoreError> {
            Ok(self.records.lock().unwrap().values().cloned().collect())
        }

        async fn save(&self, pending: &PendingSession) -> Result<(), StoreError> {
            if self.fail_save.load(Ordering::SeqCst) {
                return Err(StoreError::Backend {
                    message: "disk full".to_string(),
                });
            }
            self.records
                .lock()
                .unwrap()
                .insert(pending.request_code.clone(), pending.clone());
            Ok(())
        }

        async fn delete(&self, code: &RequestCode) -> Result<(), StoreError> {
            if self.fail_delete.lock().unwrap().contains(code) {
                return Err(StoreError::Backend {
                    message: "locked".to_string(),
                });
            }
            self.records.lock().unwrap().remove(code);
            Ok(())
        }

        async fn active_session(&self) -> Result<Option<Session>, StoreError> {
            Ok(self.active.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct FakeAlarms {
        armed: Mutex<HashMap<RequestCode, DateTime<FixedOffset>>>,
        fail_arm: AtomicBool,
        fail_arm_for: Mutex<HashSet<RequestCode>>,
        fail_disarm: Mutex<HashSet<RequestCode>>,
    }

    impl FakeAlarms {
        fn armed_at(&self, code: &RequestCode) -> Option<DateTime<FixedOffset>> {
            self.armed.lock().unwrap().get(code).copied()
        }
    }

    #[async_trait]
    impl AlarmFacility for FakeAlarms {
        async fn arm(
            &self,
            code: &RequestCode,
            fires_at: DateTime<FixedOffset>,
        ) -> Result<(), AlarmError> {
            if self.fail_arm.load(Ordering::SeqCst)
                || self.fail_arm_for.lock().unwrap().contains(code)
            {
                return Err(AlarmError::Rejected {
                    message: "quota".to_string(),
                });
            }
            self.armed.lock().unwrap().insert(code.clone(), fires_at);
            Ok(())
        }

        async fn disarm(&self, code: &RequestCode) -> Result<(), AlarmError> {
            if self.fail_disarm.lock().unwrap().contains(code) {
                return Err(AlarmError::Unavailable);
            }
            self.armed.lock().unwrap().remove(code);
            Ok(())
        }
    }

    struct FakeCapture {
        store: Arc<FakeStore>,
        started: Mutex<Vec<RequestCode>>,
        stopped: Mutex<Vec<SessionId>>,
        fail_stop: AtomicBool,
    }

    impl FakeCapture {
        fn new(store: Arc<FakeStore>) -> Self {
            Self {
                store,
                started: Mutex::new(Vec::new()),
                stopped: Mutex::new(Vec::new()),
                fail_stop: AtomicBool::new(false),
            }
        }

        fn started(&self) -> Vec<RequestCode> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CaptureControl for FakeCapture {
        async fn start(&self, pending: &PendingSession) -> Result<Session, CaptureError> {
            let session = Session::from_pending(
                pending,
                Utc::now().fixed_offset(),
                device(),
                "test",
            );
            *self.store.active.lock().unwrap() = Some(session.clone());
            self.started
                .lock()
                .unwrap()
                .push(pending.request_code.clone());
            Ok(session)
        }

        async fn stop(&self, session_id: &SessionId) -> Result<(), CaptureError> {
            if self.fail_stop.load(Ordering::SeqCst) {
                return Err(CaptureError::Failed {
                    message: "camera busy".to_string(),
                });
            }
            let mut active = self.store.active.lock().unwrap();
            if active.as_ref().is_some_and(|s| &s.id == session_id) {
                *active = None;
            }
            self.stopped.lock().unwrap().push(session_id.clone());
            Ok(())
        }
    }

    type TestScheduler = ImagingScheduler<Arc<FakeStore>, Arc<FakeAlarms>, Arc<FakeCapture>>;

    struct Harness {
        scheduler: TestScheduler,
        store: Arc<FakeStore>,
        alarms: Arc<FakeAlarms>,
        capture: Arc<FakeCapture>,
        events: broadcast::Receiver<EventRecord>,
    }

    fn harness() -> Harness {
        let store = Arc::new(FakeStore::default());
        let alarms = Arc::new(FakeAlarms::default());
        let capture = Arc::new(FakeCapture::new(Arc::clone(&store)));
        let bus = EventBus::new(64);
        let events = bus.subscribe();
        let scheduler =
            ImagingScheduler::new(Arc::clone(&store), Arc::clone(&alarms), Arc::clone(&capture), bus);
        Harness {
            scheduler,
            store,
            alarms,
            capture,
            events,
        }
    }

    fn device() -> DeviceInfo {
        DeviceInfo {
            model: "Pixel".to_string(),
            os_version: "14".to_string(),
        }
    }

    fn future(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2099, 1, 1, hour, minute, 0)
            .unwrap()
    }

    fn timed(hour: u32, minute: u32, minutes: u32) -> PendingSession {
        PendingSession::new(
            format!("booking {hour:02}:{minute:02}"),
            ImagingSettings::timed(5.0, minutes).unwrap(),
            future(hour, minute),
        )
    }

    /// A booking already due, loaded the way a restart would load it.
    async fn restore_due(h: &mut Harness, minutes_ago: i64) -> PendingSession {
        let booking = PendingSession::new(
            "due",
            ImagingSettings::timed(5.0, 60).unwrap(),
            (Utc::now() - chrono::TimeDelta::minutes(minutes_ago)).fixed_offset(),
        );
        h.store.save(&booking).await.unwrap();
        h.scheduler.restore().await.unwrap();
        booking
    }

    fn running_session() -> Session {
        Session::from_pending(
            &PendingSession::new("running", ImagingSettings::unbounded(5.0).unwrap(), future(0, 0)),
            (Utc::now() - chrono::TimeDelta::hours(1)).fixed_offset(),
            device(),
            "test",
        )
    }

    fn event_types(events: &mut broadcast::Receiver<EventRecord>) -> Vec<String> {
        let mut types = Vec::new();
        while let Ok(record) = events.try_recv() {
            types.push(record.body["type"].as_str().unwrap_or_default().to_string());
        }
        types
    }

    #[tokio::test]
    async fn schedule_without_conflicts_cancels_nothing() {
        let mut h = harness();
        h.scheduler.schedule(timed(8, 0, 60)).await.unwrap();
        let candidate = timed(10, 0, 60);
        let result = h.scheduler.schedule(candidate.clone()).await.unwrap();

        assert!(result.cancelled.is_empty());
        assert!(result.queued_behind.is_empty());
        assert_eq!(result.preempts_active, None);
        assert!(h.store.contains(&candidate.request_code));
        assert_eq!(
            h.alarms.armed_at(&candidate.request_code),
            Some(candidate.scheduled_start)
        );
        assert_eq!(h.scheduler.list_pending().len(), 2);
    }

    #[tokio::test]
    async fn schedule_cancels_every_overlapped_earlier_booking() {
        let mut h = harness();
        let first = timed(8, 0, 60);
        let second = timed(8, 30, 60);
        h.scheduler.schedule(first.clone()).await.unwrap();
        // second wins over first on its own
        let result = h.scheduler.schedule(second.clone()).await.unwrap();
        assert_eq!(result.cancelled, vec![first.clone()]);
        assert!(!h.store.contains(&first.request_code));
        let _ = event_types(&mut h.events);

        let late = timed(9, 0, 10);
        let result = h.scheduler.schedule(late.clone()).await.unwrap();
        assert_eq!(result.cancelled, vec![second.clone()]);
        assert!(!h.store.contains(&second.request_code));
        assert_eq!(h.alarms.armed_at(&second.request_code), None);
        assert_eq!(
            event_types(&mut h.events),
            vec!["PendingCancelled", "PendingScheduled"]
        );
    }

    #[tokio::test]
    async fn schedule_over_two_bookings_cancels_both() {
        let mut h = harness();
        let a = timed(8, 0, 60);
        let b = timed(8, 10, 5);
        h.scheduler.schedule(b.clone()).await.unwrap();
        // a starts earlier than b, so it queues behind b instead of cancelling it
        let queued = h.scheduler.schedule(a.clone()).await.unwrap();
        assert_eq!(queued.queued_behind, vec![b.request_code.clone()]);
        assert!(queued.cancelled.is_empty());

        let winner = timed(8, 12, 30);
        let result = h.scheduler.schedule(winner.clone()).await.unwrap();
        let cancelled: Vec<_> = result
            .cancelled
            .iter()
            .map(|p| p.request_code.clone())
            .collect();
        assert_eq!(cancelled, vec![a.request_code.clone(), b.request_code.clone()]);
        assert_eq!(h.scheduler.list_pending(), vec![winner]);
    }

    #[tokio::test]
    async fn unbounded_earlier_booking_queues_behind_later_ones() {
        let mut h = harness();
        let later = timed(7, 0, 30);
        h.scheduler.schedule(later.clone()).await.unwrap();
        let open = PendingSession::new(
            "all night",
            ImagingSettings::unbounded(30.0).unwrap(),
            future(6, 0),
        );
        let result = h.scheduler.schedule(open).await.unwrap();
        assert!(result.cancelled.is_empty());
        assert_eq!(result.queued_behind, vec![later.request_code]);
        assert_eq!(h.scheduler.list_pending().len(), 2);
    }

    #[tokio::test]
    async fn rejects_invalid_requests_before_mutating() {
        let mut h = harness();
        let existing = timed(8, 0, 60);
        h.scheduler.schedule(existing.clone()).await.unwrap();

        let past = PendingSession::new(
            "yesterday",
            ImagingSettings::timed(5.0, 10).unwrap(),
            FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2000, 1, 1, 8, 0, 0)
                .unwrap(),
        );
        let duplicate = existing.rescheduled(existing.settings, future(12, 0));
        let same_start = timed(8, 0, 5);

        for candidate in [past, duplicate, same_start] {
            let err = h.scheduler.schedule(candidate).await.unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidScheduleRequest { .. }), "{err}");
        }
        assert_eq!(h.scheduler.list_pending(), vec![existing]);
    }

    #[tokio::test]
    async fn cancelling_an_absent_code_is_a_no_op() {
        let mut h = harness();
        let removed = h
            .scheduler
            .cancel_pending_session(&RequestCode::generate(), CancelReason::User)
            .await
            .unwrap();
        assert_eq!(removed, None);
        assert!(event_types(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn cancel_disarms_and_deletes() {
        let mut h = harness();
        let booking = timed(8, 0, 60);
        h.scheduler.schedule(booking.clone()).await.unwrap();

        let removed = h
            .scheduler
            .cancel_pending_session(&booking.request_code, CancelReason::User)
            .await
            .unwrap();
        assert_eq!(removed, Some(booking.clone()));
        assert!(!h.store.contains(&booking.request_code));
        assert_eq!(h.alarms.armed_at(&booking.request_code), None);

        let again = h
            .scheduler
            .cancel_pending_session(&booking.request_code, CancelReason::User)
            .await
            .unwrap();
        assert_eq!(again, None);
    }

    #[tokio::test]
    async fn alarm_failure_rolls_back_the_record() {
        let mut h = harness();
        h.alarms.fail_arm.store(true, Ordering::SeqCst);
        let booking = timed(8, 0, 60);

        let err = h.scheduler.schedule(booking.clone()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlarmRegistrationFailure { .. }));
        assert!(!h.store.contains(&booking.request_code));
        assert!(h.scheduler.list_pending().is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_arms_nothing() {
        let mut h = harness();
        h.store.fail_save.store(true, Ordering::SeqCst);
        let booking = timed(8, 0, 60);

        let err = h.scheduler.schedule(booking.clone()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::PersistenceFailure { .. }));
        assert_eq!(h.alarms.armed_at(&booking.request_code), None);
        assert!(h.scheduler.list_pending().is_empty());
    }

    #[tokio::test]
    async fn failed_loser_cancellation_blocks_the_candidate() {
        let mut h = harness();
        let loser = timed(8, 0, 60);
        h.scheduler.schedule(loser.clone()).await.unwrap();
        h.alarms
            .fail_disarm
            .lock()
            .unwrap()
            .insert(loser.request_code.clone());

        let winner = timed(8, 30, 60);
        let err = h.scheduler.schedule(winner.clone()).await.unwrap_err();
        assert_eq!(
            err,
            SchedulerError::ConflictResolutionFailure {
                loser: loser.request_code.clone(),
                restored: Vec::new(),
                reason: SchedulerError::from(AlarmError::Unavailable).to_string(),
            }
        );
        assert!(!h.store.contains(&winner.request_code));
        assert_eq!(h.scheduler.list_pending(), vec![loser]);
    }

    #[tokio::test]
    async fn failed_loser_delete_keeps_its_alarm() {
        let mut h = harness();
        let loser = timed(8, 0, 60);
        h.scheduler.schedule(loser.clone()).await.unwrap();
        h.store
            .fail_delete
            .lock()
            .unwrap()
            .insert(loser.request_code.clone());

        let err = h.scheduler.schedule(timed(8, 30, 60)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ConflictResolutionFailure { .. }));
        assert_eq!(
            h.alarms.armed_at(&loser.request_code),
            Some(loser.scheduled_start)
        );
        assert!(h.store.contains(&loser.request_code));
    }

    #[tokio::test]
    async fn overlapping_active_session_is_reported_at_schedule_time() {
        let mut h = harness();
        let running = running_session();
        *h.store.active.lock().unwrap() = Some(running.clone());

        let result = h.scheduler.schedule(timed(8, 0, 60)).await.unwrap();
        assert_eq!(result.preempts_active, Some(running.id));
        assert!(h.capture.stopped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn due_trigger_stops_the_active_session_then_starts() {
        let mut h = harness();
        let running = running_session();
        *h.store.active.lock().unwrap() = Some(running.clone());
        let booking = restore_due(&mut h, 1).await;
        let _ = event_types(&mut h.events);

        let outcome = h.scheduler.alarm_fired(&booking.request_code).await.unwrap();
        let FireOutcome::Started(session) = outcome else {
            panic!("expected start");
        };
        assert_eq!(session.request_code, Some(booking.request_code.clone()));
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(*h.capture.stopped.lock().unwrap(), vec![running.id]);
        assert_eq!(h.capture.started(), vec![booking.request_code.clone()]);
        assert!(!h.store.contains(&booking.request_code));
        assert!(h.scheduler.list_pending().is_empty());
        assert_eq!(
            event_types(&mut h.events),
            vec!["ActivePreempted", "SessionTriggered"]
        );
    }

    #[tokio::test]
    async fn failed_stop_does_not_start_capture_and_is_recorded() {
        let mut h = harness();
        *h.store.active.lock().unwrap() = Some(running_session());
        h.capture.fail_stop.store(true, Ordering::SeqCst);
        let booking = restore_due(&mut h, 1).await;
        let _ = event_types(&mut h.events);

        let err = h.scheduler.alarm_fired(&booking.request_code).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Capture { .. }));
        assert!(h.capture.started().is_empty());
        assert_eq!(event_types(&mut h.events), vec!["TriggerFailed"]);
    }

    #[tokio::test]
    async fn early_trigger_for_a_moved_booking_is_rearmed() {
        let mut h = harness();
        let booking = timed(6, 0, 30);
        h.scheduler.schedule(booking.clone()).await.unwrap();
        let moved = booking.rescheduled(booking.settings, future(9, 0));
        h.scheduler.reschedule(moved.clone()).await.unwrap();
        let _ = event_types(&mut h.events);

        // the 06:00 fire was already queued when the booking moved
        let outcome = h.scheduler.alarm_fired(&booking.request_code).await.unwrap();
        assert_eq!(outcome, FireOutcome::Stale);
        assert!(h.capture.started().is_empty());
        assert_eq!(h.scheduler.list_pending(), vec![moved.clone()]);
        assert_eq!(
            h.alarms.armed_at(&booking.request_code),
            Some(moved.scheduled_start)
        );
        assert_eq!(event_types(&mut h.events), vec!["TriggerIgnored"]);
    }

    #[tokio::test]
    async fn failed_save_leaves_existing_bookings_alone() {
        let mut h = harness();
        let existing = timed(8, 0, 60);
        h.scheduler.schedule(existing.clone()).await.unwrap();
        h.store.fail_save.store(true, Ordering::SeqCst);

        let err = h.scheduler.schedule(timed(8, 30, 60)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::PersistenceFailure { .. }));
        assert_eq!(h.scheduler.list_pending(), vec![existing.clone()]);
        assert!(h.store.contains(&existing.request_code));
        assert_eq!(
            h.alarms.armed_at(&existing.request_code),
            Some(existing.scheduled_start)
        );
    }

    #[tokio::test]
    async fn failed_arm_puts_cancelled_bookings_back() {
        let mut h = harness();
        let existing = timed(8, 0, 60);
        h.scheduler.schedule(existing.clone()).await.unwrap();
        let _ = event_types(&mut h.events);

        let winner = timed(8, 30, 60);
        h.alarms
            .fail_arm_for
            .lock()
            .unwrap()
            .insert(winner.request_code.clone());
        let err = h.scheduler.schedule(winner.clone()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlarmRegistrationFailure { .. }));

        assert_eq!(h.scheduler.list_pending(), vec![existing.clone()]);
        assert!(h.store.contains(&existing.request_code));
        assert!(!h.store.contains(&winner.request_code));
        assert_eq!(
            h.alarms.armed_at(&existing.request_code),
            Some(existing.scheduled_start)
        );
        assert!(event_types(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn partial_loser_cancellation_is_undone() {
        let mut h = harness();
        let a = timed(8, 0, 60);
        let b = timed(8, 10, 5);
        h.scheduler.schedule(b.clone()).await.unwrap();
        h.scheduler.schedule(a.clone()).await.unwrap();
        h.alarms
            .fail_disarm
            .lock()
            .unwrap()
            .insert(b.request_code.clone());

        let winner = timed(8, 12, 30);
        let err = h.scheduler.schedule(winner.clone()).await.unwrap_err();
        let SchedulerError::ConflictResolutionFailure { loser, restored, .. } = err else {
            panic!("expected conflict resolution failure, got {err}");
        };
        assert_eq!(loser, b.request_code);
        assert_eq!(restored, vec![a.request_code.clone()]);
        assert_eq!(h.scheduler.list_pending(), vec![a.clone(), b]);
        assert!(h.store.contains(&a.request_code));
        assert_eq!(h.alarms.armed_at(&a.request_code), Some(a.scheduled_start));
        assert!(!h.store.contains(&winner.request_code));
    }

    #[tokio::test]
    async fn stale_trigger_is_ignored() {
        let mut h = harness();
        let booking = timed(8, 0, 60);
        h.scheduler.schedule(booking.clone()).await.unwrap();
        h.scheduler
            .cancel_pending_session(&booking.request_code, CancelReason::User)
            .await
            .unwrap();
        let _ = event_types(&mut h.events);

        let outcome = h.scheduler.alarm_fired(&booking.request_code).await.unwrap();
        assert_eq!(outcome, FireOutcome::Stale);
        assert!(h.capture.started().is_empty());
        assert_eq!(event_types(&mut h.events), vec!["TriggerIgnored"]);
    }

    #[tokio::test]
    async fn restore_rearms_stored_bookings() {
        let mut h = harness();
        let a = timed(8, 0, 60);
        let b = timed(12, 0, 60);
        h.store.save(&a).await.unwrap();
        h.store.save(&b).await.unwrap();

        assert_eq!(h.scheduler.restore().await.unwrap(), 2);
        assert_eq!(h.alarms.armed_at(&a.request_code), Some(a.scheduled_start));
        assert_eq!(h.alarms.armed_at(&b.request_code), Some(b.scheduled_start));
        assert_eq!(h.scheduler.list_pending(), vec![a, b]);
    }

    #[tokio::test]
    async fn reschedule_moves_the_booking_and_arbitrates_again() {
        let mut h = harness();
        let booking = timed(6, 0, 30);
        let other = timed(9, 0, 60);
        h.scheduler.schedule(booking.clone()).await.unwrap();
        h.scheduler.schedule(other.clone()).await.unwrap();

        let moved = booking.rescheduled(booking.settings, future(9, 30));
        let result = h.scheduler.reschedule(moved.clone()).await.unwrap();
        assert_eq!(result.cancelled, vec![other.clone()]);
        assert_eq!(
            h.alarms.armed_at(&booking.request_code),
            Some(moved.scheduled_start)
        );
        assert_eq!(h.store.record(&booking.request_code), Some(moved.clone()));
        assert_eq!(h.scheduler.list_pending(), vec![moved]);
    }

    #[tokio::test]
    async fn reschedule_restores_previous_alarm_on_failure() {
        let mut h = harness();
        let booking = timed(6, 0, 30);
        h.scheduler.schedule(booking.clone()).await.unwrap();

        h.alarms.fail_arm.store(true, Ordering::SeqCst);
        let moved = booking.rescheduled(booking.settings, future(7, 0));
        let err = h.scheduler.reschedule(moved).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlarmRegistrationFailure { .. }));
        assert_eq!(h.store.record(&booking.request_code), Some(booking.clone()));
        assert_eq!(h.scheduler.list_pending(), vec![booking]);
    }

    #[tokio::test]
    async fn failed_reschedule_keeps_bookings_it_would_have_cancelled() {
        let mut h = harness();
        let booking = timed(6, 0, 30);
        let other = timed(9, 0, 60);
        h.scheduler.schedule(booking.clone()).await.unwrap();
        h.scheduler.schedule(other.clone()).await.unwrap();
        h.alarms
            .fail_arm_for
            .lock()
            .unwrap()
            .insert(booking.request_code.clone());

        let moved = booking.rescheduled(booking.settings, future(9, 30));
        let err = h.scheduler.reschedule(moved).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlarmRegistrationFailure { .. }));
        assert_eq!(h.scheduler.list_pending(), vec![booking.clone(), other.clone()]);
        assert_eq!(h.store.record(&booking.request_code), Some(booking));
        assert!(h.store.contains(&other.request_code));
        assert_eq!(h.alarms.armed_at(&other.request_code), Some(other.scheduled_start));
    }

    #[tokio::test]
    async fn reschedule_of_unknown_code_is_rejected() {
        let mut h = harness();
        let err = h.scheduler.reschedule(timed(6, 0, 30)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidScheduleRequest { .. }));
    }

    #[tokio::test]
    async fn spawned_scheduler_fires_through_tokio_alarms() {
        let store = Arc::new(FakeStore::default());
        let capture = Arc::new(FakeCapture::new(Arc::clone(&store)));
        let (alarms, fired) = TokioAlarms::new();
        let scheduler =
            ImagingScheduler::new(Arc::clone(&store), alarms, Arc::clone(&capture), EventBus::new(16));
        let (handle, task) = scheduler
            .spawn(fired, DEFAULT_COMMAND_CAPACITY)
            .await
            .unwrap();

        let booking = PendingSession::new(
            "soon",
            ImagingSettings::timed(1.0, 1).unwrap(),
            (Utc::now() + chrono::TimeDelta::milliseconds(300)).fixed_offset(),
        );
        handle.schedule(booking.clone()).await.unwrap();
        assert_eq!(
            handle.get_pending(booking.request_code.clone()).await.unwrap(),
            Some(booking.clone())
        );

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while capture.started().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(capture.started(), vec![booking.request_code.clone()]);
        assert!(handle.list_pending().await.unwrap().is_empty());

        let stale = handle.alarm_fired(booking.request_code).await.unwrap();
        assert_eq!(stale, FireOutcome::Stale);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(handle.is_closed());
        assert_eq!(handle.list_pending().await, Err(SchedulerError::Closed));
    }
}
