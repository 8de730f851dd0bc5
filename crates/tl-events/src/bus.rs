use crate::types::EventRecord;
use tokio::sync::broadcast;

/// Fan-out of scheduler events to whoever is listening: the audit recorder, tests.
/// Slow listeners lag and lose the oldest records rather than blocking publishers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventRecord>,
}

impl EventBus {
    /// `capacity` is how many records a listener may fall behind; zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    /// Number of listeners the record reached. Zero means it was dropped.
    pub fn publish(&self, event: EventRecord) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn listeners(&self) -> usize {
        self.sender.receiver_count()
    }
}
