use tokio::sync::broadcast;

use crate::models::progress::ProgressEvent;

/// Default number of events buffered per subscriber before it starts lagging.
pub const DEFAULT_CAPACITY: usize = 64;

/// Capability: push a progress event to live observers.
///
/// Delivery is fire-and-forget; callers only log the error.
pub trait ProgressBroadcaster: Send + Sync {
    /// Returns the number of subscribers the event was handed to.
    fn publish(&self, event: ProgressEvent) -> Result<usize, BroadcastError>;
}

/// Process-wide progress channel shared by all jobs.
///
/// There is no per-job scoping: every subscriber receives every job's events,
/// and events sent before a subscriber connects are not replayed.
#[derive(Debug, Clone)]
pub struct ProgressHub {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProgressBroadcaster for ProgressHub {
    fn publish(&self, event: ProgressEvent) -> Result<usize, BroadcastError> {
        self.sender
            .send(event)
            .map_err(|_| BroadcastError::NoSubscribers)
    }
}

/// Broadcaster for headless runs: progress goes to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBroadcaster;

impl ProgressBroadcaster for LogBroadcaster {
    fn publish(&self, event: ProgressEvent) -> Result<usize, BroadcastError> {
        tracing::info!(
            iteration = event.iteration_number,
            image_url = %event.image_url,
            "Iteration progress"
        );
        Ok(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("No subscribers connected")]
    NoSubscribers,
}
