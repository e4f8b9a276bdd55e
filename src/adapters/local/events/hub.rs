use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::events::TaskEvent;
use crate::ports::events::EventSink;

/// Events buffered per subscriber before the slowest one starts lagging.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out of task events to every live subscriber (SSE streams, the log listener).
#[derive(Debug)]
pub struct EventHub {
    sender: broadcast::Sender<TaskEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(
        &self,
        event: TaskEvent,
    ) -> Result<usize, broadcast::error::SendError<TaskEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventHub {
    fn emit(&self, event: TaskEvent) {
        // Nobody listening is fine: delivery is best effort.
        if let Err(e) = self.publish(event) {
            trace!(task_id = %e.0.task_id, "event dropped, no subscribers");
        }
    }
}
