use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::hub::EventHub;
use crate::domain::events::{TaskEvent, TaskEventKind};

/// Mirror every published task event into the log.
pub fn start(event_hub: Arc<EventHub>) -> JoinHandle<()> {
    let mut rx = event_hub.subscribe();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log listener fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &TaskEvent) {
    match &event.kind {
        TaskEventKind::Progress { percent, step } => {
            debug!(task_id = %event.task_id, percent, step = %step, "progress");
        }
        TaskEventKind::Error { message } => {
            warn!(task_id = %event.task_id, message = %message, "batch error");
        }
        TaskEventKind::TaskComplete => {
            info!(task_id = %event.task_id, "batch complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskId;
    use crate::ports::events::EventSink;

    #[tokio::test]
    async fn stops_when_the_hub_is_dropped() {
        let hub = Arc::new(EventHub::new());
        let handle = start(hub.clone());

        hub.emit(TaskEvent::error(&TaskId::from("t"), "a.jpg: rejected"));
        drop(hub);

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("listener did not stop")
            .unwrap();
    }
}
