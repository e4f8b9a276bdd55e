use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::domain::events::{percent_of, TaskEvent, TaskEventKind};
use crate::domain::task::TaskId;
use crate::ports::events::EventSink;

pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug)]
struct ProgressState {
    processed: usize,
    total: usize,
    last_emit: Option<Instant>,
    /// `(percent, processed)` of the last event sent
    last_sent: Option<(u8, usize)>,
}

/// Per-task processed/total counters with throttled progress events.
///
/// Events are emitted while the lock is held, so a task's progress events go
/// out in the same order its counter moved.
pub struct ProgressAggregator {
    interval: Duration,
    sink: Arc<dyn EventSink>,
    tasks: Mutex<HashMap<TaskId, ProgressState>>,
}

impl ProgressAggregator {
    pub fn new(sink: Arc<dyn EventSink>, interval: Duration) -> Self {
        Self {
            interval,
            sink,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Start counting for `task_id`. Resets any previous state.
    pub fn begin(&self, task_id: &TaskId, total: usize) {
        self.tasks.lock().insert(
            task_id.clone(),
            ProgressState {
                processed: 0,
                total,
                last_emit: None,
                last_sent: None,
            },
        );
    }

    /// One more unit finished. Returns the processed count afterwards.
    pub fn record(&self, task_id: &TaskId) -> usize {
        self.advance(task_id, 1)
    }

    /// `count` more units finished at once (a skipped group).
    pub fn advance(&self, task_id: &TaskId, count: usize) -> usize {
        let mut tasks = self.tasks.lock();
        let Some(state) = tasks.get_mut(task_id) else {
            warn!(task_id = %task_id, "progress recorded for unknown task");
            return 0;
        };

        let advanced = state.processed.saturating_add(count);
        if advanced > state.total {
            warn!(
                task_id = %task_id,
                processed = advanced,
                total = state.total,
                "more units recorded than the task holds"
            );
        }
        state.processed = advanced.min(state.total);

        let now = Instant::now();
        let due = state
            .last_emit
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if due {
            let percent = percent_of(state.processed, state.total);
            self.send(task_id, state, percent, now);
        }
        state.processed
    }

    /// Emit regardless of throttling; used for the 0% and 100% events.
    /// Skipped when it would repeat the previous event exactly.
    pub fn force_emit(&self, task_id: &TaskId, percent: u8) {
        let mut tasks = self.tasks.lock();
        let Some(state) = tasks.get_mut(task_id) else {
            warn!(task_id = %task_id, "forced progress for unknown task");
            return;
        };
        if state.last_sent == Some((percent, state.processed)) {
            return;
        }
        self.send(task_id, state, percent.min(100), Instant::now());
    }

    /// `(processed, total)` for a task being tracked.
    pub fn snapshot(&self, task_id: &TaskId) -> Option<(usize, usize)> {
        self.tasks
            .lock()
            .get(task_id)
            .map(|state| (state.processed, state.total))
    }

    pub fn forget(&self, task_id: &TaskId) {
        self.tasks.lock().remove(task_id);
    }

    fn send(&self, task_id: &TaskId, state: &mut ProgressState, percent: u8, now: Instant) {
        state.last_emit = Some(now);
        state.last_sent = Some((percent, state.processed));
        self.sink.emit(TaskEvent {
            task_id: task_id.clone(),
            kind: TaskEventKind::Progress {
                percent,
                step: format!("{}/{}", state.processed, state.total),
            },
        });
    }
}
