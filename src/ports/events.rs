use crate::domain::events::TaskEvent;

/// Live-progress transport.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    /// Publish an event. Called while registry locks are held, so it must not block.
    fn emit(&self, event: TaskEvent);
}
