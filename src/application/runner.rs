use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use super::cancellation::CancellationRegistry;
use super::executor::{GroupContext, WorkUnitExecutor};
use super::progress::ProgressAggregator;
use crate::domain::events::TaskEvent;
use crate::domain::task::TaskId;
use crate::domain::work::{DerivedArtifacts, Outcome, UnitReport, WorkUnit};
use crate::ports::events::EventSink;
use crate::ports::platform::AdPlatform;

/// Runs the units of one group with at most `concurrency_limit` in flight.
///
/// Every finished unit is recorded in the progress aggregator exactly once and
/// failures are published as error events. Dispatch stops at the first
/// canceled outcome or failed checkpoint; units already in flight are drained.
pub struct BoundedConcurrentRunner<P> {
    executor: Arc<WorkUnitExecutor<P>>,
    progress: Arc<ProgressAggregator>,
    cancellations: Arc<CancellationRegistry>,
    sink: Arc<dyn EventSink>,
}

impl<P> BoundedConcurrentRunner<P>
where
    P: AdPlatform + 'static,
{
    pub fn new(
        executor: Arc<WorkUnitExecutor<P>>,
        progress: Arc<ProgressAggregator>,
        cancellations: Arc<CancellationRegistry>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            executor,
            progress,
            cancellations,
            sink,
        }
    }

    /// Reports come back in completion order. Units never dispatched because
    /// of a cancellation have no report.
    pub async fn execute(
        &self,
        units: Vec<WorkUnit>,
        group: Arc<GroupContext>,
        concurrency_limit: usize,
        task_id: &TaskId,
    ) -> Vec<UnitReport> {
        let semaphore = Arc::new(Semaphore::new(concurrency_limit.max(1)));
        let mut in_flight = JoinSet::new();
        let mut reports = Vec::with_capacity(units.len());
        let mut halted = false;

        'dispatch: for unit in units {
            // Wait for a free slot, collecting whatever finishes meanwhile.
            let permit = loop {
                if halted {
                    break 'dispatch;
                }
                tokio::select! {
                    biased;
                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        halted |= self.collect(task_id, joined, &mut reports);
                    }
                    acquired = semaphore.clone().acquire_owned() => match acquired {
                        Ok(permit) => break permit,
                        Err(_) => break 'dispatch,
                    },
                }
            };

            if self.cancellations.is_canceled(task_id) {
                debug!(task_id = %task_id, group = %group.group_key, "dispatch stopped by cancellation");
                break;
            }

            let executor = self.executor.clone();
            let group = group.clone();
            let task_id = task_id.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                let unit_id = unit.id;
                let source_path = unit.source_path.clone();
                AssertUnwindSafe(executor.process(unit, &group, &task_id))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| UnitReport {
                        unit_id,
                        source_path,
                        outcome: Outcome::Failure(format!("unit {} crashed", unit_id)),
                        derived: DerivedArtifacts::default(),
                    })
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            self.collect(task_id, joined, &mut reports);
        }

        info!(
            task_id = %task_id,
            group = %group.group_key,
            finished = reports.len(),
            "group finished"
        );
        reports
    }

    /// Account for one finished unit. Returns `true` when it was canceled.
    fn collect(
        &self,
        task_id: &TaskId,
        joined: Result<UnitReport, JoinError>,
        reports: &mut Vec<UnitReport>,
    ) -> bool {
        let report = match joined {
            Ok(report) => report,
            Err(e) => {
                // Panics are caught inside the unit task, so only runtime
                // shutdown lands here.
                error!(task_id = %task_id, error = %e, "unit task aborted");
                return false;
            }
        };

        self.progress.record(task_id);
        debug!(
            task_id = %task_id,
            unit = %report.unit_id,
            normalized = ?report.derived.normalized,
            thumbnail = ?report.derived.thumbnail,
            trimmed = ?report.derived.trimmed,
            "unit collected"
        );
        if let Outcome::Failure(message) = &report.outcome {
            self.sink.emit(TaskEvent::error(task_id, message.clone()));
        }

        let canceled = report.outcome.is_canceled();
        reports.push(report);
        canceled
    }
}
