use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::cancellation::CancellationRegistry;
use super::executor::{GroupContext, WorkUnitExecutor};
use super::processes::{ProcessRegistry, ProcessRunner};
use super::progress::ProgressAggregator;
use super::retry::RetryPoller;
use super::runner::BoundedConcurrentRunner;
use crate::config::PipelineConfig;
use crate::domain::campaign::CampaignTarget;
use crate::domain::creative::CreativeTemplate;
use crate::domain::events::TaskEvent;
use crate::domain::remote_error::humanize;
use crate::domain::task::{TaskId, TaskRecord, TaskSnapshot, TaskState};
use crate::domain::work::WorkGroup;
use crate::error::OrchestratorError;
use crate::ports::events::EventSink;
use crate::ports::platform::{AdPlatform, CampaignRef};
use crate::ports::process::ProcessLauncher;

/// A batch as submitted by a caller.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub task_id: TaskId,
    /// Parent of every container the batch creates.
    pub campaign: CampaignTarget,
    pub groups: Vec<WorkGroup>,
    /// Falls back to the configured limit.
    pub concurrency_limit: Option<usize>,
    pub creative: CreativeTemplate,
    /// Uploaded sources owned by this batch, deleted at finalization.
    pub staging_dir: Option<PathBuf>,
}

/// Returned by [`TaskOrchestrator::start_batch`].
#[derive(Debug)]
pub struct BatchTicket {
    pub task_id: TaskId,
    /// Resolves to the terminal state once the batch is finalized.
    pub handle: JoinHandle<TaskState>,
}

/// How a run ended, before it is written to the task record.
enum RunEnd {
    Completed,
    Canceled,
}

/// Entry point for starting, canceling and inspecting batches.
///
/// Each accepted batch runs on its own tokio task. Groups are processed in
/// order; the units of a group run concurrently through the
/// [`BoundedConcurrentRunner`].
pub struct TaskOrchestrator<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for TaskOrchestrator<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<P> {
    platform: Arc<P>,
    /// In-flight tasks. Lock order: this table, then the cancellation set,
    /// then the process registry.
    tasks: Mutex<HashMap<TaskId, TaskRecord>>,
    cancellations: Arc<CancellationRegistry>,
    processes: Arc<ProcessRegistry>,
    progress: Arc<ProgressAggregator>,
    runner: BoundedConcurrentRunner<P>,
    sink: Arc<dyn EventSink>,
    config: PipelineConfig,
}

impl<P> TaskOrchestrator<P>
where
    P: AdPlatform + 'static,
{
    pub fn new(
        platform: Arc<P>,
        launcher: Arc<dyn ProcessLauncher>,
        sink: Arc<dyn EventSink>,
        config: PipelineConfig,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let processes = Arc::new(ProcessRegistry::new());
        let cancellations = Arc::new(CancellationRegistry::new(processes.clone()));
        let progress = Arc::new(ProgressAggregator::new(
            sink.clone(),
            config.progress_interval,
        ));
        let executor = Arc::new(WorkUnitExecutor::new(
            platform.clone(),
            Arc::new(ProcessRunner::new(
                launcher,
                processes.clone(),
                cancellations.clone(),
            )),
            cancellations.clone(),
            RetryPoller::new(config.retry_policy()),
            config.media_settings(),
        ));
        let runner = BoundedConcurrentRunner::new(
            executor,
            progress.clone(),
            cancellations.clone(),
            sink.clone(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                platform,
                tasks: Mutex::new(HashMap::new()),
                cancellations,
                processes,
                progress,
                runner,
                sink,
                config,
            }),
        })
    }

    /// Resolve the batch's campaign, register the batch and start it in the
    /// background. Nothing is registered when the campaign cannot be
    /// resolved, so an unknown campaign id is rejected before any work starts.
    pub async fn start_batch(
        &self,
        request: BatchRequest,
    ) -> Result<BatchTicket, OrchestratorError> {
        if !is_valid_task_id(request.task_id.as_str()) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "task id {:?} must be non-empty and use only letters, digits, '-' or '_'",
                request.task_id.as_str()
            )));
        }
        if request.concurrency_limit == Some(0) {
            return Err(OrchestratorError::InvalidRequest(
                "concurrency limit must be at least 1".into(),
            ));
        }
        if request.campaign.is_blank() {
            return Err(OrchestratorError::InvalidRequest(
                "campaign name or id must not be empty".into(),
            ));
        }
        // Cheap early rejection; checked again when the record is inserted.
        self.ensure_not_in_flight(&request.task_id)?;

        let campaign = self.resolve_campaign(&request.campaign).await?;

        let total_units: usize = request.groups.iter().map(|g| g.units.len()).sum();
        let task_id = request.task_id.clone();
        {
            let mut tasks = self.inner.tasks.lock();
            if tasks.contains_key(&task_id) {
                return Err(OrchestratorError::DuplicateTask(task_id));
            }
            tasks.insert(task_id.clone(), TaskRecord::new(task_id.clone(), total_units));
        }
        self.inner.progress.begin(&task_id, total_units);

        info!(
            task_id = %task_id,
            campaign = %campaign.0,
            groups = request.groups.len(),
            units = total_units,
            "batch accepted"
        );

        let inner = self.inner.clone();
        let span = info_span!("batch", task_id = %task_id);
        let handle = tokio::spawn(inner.run(request, campaign).instrument(span));

        Ok(BatchTicket { task_id, handle })
    }

    fn ensure_not_in_flight(&self, task_id: &TaskId) -> Result<(), OrchestratorError> {
        if self.inner.tasks.lock().contains_key(task_id) {
            return Err(OrchestratorError::DuplicateTask(task_id.clone()));
        }
        Ok(())
    }

    async fn resolve_campaign(
        &self,
        target: &CampaignTarget,
    ) -> Result<CampaignRef, OrchestratorError> {
        let platform = &self.inner.platform;
        match target {
            CampaignTarget::Existing { id } => match platform.find_campaign(id).await {
                Ok(Some(campaign)) => Ok(campaign),
                Ok(None) => Err(OrchestratorError::CampaignNotFound(id.clone())),
                Err(e) => Err(OrchestratorError::Campaign(humanize(&e.message))),
            },
            CampaignTarget::Create { name } => {
                let campaign = platform
                    .create_campaign(name)
                    .await
                    .map_err(|e| OrchestratorError::Campaign(humanize(&e.message)))?;
                info!(name = %name, campaign = %campaign.0, "campaign created");
                Ok(campaign)
            }
        }
    }

    /// Request cancellation. Returns `false` when the task is unknown or
    /// already winding down; calling it again is harmless.
    pub fn cancel_batch(&self, task_id: &TaskId) -> bool {
        let mut tasks = self.inner.tasks.lock();
        let Some(record) = tasks.get_mut(task_id) else {
            debug!(task_id = %task_id, "cancel for unknown or finished task ignored");
            return false;
        };
        if record.transition(TaskState::Canceling).is_err() {
            // already canceling, or past the point of no return
            return false;
        }
        // Marked under the table lock so finalization cannot clear the mark
        // before it is set.
        self.inner.cancellations.mark_canceled(task_id);
        true
    }

    pub fn status(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        let (state, total_units) = {
            let tasks = self.inner.tasks.lock();
            let record = tasks.get(task_id)?;
            (record.state, record.total_units)
        };
        let processed_units = self
            .inner
            .progress
            .snapshot(task_id)
            .map(|(processed, _)| processed)
            .unwrap_or(0);

        Some(TaskSnapshot {
            task_id: task_id.clone(),
            state,
            processed_units,
            total_units,
        })
    }

    /// Ids of every batch still in flight.
    pub fn active_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.inner.tasks.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl<P> Inner<P>
where
    P: AdPlatform + 'static,
{
    async fn run(self: Arc<Self>, request: BatchRequest, campaign: CampaignRef) -> TaskState {
        let task_id = request.task_id.clone();
        let staging_dir = request.staging_dir.clone();
        // Unique per run: a batch reusing the id never shares this directory.
        let run_id = Uuid::new_v4().simple().to_string();
        let scratch_dir = self
            .config
            .scratch_root
            .join("tasks")
            .join(format!("{}-{}", task_id, &run_id[..8]));

        // The groups run on their own task so a panic anywhere inside still
        // reaches finalization.
        let driver = tokio::spawn(
            self.clone()
                .drive(request, campaign, scratch_dir.clone())
                .in_current_span(),
        );
        let result = match driver.await {
            Ok(result) => result,
            Err(e) => Err(OrchestratorError::Orchestration(format!(
                "batch worker crashed: {}",
                e
            ))),
        };

        // A cancel racing the last unit wins: completion is only announced
        // if the record can still move to Completed.
        let result = match result {
            Ok(RunEnd::Completed) => match self.set_state(&task_id, TaskState::Completed) {
                Ok(true) => Ok(RunEnd::Completed),
                Ok(false) => Ok(RunEnd::Canceled),
                Err(e) => Err(e),
            },
            other => other,
        };

        let state = match result {
            Ok(RunEnd::Completed) => {
                self.progress.force_emit(&task_id, 100);
                self.sink.emit(TaskEvent::complete(&task_id));
                TaskState::Completed
            }
            Ok(RunEnd::Canceled) => TaskState::Canceled,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "batch failed");
                self.sink
                    .emit(TaskEvent::error(&task_id, humanize(&e.to_string())));
                TaskState::Failed
            }
        };

        self.finalize(&task_id, state, &scratch_dir, staging_dir.as_deref())
            .await
    }

    async fn drive(
        self: Arc<Self>,
        request: BatchRequest,
        campaign: CampaignRef,
        scratch_dir: PathBuf,
    ) -> Result<RunEnd, OrchestratorError> {
        let task_id = request.task_id;

        if !self.set_state(&task_id, TaskState::Running)? {
            return Ok(RunEnd::Canceled);
        }
        self.progress.force_emit(&task_id, 0);

        tokio::fs::create_dir_all(&scratch_dir).await.map_err(|e| {
            OrchestratorError::Orchestration(format!(
                "cannot create scratch directory {}: {}",
                scratch_dir.display(),
                e
            ))
        })?;

        let limit = request
            .concurrency_limit
            .unwrap_or(self.config.concurrency_limit);
        let creative = Arc::new(request.creative);

        for group in request.groups {
            if self.cancellations.check(&task_id).is_err() {
                return Ok(RunEnd::Canceled);
            }
            if group.is_empty() {
                debug!(task_id = %task_id, group = %group.group_key, "empty group skipped");
                continue;
            }

            let container = match self
                .platform
                .create_container(&campaign, &group.group_key)
                .await
            {
                Ok(container) => container,
                Err(e) => {
                    let message = format!(
                        "{}: container creation failed: {}",
                        group.group_key,
                        humanize(&e.message)
                    );
                    warn!(task_id = %task_id, group = %group.group_key, error = %message, "group skipped");
                    self.sink.emit(TaskEvent::error(&task_id, message));
                    self.progress.advance(&task_id, group.units.len());
                    continue;
                }
            };
            info!(task_id = %task_id, group = %group.group_key, container = %container.0, units = group.units.len(), "group started");

            let context = Arc::new(GroupContext {
                group_key: group.group_key,
                container,
                creative: creative.clone(),
                scratch_dir: scratch_dir.clone(),
            });
            let reports = self
                .runner
                .execute(group.units, context, limit, &task_id)
                .await;

            if reports.iter().any(|report| report.outcome.is_canceled()) {
                return Ok(RunEnd::Canceled);
            }
        }

        if self.cancellations.is_canceled(&task_id) {
            return Ok(RunEnd::Canceled);
        }
        Ok(RunEnd::Completed)
    }

    /// Move the task to `next`. `Ok(false)` when a cancel got there first.
    fn set_state(&self, task_id: &TaskId, next: TaskState) -> Result<bool, OrchestratorError> {
        let mut tasks = self.tasks.lock();
        let record = tasks.get_mut(task_id).ok_or_else(|| {
            OrchestratorError::Orchestration(format!("task {} vanished from the table", task_id))
        })?;
        if record.state == TaskState::Canceling {
            return Ok(false);
        }
        record.transition(next)?;
        Ok(true)
    }

    /// Write the terminal state, tear down every per-task resource and return the state.
    async fn finalize(
        &self,
        task_id: &TaskId,
        state: TaskState,
        scratch_dir: &Path,
        staging_dir: Option<&Path>,
    ) -> TaskState {
        // The record stays, terminal, until the directories are gone: the id
        // cannot be reused while its files are still being removed.
        {
            let mut tasks = self.tasks.lock();
            if let Some(record) = tasks.get_mut(task_id) {
                if record.state != state {
                    if let Err(e) = record.transition(state) {
                        warn!(task_id = %task_id, error = %e, "unexpected final transition");
                    }
                }
            }
        }
        self.processes.release(task_id);

        remove_dir(task_id, scratch_dir).await;
        if let Some(staging_dir) = staging_dir {
            remove_dir(task_id, staging_dir).await;
        }

        let processed = {
            let mut tasks = self.tasks.lock();
            tasks.remove(task_id);
            self.cancellations.clear(task_id);
            let processed = self
                .progress
                .snapshot(task_id)
                .map(|(processed, _)| processed)
                .unwrap_or(0);
            self.progress.forget(task_id);
            processed
        };

        info!(task_id = %task_id, state = %state, processed, "batch finalized");
        state
    }
}

fn is_valid_task_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn remove_dir(task_id: &TaskId, dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(task_id = %task_id, dir = %dir.display(), "removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(task_id = %task_id, dir = %dir.display(), error = %e, "cleanup failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::TaskEventKind;
    use crate::domain::media::MediaCommand;
    use crate::domain::work::{CompositeRef, MediaKind, UnitId, WorkUnit};
    use crate::error::RemoteError;
    use crate::ports::platform::{ContainerRef, ImageHash, MockAdPlatform};
    use crate::ports::process::ChildProcess;
    use std::io;
    use std::time::Duration;

    struct NoProcesses;

    impl ProcessLauncher for NoProcesses {
        fn spawn(&self, _command: &MediaCommand) -> io::Result<Box<dyn ChildProcess>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "unused"))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<TaskEvent>>);

    impl EventSink for Recorder {
        fn emit(&self, event: TaskEvent) {
            self.0.lock().push(event);
        }
    }

    impl Recorder {
        fn kinds(&self) -> Vec<TaskEventKind> {
            self.0.lock().iter().map(|e| e.kind.clone()).collect()
        }
    }

    fn config(scratch: &Path) -> PipelineConfig {
        PipelineConfig {
            progress_interval: Duration::ZERO,
            scratch_root: scratch.to_path_buf(),
            ..PipelineConfig::default()
        }
    }

    fn image_group(key: &str, group: usize, count: usize) -> WorkGroup {
        let units = (0..count)
            .map(|unit| {
                WorkUnit::new(
                    UnitId { group, unit },
                    PathBuf::from(format!("/in/{}/{}.jpg", key, unit)),
                    MediaKind::Image,
                )
            })
            .collect();
        WorkGroup::new(key, units)
    }

    fn request(task: &str, groups: Vec<WorkGroup>) -> BatchRequest {
        BatchRequest {
            task_id: TaskId::from(task),
            campaign: CampaignTarget::Create {
                name: "Spring".into(),
            },
            groups,
            concurrency_limit: None,
            creative: CreativeTemplate::default(),
            staging_dir: None,
        }
    }

    fn with_campaign(platform: &mut MockAdPlatform) {
        platform
            .expect_create_campaign()
            .returning(|name| Ok(CampaignRef(format!("cmp-{}", name))));
    }

    fn happy_platform() -> MockAdPlatform {
        let mut platform = MockAdPlatform::new();
        with_campaign(&mut platform);
        platform
            .expect_create_container()
            .withf(|campaign, _| campaign.0 == "cmp-Spring")
            .returning(|_, key| Ok(ContainerRef(format!("c-{}", key))));
        platform
            .expect_upload_image()
            .returning(|_| Ok(ImageHash("h".into())));
        platform
            .expect_create_composite()
            .returning(|req| Ok(CompositeRef(format!("ad-{}", req.name))));
        platform
    }

    fn task_dirs(scratch: &Path) -> Vec<String> {
        match std::fs::read_dir(scratch.join("tasks")) {
            Ok(entries) => entries
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn completes_and_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let staging_path = staging.path().join("upload");
        std::fs::create_dir(&staging_path).unwrap();
        let recorder = Arc::new(Recorder::default());
        let orchestrator = TaskOrchestrator::new(
            Arc::new(happy_platform()),
            Arc::new(NoProcesses),
            recorder.clone(),
            config(scratch.path()),
        )
        .unwrap();

        let mut req = request("t1", vec![image_group("a", 0, 2), image_group("b", 1, 2)]);
        req.staging_dir = Some(staging_path.clone());
        let ticket = orchestrator.start_batch(req).await.unwrap();
        let state = ticket.handle.await.unwrap();

        assert_eq!(state, TaskState::Completed);
        let kinds = recorder.kinds();
        assert_eq!(kinds.last(), Some(&TaskEventKind::TaskComplete));
        assert_eq!(
            kinds.iter().filter(|k| matches!(k, TaskEventKind::Error { .. })).count(),
            0
        );
        let percents: Vec<u8> = kinds
            .iter()
            .filter_map(|k| match k {
                TaskEventKind::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![0, 25, 50, 75, 100]);

        assert!(orchestrator.status(&TaskId::from("t1")).is_none());
        assert!(task_dirs(scratch.path()).is_empty());
        assert!(!staging_path.exists());
        assert!(orchestrator.active_tasks().is_empty());
    }

    #[tokio::test]
    async fn duplicate_in_flight_id_is_rejected() {
        let scratch = tempfile::tempdir().unwrap();
        // current_thread runtime: the first batch is still registered when
        // the second one arrives
        let orchestrator = TaskOrchestrator::new(
            Arc::new(happy_platform()),
            Arc::new(NoProcesses),
            Arc::new(Recorder::default()),
            config(scratch.path()),
        )
        .unwrap();

        let first = orchestrator
            .start_batch(request("same", vec![image_group("a", 0, 1)]))
            .await
            .unwrap();
        let second = orchestrator
            .start_batch(request("same", vec![image_group("a", 0, 1)]))
            .await;
        assert!(matches!(second, Err(OrchestratorError::DuplicateTask(_))));

        assert_eq!(first.handle.await.unwrap(), TaskState::Completed);
        // The id is free again once finalized.
        let third = orchestrator
            .start_batch(request("same", vec![image_group("a", 0, 1)]))
            .await
            .unwrap();
        assert_eq!(third.handle.await.unwrap(), TaskState::Completed);
    }

    #[tokio::test]
    async fn each_run_gets_its_own_scratch_directory() {
        let scratch = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut platform = MockAdPlatform::new();
        with_campaign(&mut platform);
        let root = scratch.path().to_path_buf();
        let dirs = seen.clone();
        platform.expect_create_container().returning(move |_, key| {
            dirs.lock().extend(task_dirs(&root));
            Ok(ContainerRef(key.to_string()))
        });
        platform
            .expect_upload_image()
            .returning(|_| Ok(ImageHash("h".into())));
        platform
            .expect_create_composite()
            .returning(|_| Ok(CompositeRef("ad".into())));
        let orchestrator = TaskOrchestrator::new(
            Arc::new(platform),
            Arc::new(NoProcesses),
            Arc::new(Recorder::default()),
            config(scratch.path()),
        )
        .unwrap();

        for _ in 0..2 {
            let ticket = orchestrator
                .start_batch(request("reused", vec![image_group("a", 0, 1)]))
                .await
                .unwrap();
            assert_eq!(ticket.handle.await.unwrap(), TaskState::Completed);
        }

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 2, "{seen:?}");
        assert!(seen.iter().all(|dir| dir.starts_with("reused-")));
        assert_ne!(seen[0], seen[1]);
        assert!(task_dirs(scratch.path()).is_empty());
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let scratch = tempfile::tempdir().unwrap();
        let orchestrator = TaskOrchestrator::new(
            Arc::new(MockAdPlatform::new()),
            Arc::new(NoProcesses),
            Arc::new(Recorder::default()),
            config(scratch.path()),
        )
        .unwrap();

        let mut zero = request("z", vec![]);
        zero.concurrency_limit = Some(0);
        assert!(matches!(
            orchestrator.start_batch(zero).await,
            Err(OrchestratorError::InvalidRequest(_))
        ));
        for bad in ["", "../etc", "a b"] {
            assert!(matches!(
                orchestrator.start_batch(request(bad, vec![])).await,
                Err(OrchestratorError::InvalidRequest(_))
            ));
        }
        let mut unnamed = request("n", vec![]);
        unnamed.campaign = CampaignTarget::Create { name: " ".into() };
        assert!(matches!(
            orchestrator.start_batch(unnamed).await,
            Err(OrchestratorError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn unknown_campaign_is_rejected_before_any_work() {
        let scratch = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut platform = MockAdPlatform::new();
        platform
            .expect_find_campaign()
            .withf(|id| id == "404404")
            .times(1)
            .returning(|_| Ok(None));
        platform.expect_create_campaign().never();
        platform.expect_create_container().never();
        let orchestrator = TaskOrchestrator::new(
            Arc::new(platform),
            Arc::new(NoProcesses),
            recorder.clone(),
            config(scratch.path()),
        )
        .unwrap();

        let mut req = request("lost", vec![image_group("a", 0, 2)]);
        req.campaign = CampaignTarget::Existing { id: "404404".into() };
        let result = orchestrator.start_batch(req).await;

        assert!(matches!(result, Err(OrchestratorError::CampaignNotFound(id)) if id == "404404"));
        assert!(orchestrator.status(&TaskId::from("lost")).is_none());
        assert!(recorder.kinds().is_empty());
    }

    #[tokio::test]
    async fn existing_campaign_parents_every_container() {
        let scratch = tempfile::tempdir().unwrap();
        let mut platform = MockAdPlatform::new();
        platform
            .expect_find_campaign()
            .returning(|id| Ok(Some(CampaignRef(id.to_string()))));
        platform.expect_create_campaign().never();
        platform
            .expect_create_container()
            .withf(|campaign, _| campaign.0 == "120")
            .times(2)
            .returning(|_, key| Ok(ContainerRef(key.to_string())));
        platform
            .expect_upload_image()
            .returning(|_| Ok(ImageHash("h".into())));
        platform
            .expect_create_composite()
            .returning(|_| Ok(CompositeRef("ad".into())));
        let orchestrator = TaskOrchestrator::new(
            Arc::new(platform),
            Arc::new(NoProcesses),
            Arc::new(Recorder::default()),
            config(scratch.path()),
        )
        .unwrap();

        let mut req = request("attach", vec![image_group("a", 0, 1), image_group("b", 1, 1)]);
        req.campaign = CampaignTarget::Existing { id: "120".into() };
        let ticket = orchestrator.start_batch(req).await.unwrap();

        assert_eq!(ticket.handle.await.unwrap(), TaskState::Completed);
    }

    #[tokio::test]
    async fn campaign_creation_failure_is_reported() {
        let scratch = tempfile::tempdir().unwrap();
        let mut platform = MockAdPlatform::new();
        platform.expect_create_campaign().returning(|_| {
            Err(RemoteError::new(
                r#"{"error": {"error_user_title": "Spending Limit", "error_user_msg": "Account is over its limit."}}"#,
            ))
        });
        let orchestrator = TaskOrchestrator::new(
            Arc::new(platform),
            Arc::new(NoProcesses),
            Arc::new(Recorder::default()),
            config(scratch.path()),
        )
        .unwrap();

        let err = orchestrator
            .start_batch(request("broke", vec![image_group("a", 0, 1)]))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "campaign setup failed: Spending Limit: Account is over its limit."
        );
        assert!(orchestrator.active_tasks().is_empty());
    }

    #[tokio::test]
    async fn failed_container_skips_group_but_counts_units() {
        let scratch = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut platform = MockAdPlatform::new();
        with_campaign(&mut platform);
        platform.expect_create_container().returning(|_, key| {
            if key == "broken" {
                Err(RemoteError::new("permission denied"))
            } else {
                Ok(ContainerRef(key.to_string()))
            }
        });
        platform
            .expect_upload_image()
            .times(1)
            .returning(|_| Ok(ImageHash("h".into())));
        platform
            .expect_create_composite()
            .times(1)
            .returning(|_| Ok(CompositeRef("ad".into())));
        let orchestrator = TaskOrchestrator::new(
            Arc::new(platform),
            Arc::new(NoProcesses),
            recorder.clone(),
            config(scratch.path()),
        )
        .unwrap();

        let ticket = orchestrator
            .start_batch(request(
                "t",
                vec![image_group("broken", 0, 2), image_group("fine", 1, 1)],
            ))
            .await
            .unwrap();

        assert_eq!(ticket.handle.await.unwrap(), TaskState::Completed);
        let kinds = recorder.kinds();
        assert!(kinds.contains(&TaskEventKind::Error {
            message: "broken: container creation failed: permission denied".into()
        }));
        assert!(kinds.contains(&TaskEventKind::Progress {
            percent: 100,
            step: "3/3".into()
        }));
    }

    #[tokio::test]
    async fn panic_during_orchestration_fails_the_task() {
        let scratch = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut platform = MockAdPlatform::new();
        with_campaign(&mut platform);
        platform
            .expect_create_container()
            .returning(|_, _| panic!("platform client bug"));
        let orchestrator = TaskOrchestrator::new(
            Arc::new(platform),
            Arc::new(NoProcesses),
            recorder.clone(),
            config(scratch.path()),
        )
        .unwrap();

        let ticket = orchestrator
            .start_batch(request("boom", vec![image_group("a", 0, 1)]))
            .await
            .unwrap();

        assert_eq!(ticket.handle.await.unwrap(), TaskState::Failed);
        let kinds = recorder.kinds();
        assert!(!kinds.contains(&TaskEventKind::TaskComplete));
        assert!(matches!(kinds.last(), Some(TaskEventKind::Error { .. })));
        assert!(orchestrator.status(&TaskId::from("boom")).is_none());
    }

    #[tokio::test]
    async fn cancel_of_unknown_task_is_a_noop() {
        let scratch = tempfile::tempdir().unwrap();
        let orchestrator = TaskOrchestrator::new(
            Arc::new(MockAdPlatform::new()),
            Arc::new(NoProcesses),
            Arc::new(Recorder::default()),
            config(scratch.path()),
        )
        .unwrap();

        assert!(!orchestrator.cancel_batch(&TaskId::from("nope")));
    }

    #[tokio::test]
    async fn cancel_before_start_ends_canceled_without_remote_calls() {
        let scratch = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut platform = MockAdPlatform::new();
        with_campaign(&mut platform);
        platform.expect_create_container().never();
        let orchestrator = TaskOrchestrator::new(
            Arc::new(platform),
            Arc::new(NoProcesses),
            recorder.clone(),
            config(scratch.path()),
        )
        .unwrap();

        // current_thread runtime: the batch task cannot start before we yield
        let ticket = orchestrator
            .start_batch(request("early", vec![image_group("a", 0, 3)]))
            .await
            .unwrap();
        assert!(orchestrator.cancel_batch(&ticket.task_id));
        assert!(!orchestrator.cancel_batch(&ticket.task_id));
        assert_eq!(
            orchestrator.status(&ticket.task_id).map(|s| s.state),
            Some(TaskState::Canceling)
        );

        assert_eq!(ticket.handle.await.unwrap(), TaskState::Canceled);
        assert!(!recorder.kinds().contains(&TaskEventKind::TaskComplete));
        assert!(!orchestrator.cancel_batch(&TaskId::from("early")));
    }
}
