use axum::{
    extract::{Multipart, Path as UrlPath, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::upload::{path_is_valid, stream_to_file};
use super::{ApiError, AppState, LIVENESS_INTERVAL};
use crate::application::{BatchRequest, TaskOrchestrator};
use crate::domain::campaign::CampaignTarget;
use crate::domain::catalog::discover_groups;
use crate::domain::creative::CreativeTemplate;
use crate::domain::events::{TaskEvent, TaskEventKind};
use crate::domain::task::{TaskId, TaskSnapshot};
use crate::ports::platform::AdPlatform;

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub task_id: TaskId,
}

#[derive(Debug, Serialize)]
pub struct CancelAccepted {
    pub task_id: TaskId,
    pub accepted: bool,
    /// Whether this request moved a live batch into cancellation.
    pub canceling: bool,
}

/// Non-file form fields of an upload.
#[derive(Debug, Default)]
struct BatchForm {
    task_id: Option<TaskId>,
    campaign_id: Option<String>,
    campaign_name: Option<String>,
    concurrency: Option<usize>,
    /// Raw `key: value` text, laid over the server's defaults.
    creative: Option<String>,
    files: usize,
}

impl BatchForm {
    fn campaign(&self) -> Result<CampaignTarget, ApiError> {
        CampaignTarget::from_form(self.campaign_id.as_deref(), self.campaign_name.as_deref())
            .ok_or_else(|| ApiError::bad_request("campaign_name or campaign_id is required"))
    }

    fn creative(&self, defaults: &CreativeTemplate) -> Result<CreativeTemplate, ApiError> {
        let creative = match &self.creative {
            Some(text) => CreativeTemplate::parse_over(text, defaults),
            None => defaults.clone(),
        };
        let missing = creative.missing_required();
        if !missing.is_empty() {
            return Err(ApiError::bad_request(format!(
                "creative is missing {}",
                missing.join(", ")
            )));
        }
        Ok(creative)
    }
}

/// `POST /batches`: stage the uploaded tree, group it and start the batch.
pub async fn create<P>(
    State(state): State<AppState<P>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Accepted>), ApiError>
where
    P: AdPlatform + 'static,
{
    tokio::fs::create_dir_all(&state.staging_root)
        .await
        .map_err(|e| ApiError::internal(format!("cannot prepare staging area: {}", e)))?;
    // Deleted on drop, so every early return below cleans up after itself.
    let staging = tempfile::Builder::new()
        .prefix("batch-")
        .tempdir_in(&state.staging_root)
        .map_err(|e| ApiError::internal(format!("cannot create staging directory: {}", e)))?;

    let form = receive(multipart, staging.path()).await?;
    if form.files == 0 {
        return Err(ApiError::bad_request("no files uploaded"));
    }
    let campaign = form.campaign()?;
    let creative = form.creative(&state.creative_defaults)?;

    let groups = discover_groups(staging.path())
        .await
        .map_err(|e| ApiError::internal(format!("cannot read staged files: {}", e)))?;
    if groups.is_empty() {
        return Err(ApiError::bad_request(
            "no media found; upload files named <folder>/<file>",
        ));
    }

    let request = BatchRequest {
        task_id: form.task_id.unwrap_or_else(TaskId::generate),
        campaign,
        groups,
        concurrency_limit: form.concurrency,
        creative,
        staging_dir: Some(staging.path().to_path_buf()),
    };
    let ticket = state.orchestrator.start_batch(request).await?;
    // The orchestrator removes it when the batch is finalized.
    let _ = staging.keep();

    info!(task_id = %ticket.task_id, files = form.files, "batch uploaded");
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            task_id: ticket.task_id,
        }),
    ))
}

async fn receive(mut multipart: Multipart, staging: &Path) -> Result<BatchForm, ApiError> {
    let mut form = BatchForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if let Some(file_name) = field.file_name().map(str::to_owned) {
            let relative = PathBuf::from(&file_name);
            if !path_is_valid(&relative) {
                return Err(ApiError::bad_request(format!(
                    "invalid file path {:?}",
                    file_name
                )));
            }
            stream_to_file(&staging.join(&relative), field)
                .await
                .map_err(|e| ApiError::internal(format!("cannot save {}: {}", file_name, e)))?;
            form.files += 1;
            continue;
        }

        let name = field.name().unwrap_or_default().to_owned();
        let value = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        match name.as_str() {
            "task_id" => {
                let value = value.trim();
                if !value.is_empty() {
                    form.task_id = Some(TaskId::new(value));
                }
            }
            "campaign_id" => form.campaign_id = Some(value),
            "campaign_name" => form.campaign_name = Some(value),
            "concurrency" => {
                let limit = value.trim().parse::<usize>().map_err(|_| {
                    ApiError::bad_request("concurrency must be a positive integer")
                })?;
                form.concurrency = Some(limit);
            }
            "creative" => form.creative = Some(value),
            other => debug!(field = other, "ignoring form field"),
        }
    }

    Ok(form)
}

/// `GET /batches/:task_id`
pub async fn status<P>(
    State(state): State<AppState<P>>,
    UrlPath(task_id): UrlPath<String>,
) -> Result<Json<TaskSnapshot>, ApiError>
where
    P: AdPlatform + 'static,
{
    state
        .orchestrator
        .status(&TaskId::new(task_id.as_str()))
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no batch {} in flight", task_id)))
}

/// `DELETE /batches/:task_id`: always accepted, whatever the batch's state.
pub async fn cancel<P>(
    State(state): State<AppState<P>>,
    UrlPath(task_id): UrlPath<String>,
) -> (StatusCode, Json<CancelAccepted>)
where
    P: AdPlatform + 'static,
{
    let task_id = TaskId::new(task_id);
    let canceling = state.orchestrator.cancel_batch(&task_id);
    (
        StatusCode::ACCEPTED,
        Json(CancelAccepted {
            task_id,
            accepted: true,
            canceling,
        }),
    )
}

/// `GET /batches/:task_id/events`: the batch's events as server-sent events.
pub async fn events<P>(
    State(state): State<AppState<P>>,
    UrlPath(task_id): UrlPath<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError>
where
    P: AdPlatform + 'static,
{
    let task_id = TaskId::new(task_id);
    // Subscribe first so nothing is missed between the check and the stream.
    let rx = state.event_hub.subscribe();
    if state.orchestrator.status(&task_id).is_none() {
        return Err(ApiError::not_found(format!("no batch {} in flight", task_id)));
    }

    let stream = task_events(rx, task_id, state.orchestrator.clone());
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

struct Watch<P> {
    rx: broadcast::Receiver<TaskEvent>,
    task_id: TaskId,
    orchestrator: TaskOrchestrator<P>,
    liveness: Interval,
    done: bool,
}

/// Events of one task. Ends after `task_complete`, or once the task is no
/// longer in flight (canceled and failed batches send no closing event).
fn task_events<P>(
    rx: broadcast::Receiver<TaskEvent>,
    task_id: TaskId,
    orchestrator: TaskOrchestrator<P>,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    P: AdPlatform + 'static,
{
    let mut liveness = interval(LIVENESS_INTERVAL);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let watch = Watch {
        rx,
        task_id,
        orchestrator,
        liveness,
        done: false,
    };

    futures::stream::unfold(watch, |mut watch| async move {
        if watch.done {
            return None;
        }
        loop {
            tokio::select! {
                // Buffered events go out before the stream can end.
                biased;
                received = watch.rx.recv() => match received {
                    Ok(event) if event.task_id == watch.task_id => {
                        watch.done = event.kind == TaskEventKind::TaskComplete;
                        return Some((Ok(to_sse(&event)), watch));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(task_id = %watch.task_id, skipped, "event stream lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                },
                _ = watch.liveness.tick() => {
                    if watch.orchestrator.status(&watch.task_id).is_none() {
                        return None;
                    }
                }
            }
        }
    })
}

fn to_sse(event: &TaskEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|_| Event::default().event("error").data("unencodable event"))
}
