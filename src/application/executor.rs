//! Processing of a single media file, from local preparation to the final
//! remote object.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

use super::cancellation::CancellationRegistry;
use super::processes::ProcessRunner;
use super::retry::RetryPoller;
use crate::domain::creative::CreativeTemplate;
use crate::domain::media;
use crate::domain::normalize::{convert_to_jpeg, converted_path, needs_conversion};
use crate::domain::remote_error::humanize;
use crate::domain::task::TaskId;
use crate::domain::work::{CompositeRef, MediaKind, Outcome, UnitReport, WorkUnit};
use crate::error::UnitError;
use crate::ports::platform::{AdPlatform, CompositeRequest, ContainerRef, ImageHash, VideoRef};

/// What every unit of a group shares.
#[derive(Debug, Clone)]
pub struct GroupContext {
    pub group_key: String,
    pub container: ContainerRef,
    pub creative: Arc<CreativeTemplate>,
    /// Where derived files go; removed when the task is finalized.
    pub scratch_dir: PathBuf,
}

/// External tools and limits for media preparation.
#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub ffmpeg: String,
    pub ffprobe: String,
    /// Longer videos are trimmed before upload.
    pub max_video_duration: Duration,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            max_video_duration: Duration::from_secs(240 * 60),
        }
    }
}

pub struct WorkUnitExecutor<P> {
    platform: Arc<P>,
    processes: Arc<ProcessRunner>,
    cancellations: Arc<CancellationRegistry>,
    poller: RetryPoller,
    media: MediaSettings,
}

impl<P> WorkUnitExecutor<P>
where
    P: AdPlatform,
{
    pub fn new(
        platform: Arc<P>,
        processes: Arc<ProcessRunner>,
        cancellations: Arc<CancellationRegistry>,
        poller: RetryPoller,
        media: MediaSettings,
    ) -> Self {
        Self {
            platform,
            processes,
            cancellations,
            poller,
            media,
        }
    }

    /// Run one unit to its outcome. Never fails: every error is folded into
    /// the returned report.
    pub async fn process(
        &self,
        mut unit: WorkUnit,
        group: &GroupContext,
        task_id: &TaskId,
    ) -> UnitReport {
        let span = info_span!("unit", task_id = %task_id, group = %group.group_key, unit = %unit.id);
        let result = self
            .run_steps(&mut unit, group, task_id)
            .instrument(span)
            .await;

        let outcome = match result {
            Ok(composite) => {
                info!(task_id = %task_id, source = %unit.source_path.display(), composite = %composite.0, "unit done");
                Outcome::Success(composite)
            }
            Err(e) if e.is_cancellation() || self.cancellations.is_canceled(task_id) => {
                debug!(task_id = %task_id, source = %unit.source_path.display(), error = %e, "unit canceled");
                Outcome::Canceled
            }
            Err(e) => {
                let message = failure_message(&unit.source_path, &e);
                warn!(task_id = %task_id, error = %message, "unit failed");
                Outcome::Failure(message)
            }
        };

        UnitReport {
            unit_id: unit.id,
            source_path: unit.source_path,
            outcome,
            derived: unit.derived,
        }
    }

    async fn run_steps(
        &self,
        unit: &mut WorkUnit,
        group: &GroupContext,
        task_id: &TaskId,
    ) -> Result<CompositeRef, UnitError> {
        let checkpoint = || self.cancellations.check(task_id);

        checkpoint()?;
        let scratch = unit_scratch_dir(group, unit);
        tokio::fs::create_dir_all(&scratch).await?;

        let mut primary = unit.source_path.clone();
        if unit.media_kind == MediaKind::Image && needs_conversion(&primary) {
            let converted = converted_path(&primary, &scratch);
            convert_to_jpeg(&primary, &converted).await?;
            debug!(from = %primary.display(), to = %converted.display(), "image converted");
            unit.derived.normalized = Some(converted.clone());
            primary = converted;
        }

        checkpoint()?;
        let image_hash = match unit.media_kind {
            MediaKind::Video => {
                let thumbnail = scratch.join("thumb.jpg");
                let command = media::thumbnail(&self.media.ffmpeg, &primary, &thumbnail);
                self.processes.run(task_id, &command).await?;
                unit.derived.thumbnail = Some(thumbnail.clone());

                checkpoint()?;
                self.upload_image(&thumbnail, "thumbnail upload").await?
            }
            MediaKind::Image => self.upload_image(&primary, "image upload").await?,
        };

        let video = match unit.media_kind {
            MediaKind::Video => {
                checkpoint()?;
                let upload_path = self.fit_duration(unit, &scratch, task_id, &primary).await?;

                checkpoint()?;
                let video = self
                    .platform
                    .upload_video(&upload_path)
                    .await
                    .map_err(|e| UnitError::remote("video upload", e))?;
                self.await_ready(&video, task_id).await?;
                Some(video)
            }
            MediaKind::Image => None,
        };

        checkpoint()?;
        let request = CompositeRequest {
            container: group.container.clone(),
            name: unit.display_name(),
            image_hash,
            video,
            creative: group.creative.as_ref().clone(),
        };
        self.platform
            .create_composite(&request)
            .await
            .map_err(|e| UnitError::remote("ad creation", e))
    }

    async fn upload_image(&self, path: &Path, step: &'static str) -> Result<ImageHash, UnitError> {
        self.platform
            .upload_image(path)
            .await
            .map_err(|e| UnitError::remote(step, e))
    }

    /// Path of a video no longer than the configured maximum, trimming a copy
    /// into the scratch directory when needed.
    async fn fit_duration(
        &self,
        unit: &mut WorkUnit,
        scratch: &Path,
        task_id: &TaskId,
        video: &Path,
    ) -> Result<PathBuf, UnitError> {
        let query = media::duration_query(&self.media.ffprobe, video);
        let output = self.processes.run(task_id, &query).await?;
        let duration = media::parse_duration(&output.stdout)
            .ok_or_else(|| UnitError::UnknownDuration(video.display().to_string()))?;

        let max = self.media.max_video_duration;
        if duration <= max.as_secs_f64() {
            return Ok(video.to_path_buf());
        }

        info!(duration, max = max.as_secs(), source = %video.display(), "trimming video");
        let trimmed = scratch.join(trimmed_name(video));
        let command = media::trim(&self.media.ffmpeg, video, &trimmed, max.as_secs());
        self.processes.run(task_id, &command).await?;
        unit.derived.trimmed = Some(trimmed.clone());
        Ok(trimmed)
    }

    async fn await_ready(&self, video: &VideoRef, task_id: &TaskId) -> Result<(), UnitError> {
        let platform = self.platform.as_ref();
        let cancellations = self.cancellations.as_ref();

        let ready = self
            .poller
            .poll_until_ready_or_canceled(
                move || platform.video_status(video),
                move || cancellations.check(task_id),
            )
            .await?;

        if !ready {
            return Err(UnitError::NotReady {
                asset_id: video.0.clone(),
            });
        }
        Ok(())
    }
}

/// Derived files of one unit live in their own directory so equal file
/// stems across units never collide.
fn unit_scratch_dir(group: &GroupContext, unit: &WorkUnit) -> PathBuf {
    group
        .scratch_dir
        .join(format!("{}_{}", unit.id.group, unit.id.unit))
}

fn trimmed_name(video: &Path) -> String {
    let ext = video
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".to_string());
    format!("trimmed.{}", ext)
}

/// User-facing description of a failed unit.
fn failure_message(source: &Path, error: &UnitError) -> String {
    let file = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.display().to_string());
    let detail = match error {
        UnitError::Remote { step, source } => format!("{} failed: {}", step, humanize(&source.message)),
        other => other.to_string(),
    };
    format!("{}: {}", file, detail)
}
