//! Hand-written fakes shared by the batch scenarios.

#![allow(dead_code)]

use adpilot::domain::events::{TaskEvent, TaskEventKind};
use adpilot::domain::media::MediaCommand;
use adpilot::domain::work::{CompositeRef, MediaKind, UnitId, WorkGroup, WorkUnit};
use adpilot::error::RemoteError;
use adpilot::ports::events::EventSink;
use adpilot::ports::platform::{
    AdPlatform, CampaignRef, CompositeRequest, ContainerRef, ImageHash, ReadyState, VideoRef,
};
use adpilot::ports::process::{ChildProcess, ProcessLauncher, ProcessOutput};
use adpilot::PipelineConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Keeps every event it receives.
#[derive(Default)]
pub struct Recorder(Mutex<Vec<TaskEvent>>);

impl EventSink for Recorder {
    fn emit(&self, event: TaskEvent) {
        self.0.lock().push(event);
    }
}

impl Recorder {
    pub fn percents(&self) -> Vec<u8> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match e.kind {
                TaskEventKind::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect()
    }

    pub fn steps(&self) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match &e.kind {
                TaskEventKind::Progress { step, .. } => Some(step.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match &e.kind {
                TaskEventKind::Error { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> usize {
        self.0
            .lock()
            .iter()
            .filter(|e| e.kind == TaskEventKind::TaskComplete)
            .count()
    }
}

/// In-memory ad platform.
#[derive(Default)]
pub struct FakePlatform {
    /// File names whose upload is rejected.
    pub failing_uploads: HashSet<String>,
    /// Once this many composites exist, every further image upload takes `slow_upload`.
    pub slow_after: Option<usize>,
    pub slow_upload: Duration,
    pub composites: AtomicUsize,
    pub uploads: AtomicUsize,
    /// Campaigns that exist, either created or seeded by a test.
    pub campaigns: Mutex<HashSet<String>>,
    /// `(campaign, group)` of every container created.
    pub containers: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl AdPlatform for FakePlatform {
    async fn create_campaign(&self, name: &str) -> Result<CampaignRef, RemoteError> {
        let id = format!("cmp-{}", name);
        self.campaigns.lock().insert(id.clone());
        Ok(CampaignRef(id))
    }

    async fn find_campaign(&self, id: &str) -> Result<Option<CampaignRef>, RemoteError> {
        Ok(self
            .campaigns
            .lock()
            .contains(id)
            .then(|| CampaignRef(id.to_string())))
    }

    async fn create_container(
        &self,
        campaign: &CampaignRef,
        group_key: &str,
    ) -> Result<ContainerRef, RemoteError> {
        self.containers
            .lock()
            .push((campaign.0.clone(), group_key.to_string()));
        Ok(ContainerRef(format!("adset-{}", group_key)))
    }

    async fn upload_image(&self, path: &Path) -> Result<ImageHash, RemoteError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if let Some(threshold) = self.slow_after {
            if self.composites.load(Ordering::SeqCst) >= threshold {
                tokio::time::sleep(self.slow_upload).await;
            }
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing_uploads.contains(&name) {
            return Err(RemoteError::new(
                r#"Status: 400 {"error": {"message": "Invalid image", "error_user_title": "Image Too Small", "error_user_msg": "Images must be at least 600px wide."}}"#,
            ));
        }
        Ok(ImageHash(format!("hash-{}", name)))
    }

    async fn upload_video(&self, path: &Path) -> Result<VideoRef, RemoteError> {
        Ok(VideoRef(format!("video-{}", path.display())))
    }

    async fn video_status(&self, _video: &VideoRef) -> Result<ReadyState, RemoteError> {
        Ok(ReadyState::Ready)
    }

    async fn create_composite(
        &self,
        request: &CompositeRequest,
    ) -> Result<CompositeRef, RemoteError> {
        let n = self.composites.fetch_add(1, Ordering::SeqCst);
        Ok(CompositeRef(format!("ad-{}-{}", request.name, n)))
    }
}

/// Launcher answering ffprobe with a short duration. ffmpeg either exits at
/// once or, with `block_ffmpeg`, runs until killed.
#[derive(Default)]
pub struct FakeLauncher {
    pub block_ffmpeg: bool,
    pub spawned: AtomicUsize,
    pub kills: Arc<AtomicUsize>,
}

struct FakeChild {
    stdout: Vec<u8>,
    blocking: bool,
    killed: Arc<Notify>,
    kills: Arc<AtomicUsize>,
    dead: bool,
}

#[async_trait]
impl ChildProcess for FakeChild {
    fn id(&self) -> Option<u32> {
        Some(31337)
    }

    async fn wait(&mut self) -> io::Result<ProcessOutput> {
        if self.blocking && !self.dead {
            self.killed.notified().await;
        }
        Ok(ProcessOutput {
            success: !self.dead,
            code: if self.dead { None } else { Some(0) },
            stdout: self.stdout.clone(),
            stderr: Vec::new(),
        })
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.dead = true;
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.killed.notify_one();
        Ok(())
    }
}

impl ProcessLauncher for FakeLauncher {
    fn spawn(&self, command: &MediaCommand) -> io::Result<Box<dyn ChildProcess>> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let is_duration_query = command.program_name() == "ffprobe";
        Ok(Box::new(FakeChild {
            stdout: if is_duration_query { b"12.0\n".to_vec() } else { Vec::new() },
            blocking: self.block_ffmpeg && !is_duration_query,
            killed: Arc::new(Notify::new()),
            kills: self.kills.clone(),
            dead: false,
        }))
    }
}

pub fn config(scratch: &Path) -> PipelineConfig {
    let mut config = PipelineConfig {
        progress_interval: Duration::ZERO,
        scratch_root: scratch.to_path_buf(),
        ..PipelineConfig::default()
    };
    config.readiness.initial_delay = Duration::from_millis(10);
    config
}

pub fn group(key: &str, index: usize, files: &[&str]) -> WorkGroup {
    let units = files
        .iter()
        .enumerate()
        .map(|(unit, file)| {
            let path = PathBuf::from(format!("/media/{}/{}", key, file));
            let kind = MediaKind::from_path(&path).expect("test files use media extensions");
            WorkUnit::new(UnitId { group: index, unit }, path, kind)
        })
        .collect();
    WorkGroup::new(key, units)
}
