//! Filesystem sandbox standing in for the remote ad platform.
//!
//! Layout under the root directory:
//!
//! ```text
//! assets/<uuid>.<ext>                  uploaded images and videos
//! campaigns/<slug>-<id>.json           one per campaign
//! containers/<slug>-<id>/adset.json    one per group, naming its campaign
//! containers/<slug>-<id>/<uuid>.json   one per composite object
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::creative::CreativeTemplate;
use crate::domain::work::CompositeRef;
use crate::error::RemoteError;
use crate::ports::platform::{
    AdPlatform, CampaignRef, CompositeRequest, ContainerRef, ImageHash, ReadyState, VideoRef,
};

#[derive(Debug)]
pub struct FsPlatform {
    root: PathBuf,
    /// Status polls a video needs before it reports ready.
    ready_after: u32,
    polls: Mutex<HashMap<VideoRef, u32>>,
}

#[derive(Debug, Serialize)]
struct CampaignRecord<'a> {
    id: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct ContainerRecord<'a> {
    id: &'a str,
    name: &'a str,
    campaign: &'a CampaignRef,
}

/// What gets written for each composite object.
#[derive(Debug, Serialize)]
struct CompositeRecord<'a> {
    id: &'a str,
    name: &'a str,
    container: &'a ContainerRef,
    image_hash: &'a ImageHash,
    video: Option<&'a VideoRef>,
    creative: &'a CreativeTemplate,
    landing_url: String,
}

impl FsPlatform {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ready_after: 1,
            polls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ready_after(mut self, polls: u32) -> Self {
        self.ready_after = polls.max(1);
        self
    }

    fn assets_dir(&self) -> PathBuf {
        self.root.join("assets")
    }

    fn campaign_file(&self, id: &str) -> PathBuf {
        self.root.join("campaigns").join(format!("{}.json", id))
    }

    fn container_dir(&self, container: &ContainerRef) -> PathBuf {
        self.root.join("containers").join(&container.0)
    }

    /// Copy `source` into the asset store, returning the new asset id.
    async fn store_asset(&self, source: &Path) -> Result<String, RemoteError> {
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(platform_error(
                "Missing file",
                &format!("{} does not exist", source.display()),
            ));
        }

        let id = Uuid::new_v4().simple().to_string();
        let file_name = match source.extension() {
            Some(ext) => format!("{}.{}", id, ext.to_string_lossy().to_ascii_lowercase()),
            None => id.clone(),
        };

        let assets = self.assets_dir();
        tokio::fs::create_dir_all(&assets)
            .await
            .map_err(|e| io_error("create asset store", e))?;
        tokio::fs::copy(source, assets.join(&file_name))
            .await
            .map_err(|e| io_error("copy asset", e))?;

        debug!(source = %source.display(), asset = %file_name, "asset stored");
        Ok(id)
    }
}

#[async_trait]
impl AdPlatform for FsPlatform {
    async fn create_campaign(&self, name: &str) -> Result<CampaignRef, RemoteError> {
        let campaign = CampaignRef(sandbox_id(name));
        let record = CampaignRecord {
            id: &campaign.0,
            name,
        };
        write_json(&self.campaign_file(&campaign.0), &record, "create campaign").await?;

        debug!(name = %name, campaign = %campaign.0, "campaign created");
        Ok(campaign)
    }

    async fn find_campaign(&self, id: &str) -> Result<Option<CampaignRef>, RemoteError> {
        // Ids are slugs; anything else cannot name a file in the store.
        if id.is_empty() || slug(id) != id {
            return Ok(None);
        }
        let exists = tokio::fs::try_exists(self.campaign_file(id))
            .await
            .map_err(|e| io_error("look up campaign", e))?;
        Ok(exists.then(|| CampaignRef(id.to_string())))
    }

    async fn create_container(
        &self,
        campaign: &CampaignRef,
        group_key: &str,
    ) -> Result<ContainerRef, RemoteError> {
        if self.find_campaign(&campaign.0).await?.is_none() {
            return Err(platform_error(
                "Unknown campaign",
                &format!("campaign {} does not exist", campaign.0),
            ));
        }

        let container = ContainerRef(sandbox_id(group_key));
        let record = ContainerRecord {
            id: &container.0,
            name: group_key,
            campaign,
        };
        let dir = self.container_dir(&container);
        write_json(&dir.join("adset.json"), &record, "create container").await?;

        debug!(group = %group_key, campaign = %campaign.0, container = %container.0, "container created");
        Ok(container)
    }

    async fn upload_image(&self, path: &Path) -> Result<ImageHash, RemoteError> {
        self.store_asset(path).await.map(ImageHash)
    }

    async fn upload_video(&self, path: &Path) -> Result<VideoRef, RemoteError> {
        let video = VideoRef(self.store_asset(path).await?);
        self.polls.lock().insert(video.clone(), 0);
        Ok(video)
    }

    async fn video_status(&self, video: &VideoRef) -> Result<ReadyState, RemoteError> {
        let mut polls = self.polls.lock();
        let Some(count) = polls.get_mut(video) else {
            return Err(platform_error(
                "Unknown video",
                &format!("video {} was never uploaded", video.0),
            ));
        };
        *count += 1;
        if *count >= self.ready_after {
            Ok(ReadyState::Ready)
        } else {
            Ok(ReadyState::Pending)
        }
    }

    async fn create_composite(
        &self,
        request: &CompositeRequest,
    ) -> Result<CompositeRef, RemoteError> {
        let dir = self.container_dir(&request.container);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(platform_error(
                "Unknown ad set",
                &format!("container {} does not exist", request.container.0),
            ));
        }
        if let Some(video) = &request.video {
            let ready = self
                .polls
                .lock()
                .get(video)
                .map_or(false, |count| *count >= self.ready_after);
            if !ready {
                return Err(platform_error(
                    "Video not ready",
                    &format!("video {} is still processing", video.0),
                ));
            }
        }

        let id = Uuid::new_v4().simple().to_string();
        let record = CompositeRecord {
            id: &id,
            name: &request.name,
            container: &request.container,
            image_hash: &request.image_hash,
            video: request.video.as_ref(),
            creative: &request.creative,
            landing_url: request.creative.landing_url(),
        };
        write_json(&dir.join(format!("{}.json", id)), &record, "write composite").await?;

        Ok(CompositeRef(id))
    }
}

/// `<slug>-<8 hex>` identifier for a newly created object.
fn sandbox_id(name: &str) -> String {
    let short_id = Uuid::new_v4().simple().to_string();
    format!("{}-{}", slug(name), &short_id[..8])
}

async fn write_json<T: Serialize>(path: &Path, value: &T, action: &str) -> Result<(), RemoteError> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| RemoteError::new(format!("{}: cannot encode record: {}", action, e)))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(action, e))?;
    }
    tokio::fs::write(path, body)
        .await
        .map_err(|e| io_error(action, e))
}

/// Lowercase ASCII slug of a name, `group` when nothing survives.
fn slug(key: &str) -> String {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    let non_word = NON_WORD.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("valid slug pattern"));

    let lowered = key.to_ascii_lowercase();
    let slug = non_word.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "group".to_string()
    } else {
        slug.to_string()
    }
}

/// Error payload shaped like the real platform's, so callers humanize it the same way.
fn platform_error(title: &str, message: &str) -> RemoteError {
    let body = serde_json::json!({
        "error": {
            "message": format!("{}: {}", title, message),
            "error_user_title": title,
            "error_user_msg": message,
        }
    });
    RemoteError::new(body.to_string())
}

fn io_error(action: &str, e: std::io::Error) -> RemoteError {
    platform_error("Storage error", &format!("{} failed: {}", action, e))
}
