use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::creative::CreativeTemplate;
use crate::domain::work::CompositeRef;
use crate::error::RemoteError;

/// Remote parent of every container of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignRef(pub String);

/// Remote container shared by every unit of a group (an ad set).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerRef(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHash(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoRef(pub String);

/// Processing state of an uploaded asset on the platform side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Ready,
    Pending,
}

/// Everything needed to create the final object for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeRequest {
    pub container: ContainerRef,
    pub name: String,
    pub image_hash: ImageHash,
    /// Absent for image units.
    pub video: Option<VideoRef>,
    pub creative: CreativeTemplate,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdPlatform: Send + Sync {
    async fn create_campaign(&self, name: &str) -> Result<CampaignRef, RemoteError>;

    /// `Ok(None)` when no campaign with this id exists.
    async fn find_campaign(&self, id: &str) -> Result<Option<CampaignRef>, RemoteError>;

    async fn create_container(
        &self,
        campaign: &CampaignRef,
        group_key: &str,
    ) -> Result<ContainerRef, RemoteError>;

    async fn upload_image(&self, path: &Path) -> Result<ImageHash, RemoteError>;

    async fn upload_video(&self, path: &Path) -> Result<VideoRef, RemoteError>;

    /// Uploaded videos are transcoded asynchronously and cannot be referenced
    /// until this reports `Ready`.
    async fn video_status(&self, video: &VideoRef) -> Result<ReadyState, RemoteError>;

    async fn create_composite(
        &self,
        request: &CompositeRequest,
    ) -> Result<CompositeRef, RemoteError>;
}
