//! HTTP inbound adapter.
//!
//! Clients upload a batch as a multipart form, then follow it through
//! server-sent events or by polling its status.

mod batches;
pub mod upload;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use super::events::EventHub;
use crate::application::TaskOrchestrator;
use crate::domain::creative::CreativeTemplate;
use crate::error::OrchestratorError;
use crate::ports::platform::AdPlatform;

/// How often an event stream checks whether its batch is still in flight.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

pub struct AppState<P> {
    pub orchestrator: TaskOrchestrator<P>,
    pub event_hub: Arc<EventHub>,
    /// Uploaded batches are staged in fresh directories below this one.
    pub staging_root: PathBuf,
    /// Base of every batch's creative.
    pub creative_defaults: Arc<CreativeTemplate>,
}

impl<P> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            event_hub: self.event_hub.clone(),
            staging_root: self.staging_root.clone(),
            creative_defaults: self.creative_defaults.clone(),
        }
    }
}

pub fn router<P>(state: AppState<P>) -> Router
where
    P: AdPlatform + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/batches", post(batches::create::<P>))
        .route(
            "/batches/:task_id",
            get(batches::status::<P>).delete(batches::cancel::<P>),
        )
        .route("/batches/:task_id/events", get(batches::events::<P>))
        .layer(cors)
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Error body returned by every handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let status = match &err {
            OrchestratorError::DuplicateTask(_) => StatusCode::CONFLICT,
            OrchestratorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::CampaignNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
