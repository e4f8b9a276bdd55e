//! Monolith Binary - Local deployment
//!
//! Wires up:
//! - Local adapters (tokio subprocesses, filesystem ad platform sandbox)
//! - Event hub plus a listener mirroring events into the log
//! - Batch orchestrator
//! - HTTP inbound adapter

use adpilot::adapters::local::{events, http, EventHub, FsPlatform, TokioLauncher};
use adpilot::config::{PipelineConfig, ServerConfig};
use adpilot::{logging, TaskOrchestrator};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    logging::init();

    let server = ServerConfig::from_env();
    let pipeline = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    // 1. Adapters (Local implementations)
    let platform = Arc::new(FsPlatform::new(&server.platform_dir));
    let launcher = Arc::new(TokioLauncher::new());

    // 2. Event System
    let event_hub = Arc::new(EventHub::new());
    events::listener::start(event_hub.clone());

    // 3. Application Services
    let staging_root = pipeline.scratch_root.join("uploads");
    let orchestrator = match TaskOrchestrator::new(
        platform,
        launcher,
        event_hub.clone(),
        pipeline,
    ) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!(error = %e, "cannot start orchestrator");
            std::process::exit(1);
        }
    };

    // 4. HTTP Layer
    let app = http::router(http::AppState {
        orchestrator,
        event_hub,
        staging_root,
        creative_defaults: Arc::new(server.creative_defaults.clone()),
    });

    // 5. Start Server
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", server.addr, server.port))
        .await
        .expect("Failed to bind TCP listener");
    info!(addr = %server.addr, port = %server.port, platform_dir = %server.platform_dir.display(), "listening");
    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
