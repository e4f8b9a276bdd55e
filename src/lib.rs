//! adpilot - batch media upload orchestration
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (task state, work units, events, media commands)
//! - ports/: Trait definitions (ad platform, process launcher, event sink)
//! - adapters/: Concrete implementations (tokio processes, broadcast hub, filesystem sandbox, HTTP)
//! - application/: Cancellation, process tracking, retries, progress and the orchestrator
//! - config: Environment configuration
//!
//! # Features
//! - `local`: HTTP surface and the `monolith` binary

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod ports;

// Re-exports for convenience
pub use application::{BatchRequest, BatchTicket, TaskOrchestrator};
pub use config::PipelineConfig;

#[cfg(feature = "local")]
pub use config::ServerConfig;
