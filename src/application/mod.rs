//! Application layer - batch orchestration on top of the ports.

pub mod cancellation;
pub mod executor;
pub mod orchestrator;
pub mod processes;
pub mod progress;
pub mod retry;
pub mod runner;

pub use orchestrator::{BatchRequest, BatchTicket, TaskOrchestrator};
