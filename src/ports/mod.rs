//! Ports - the collaborators the orchestration core talks to.

pub mod events;
pub mod platform;
pub mod process;
