//! Local adapters for single-server deployment.

pub mod events;
pub mod fs;
#[cfg(feature = "local")]
pub mod http;
pub mod process;

pub use events::EventHub;
pub use fs::FsPlatform;
pub use process::TokioLauncher;
