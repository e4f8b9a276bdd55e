//! In-process event transport.

pub mod hub;
pub mod listener;

pub use hub::EventHub;
