//! Domain layer - Pure business logic.

pub mod campaign;
pub mod catalog;
pub mod creative;
pub mod events;
pub mod media;
pub mod normalize;
pub mod remote_error;
pub mod task;
pub mod work;
