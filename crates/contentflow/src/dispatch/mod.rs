//! Per-step queue consumers.

pub mod dispatcher;
pub mod error;

pub use dispatcher::{DispatchOutcome, QueueDispatchLoop};
pub use error::DispatchError;
