//! Error types for skiff-core.

use crate::session::MachineId;
use thiserror::Error;

/// Result type alias for skiff-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur during session and registry operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Ordering or state error from the lifecycle layer
    #[error("lifecycle error: {0}")]
    Vm(#[from] skiff_vm::TransitionError),

    /// Configuration error from the validation layer
    #[error("configuration error: {0}")]
    Config(#[from] skiff_vm::ValidationError),

    /// No session registered under the given ID
    #[error("machine not found: {0}")]
    NotFound(MachineId),

    /// The registry is at capacity
    #[error("machine limit reached ({0})")]
    LimitReached(usize),

    /// The tag names no live, mutation-capable device right now
    #[error("device not available: {tag:?}")]
    DeviceUnavailable {
        /// Tag the lookup used
        tag: String,
    },
}
