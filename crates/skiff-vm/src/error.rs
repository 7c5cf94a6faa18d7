//! Error types for skiff-vm.

use crate::controller::LifecycleState;
use crate::device::{DeviceKind, StorageHandle};
use thiserror::Error;

/// Errors detected while assembling or validating a configuration.
///
/// All of these surface before any platform interaction and are recoverable
/// by editing the configuration and retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// No boot device was configured
    #[error("no boot device configured")]
    MissingBootDevice,

    /// A second descriptor was added for a singleton device class
    #[error("duplicate {0} device: at most one is allowed")]
    DuplicateSingletonDevice(DeviceKind),

    /// A device tag repeats within the configuration
    #[error("duplicate device tag: {0:?}")]
    DuplicateTag(String),

    /// Two storage descriptors reference the same backing store
    #[error("storage handle {0} attached more than once")]
    StorageHandleCollision(StorageHandle),

    /// A resource value is out of range
    #[error("invalid resource value: {0}")]
    InvalidResourceValue(String),

    /// A descriptor violates its per-type rules
    #[error("invalid {kind} device: {reason}")]
    InvalidDevice {
        /// Device class the descriptor belongs to
        kind: DeviceKind,
        /// What rule it violates
        reason: String,
    },
}

/// Ordering and state errors reported synchronously at the offending call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// `load` was called on a controller that already holds a configuration
    #[error("controller is already configured")]
    AlreadyConfigured,

    /// The operation is not legal in the current state
    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        /// Operation that was attempted
        operation: &'static str,
        /// State the controller was in
        state: LifecycleState,
    },

    /// Another lifecycle operation is already in flight
    #[error("another lifecycle operation is in progress")]
    OperationInProgress,

    /// The runtime device handle outlived the machine's running period
    #[error("runtime device handle has expired")]
    HandleExpired,

    /// Requested balloon target is outside the configured allocation
    #[error("invalid balloon target: {requested} bytes (limit {limit})")]
    InvalidTargetMemory {
        /// Requested target in bytes
        requested: u64,
        /// The configuration's original memory size
        limit: u64,
    },
}

/// Opaque failure surfaced by the host virtualization platform.
///
/// Platform errors raised during an asynchronous transition are captured
/// into [`LifecycleState::Failed`] rather than returned to the caller; the
/// reason string is what the presentation layer is expected to display.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct PlatformError {
    /// Human-readable failure description
    pub reason: String,
}

impl PlatformError {
    /// Create a platform error from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
