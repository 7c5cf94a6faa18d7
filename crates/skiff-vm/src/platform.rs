//! The host virtualization platform boundary.
//!
//! Everything the lifecycle layer needs from the hypervisor is expressed
//! here as one capability trait over opaque tokens. The engine that
//! actually executes guest code lives behind this trait; tests drive the
//! state machine with a mock implementation.

use crate::config::RawConfiguration;
use crate::error::PlatformError;
use async_trait::async_trait;
use std::fmt;

/// Opaque reference to an instantiated machine on the platform.
///
/// Minted by [`Platform::instantiate`]; meaningful only to the platform
/// that produced it. Exclusively owned by one lifecycle controller, which
/// issues [`Platform::release`] exactly once when it reaches a terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MachineHandle(u64);

impl MachineHandle {
    /// Wrap a platform-minted token.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw token value.
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MachineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a live device inside a running machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformDeviceRef(u64);

impl PlatformDeviceRef {
    /// Wrap a platform-minted token.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw token value.
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

/// Opaque reference to a machine's display surface.
///
/// The presentation layer attaches its view to this; the core hands it
/// through without interpreting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplaySurface(u64);

impl DisplaySurface {
    /// Wrap a platform-minted token.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw token value.
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

/// Machine state as the platform reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformState {
    /// Not running
    Stopped,
    /// Boot in progress
    Starting,
    /// Executing guest code
    Running,
    /// Shutdown in progress
    Stopping,
    /// The machine hit an error the platform could not recover from
    Error(String),
}

/// Capability surface the lifecycle layer consumes from the hypervisor.
///
/// `start`, `stop`, and `set_balloon_target` are asynchronous; the rest
/// answer immediately from platform-side bookkeeping. Implementations must
/// be safe to call from multiple tasks: the lifecycle layer serializes
/// mutating calls per machine but observation can come from anywhere.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Platform-side validation of a configuration.
    ///
    /// Runs after the core's own invariant checks pass; catches constraints
    /// only the platform knows about (host resource limits, unsupported
    /// device combinations).
    fn validate(&self, config: &RawConfiguration) -> Result<(), PlatformError>;

    /// Create a machine from a validated configuration.
    fn instantiate(&self, config: &RawConfiguration) -> Result<MachineHandle, PlatformError>;

    /// Boot the machine; resolves when the guest is running.
    async fn start(&self, machine: MachineHandle) -> Result<(), PlatformError>;

    /// Whether the machine can currently be asked to stop.
    ///
    /// A machine that has not finished booting or is already tearing down
    /// cannot be force-stopped safely; the platform reports that here.
    fn can_stop(&self, machine: MachineHandle) -> bool;

    /// Request shutdown; resolves when the platform confirms the stop.
    async fn stop(&self, machine: MachineHandle) -> Result<(), PlatformError>;

    /// The machine state as the platform currently sees it.
    fn observed_state(&self, machine: MachineHandle) -> PlatformState;

    /// Resolve a configured device tag to its live platform-side device.
    ///
    /// Returns `None` for tags the platform does not know or devices that
    /// no longer exist.
    fn resolve_device(&self, machine: MachineHandle, tag: &str) -> Option<PlatformDeviceRef>;

    /// Retarget a memory balloon's claim, in bytes.
    ///
    /// Takes effect asynchronously inside the guest.
    async fn set_balloon_target(
        &self,
        device: PlatformDeviceRef,
        bytes: u64,
    ) -> Result<(), PlatformError>;

    /// The machine's display surface, if it has one right now.
    fn display_surface(&self, machine: MachineHandle) -> Option<DisplaySurface>;

    /// Request platform-side teardown of the machine.
    ///
    /// Called exactly once per machine, when its controller reaches a
    /// terminal state.
    fn release(&self, machine: MachineHandle);
}
