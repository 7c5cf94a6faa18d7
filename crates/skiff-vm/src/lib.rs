//! # skiff-vm
//!
//! Configuration and lifecycle layer for a single virtual machine on a
//! host-provided virtualization platform.
//!
//! The crate does two things: it assembles device descriptors and resource
//! limits into one internally-consistent [`ValidatedConfiguration`], and it
//! drives the machine built from that configuration through its lifecycle
//! (configured, starting, running, stopping, stopped or failed) with
//! explicit handling of which operations are legal in which state. The
//! hypervisor itself sits behind the [`Platform`] trait; this crate only
//! issues configuration, start, stop, and runtime-mutation requests to it
//! and observes what it reports back.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use skiff_vm::{
//!     BootDescriptor, ConfigurationBuilder, DeviceDescriptor, LifecycleController,
//!     LifecycleState, Platform, StorageDescriptor, StorageHandle,
//! };
//!
//! # async fn example(platform: Arc<dyn Platform>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = ConfigurationBuilder::new();
//! builder.set_resources(4, 8 * 1024 * 1024 * 1024)?;
//! builder.add_device(DeviceDescriptor::Boot(BootDescriptor::new(
//!     "/var/lib/skiff/efi-vars.bin",
//!     true,
//! )))?;
//! builder.add_device(DeviceDescriptor::Storage(StorageDescriptor::new(
//!     StorageHandle::from_raw(4),
//!     false,
//! )))?;
//! let config = builder.validate()?;
//!
//! let controller = LifecycleController::new(platform);
//! controller.load(config)?;
//! controller.start().await?;
//! assert_eq!(controller.current_state(), LifecycleState::Running);
//!
//! controller.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Declarative devices**: boot, storage, network, graphics, input,
//!   console, directory shares, and memory balloon as typed descriptors
//! - **Pure validation**: duplicate and resource invariants checked without
//!   touching the platform, with a deterministic violation order
//! - **Lifecycle state machine**: serialized start/stop with captured
//!   platform failures instead of propagated faults
//! - **Live mutation**: balloon memory retargeting on a running machine via
//!   tag-resolved runtime handles

mod config;
mod controller;
mod device;
mod error;
mod platform;
mod runtime;

pub use config::{
    ConfigurationBuilder, RawConfiguration, ValidatedConfiguration, DEFAULT_CPU_COUNT,
    DEFAULT_MEMORY_BYTES, DEFAULT_OPERATION_TIMEOUT, MIN_MEMORY_BYTES,
};
pub use controller::{LifecycleController, LifecycleState};
pub use device::{
    BalloonDescriptor, BootDescriptor, ConsoleDescriptor, DeviceDescriptor, DeviceKind,
    DirectoryShareDescriptor, GraphicsDescriptor, InputDescriptor, InputKind, NetworkAttachment,
    NetworkDescriptor, StorageDescriptor, StorageHandle, SyncMode,
};
pub use error::{PlatformError, TransitionError, ValidationError};
pub use platform::{DisplaySurface, MachineHandle, Platform, PlatformDeviceRef, PlatformState};
pub use runtime::RuntimeDeviceHandle;
