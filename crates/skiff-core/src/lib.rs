//! # skiff-core
//!
//! Session and registry layer over [`skiff_vm`].
//!
//! This crate is the owning context the presentation layer talks to: each
//! machine gets exactly one [`MachineSession`] (identity, timestamps, and
//! the lifecycle controller), and a [`MachineManager`] keeps the sessions
//! it created until they are destroyed. There are no ambient machine
//! references; ownership is explicit all the way down.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     skiff-core (host)                    │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │ MachineManager  │────▶│  HashMap<MachineId,      │    │
//! │  │   - create()    │     │          MachineSession> │    │
//! │  │   - start()     │     └──────────────────────────┘    │
//! │  │   - destroy()   │                                     │
//! │  └─────────────────┘                                     │
//! │           │                                              │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │ MachineSession  │────▶│  LifecycleController     │    │
//! │  │  - start/stop   │     │  (from skiff-vm)         │    │
//! │  │  - retarget     │     └──────────────────────────┘    │
//! │  │  - display      │                │                    │
//! │  └─────────────────┘                ▼                    │
//! │                          ┌──────────────────────────┐    │
//! │                          │  Platform trait          │    │
//! │                          │  (host virtualization)   │    │
//! │                          └──────────────────────────┘    │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use skiff_core::MachineManager;
//! use skiff_vm::{BootDescriptor, ConfigurationBuilder, DeviceDescriptor, Platform};
//!
//! # async fn example(platform: Arc<dyn Platform>) -> skiff_core::Result<()> {
//! let manager = MachineManager::new(platform);
//!
//! let mut builder = ConfigurationBuilder::new();
//! builder.set_resources(4, 8 * 1024 * 1024 * 1024)?;
//! builder.add_device(DeviceDescriptor::Boot(BootDescriptor::new(
//!     "/var/lib/skiff/efi-vars.bin",
//!     true,
//! )))?;
//! let config = builder.validate()?;
//!
//! let id = manager.create(config).await?;
//! let state = manager.start(id).await?;
//! println!("machine {id} is {state}");
//!
//! manager.destroy(id).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod manager;
mod session;

pub use error::{CoreError, Result};
pub use manager::{MachineManager, DEFAULT_MAX_MACHINES};
pub use session::{MachineId, MachineSession};
