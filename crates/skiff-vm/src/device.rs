//! Device descriptors for virtual machine configurations.
//!
//! Each descriptor is a declarative description of one virtual hardware
//! component. Descriptors carry no behavior beyond per-type validation;
//! cross-device invariants live in the configuration builder.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The configurable device classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Boot loader and firmware variable store
    Boot,
    /// Block storage device
    Storage,
    /// Network device
    Network,
    /// Graphics scanout
    Graphics,
    /// Keyboard or pointing device
    Input,
    /// Console port (clipboard sharing)
    Console,
    /// Shared host directory
    DirectoryShare,
    /// Memory balloon
    MemoryBalloon,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "boot"),
            Self::Storage => write!(f, "storage"),
            Self::Network => write!(f, "network"),
            Self::Graphics => write!(f, "graphics"),
            Self::Input => write!(f, "input"),
            Self::Console => write!(f, "console"),
            Self::DirectoryShare => write!(f, "directory-share"),
            Self::MemoryBalloon => write!(f, "memory-balloon"),
        }
    }
}

/// Identity token for an already-opened storage backing store.
///
/// The core never opens disk images or devices itself; the owning context
/// opens the backing store and passes its raw identity (e.g. a file
/// descriptor number) through. Two descriptors carrying the same token
/// would double-attach one backing store, which validation rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageHandle(u64);

impl StorageHandle {
    /// Wrap a raw backing-store identity.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw identity value.
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Write synchronization mode for a storage device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Writes reach durable storage before completion is reported
    #[default]
    Full,
    /// Writes are flushed with fsync semantics
    Fsync,
}

/// How a network device attaches to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkAttachment {
    /// Address-translated access through the host's connection
    Nat,
    /// Bridged onto a host interface
    Bridged {
        /// Name of the host interface to bridge onto
        host_interface: String,
    },
}

/// Kind of input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputKind {
    /// Keyboard
    Keyboard,
    /// Pointing device
    Pointer,
}

/// Boot loader configuration.
///
/// The firmware variable store is created fresh at the given path on each
/// configuration; the path and overwrite policy are passed through to the
/// platform untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootDescriptor {
    /// Where the firmware variable store lives
    pub variable_store_path: PathBuf,
    /// Whether an existing store file may be overwritten
    pub allow_overwrite: bool,
}

impl BootDescriptor {
    /// Create a boot descriptor.
    pub fn new(variable_store_path: impl Into<PathBuf>, allow_overwrite: bool) -> Self {
        Self {
            variable_store_path: variable_store_path.into(),
            allow_overwrite,
        }
    }
}

/// Block storage device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDescriptor {
    /// Identity of the opened backing store
    pub handle: StorageHandle,
    /// Whether the guest sees the device read-only
    pub read_only: bool,
    /// Write synchronization mode
    pub sync_mode: SyncMode,
}

impl StorageDescriptor {
    /// Create a storage descriptor with full synchronization.
    pub fn new(handle: StorageHandle, read_only: bool) -> Self {
        Self {
            handle,
            read_only,
            sync_mode: SyncMode::Full,
        }
    }
}

/// Network device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    /// How the device attaches to the host
    pub attachment: NetworkAttachment,
}

impl NetworkDescriptor {
    /// Create a NAT-attached network device.
    pub fn nat() -> Self {
        Self {
            attachment: NetworkAttachment::Nat,
        }
    }

    /// Create a network device bridged onto a host interface.
    pub fn bridged(host_interface: impl Into<String>) -> Self {
        Self {
            attachment: NetworkAttachment::Bridged {
                host_interface: host_interface.into(),
            },
        }
    }
}

/// Graphics scanout configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphicsDescriptor {
    /// Scanout width in pixels
    pub width_px: u32,
    /// Scanout height in pixels
    pub height_px: u32,
}

impl GraphicsDescriptor {
    /// Create a graphics descriptor.
    pub fn new(width_px: u32, height_px: u32) -> Self {
        Self {
            width_px,
            height_px,
        }
    }
}

/// Input device configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDescriptor {
    /// Kind of input device
    pub kind: InputKind,
}

impl InputDescriptor {
    /// Create a keyboard descriptor.
    pub fn keyboard() -> Self {
        Self {
            kind: InputKind::Keyboard,
        }
    }

    /// Create a pointing-device descriptor.
    pub fn pointer() -> Self {
        Self {
            kind: InputKind::Pointer,
        }
    }
}

/// Console port configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleDescriptor {
    /// Whether the port shares the host clipboard with the guest
    pub clipboard_enabled: bool,
}

impl ConsoleDescriptor {
    /// Create a console descriptor.
    pub fn new(clipboard_enabled: bool) -> Self {
        Self { clipboard_enabled }
    }
}

/// Shared host directory configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryShareDescriptor {
    /// Host directory to expose to the guest
    pub host_path: PathBuf,
    /// Mount tag the guest uses to identify the share
    pub tag: String,
    /// Whether the guest sees the share read-only
    pub read_only: bool,
}

impl DirectoryShareDescriptor {
    /// Create a directory-share descriptor.
    pub fn new(host_path: impl Into<PathBuf>, tag: impl Into<String>, read_only: bool) -> Self {
        Self {
            host_path: host_path.into(),
            tag: tag.into(),
            read_only,
        }
    }
}

/// Memory balloon configuration.
///
/// The tag is the key later used to resolve the live device for runtime
/// target adjustment; it shares one uniqueness domain with directory-share
/// tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalloonDescriptor {
    /// Lookup tag for the live device
    pub tag: String,
}

impl BalloonDescriptor {
    /// Create a balloon descriptor.
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

/// One virtual hardware component to attach to a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceDescriptor {
    /// Boot loader
    Boot(BootDescriptor),
    /// Block storage
    Storage(StorageDescriptor),
    /// Network device
    Network(NetworkDescriptor),
    /// Graphics scanout
    Graphics(GraphicsDescriptor),
    /// Input device
    Input(InputDescriptor),
    /// Console port
    Console(ConsoleDescriptor),
    /// Shared directory
    DirectoryShare(DirectoryShareDescriptor),
    /// Memory balloon
    MemoryBalloon(BalloonDescriptor),
}

impl DeviceDescriptor {
    /// The device class this descriptor belongs to.
    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Boot(_) => DeviceKind::Boot,
            Self::Storage(_) => DeviceKind::Storage,
            Self::Network(_) => DeviceKind::Network,
            Self::Graphics(_) => DeviceKind::Graphics,
            Self::Input(_) => DeviceKind::Input,
            Self::Console(_) => DeviceKind::Console,
            Self::DirectoryShare(_) => DeviceKind::DirectoryShare,
            Self::MemoryBalloon(_) => DeviceKind::MemoryBalloon,
        }
    }

    /// The lookup tag, for the device kinds that carry one.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::DirectoryShare(share) => Some(&share.tag),
            Self::MemoryBalloon(balloon) => Some(&balloon.tag),
            _ => None,
        }
    }

    /// Check the descriptor's per-type rules.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidDevice`] naming the violated rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let reason = match self {
            Self::Boot(boot) if boot.variable_store_path.as_os_str().is_empty() => {
                Some("variable store path is empty".to_string())
            }
            Self::Graphics(gfx) if gfx.width_px == 0 || gfx.height_px == 0 => Some(format!(
                "scanout dimensions must be non-zero, got {}x{}",
                gfx.width_px, gfx.height_px
            )),
            Self::Network(net) => match &net.attachment {
                NetworkAttachment::Bridged { host_interface } if host_interface.is_empty() => {
                    Some("bridged attachment needs a host interface name".to_string())
                }
                _ => None,
            },
            Self::DirectoryShare(share) if share.tag.is_empty() => {
                Some("share tag is empty".to_string())
            }
            Self::DirectoryShare(share) if share.host_path.as_os_str().is_empty() => {
                Some("host path is empty".to_string())
            }
            Self::MemoryBalloon(balloon) if balloon.tag.is_empty() => {
                Some("balloon tag is empty".to_string())
            }
            _ => None,
        };

        match reason {
            Some(reason) => Err(ValidationError::InvalidDevice {
                kind: self.kind(),
                reason,
            }),
            None => Ok(()),
        }
    }
}
