//! Configuration assembly and validation.
//!
//! A [`ConfigurationBuilder`] accumulates device descriptors and resource
//! limits, rejecting duplicates as they are added. [`RawConfiguration`]
//! is the accumulated form; [`RawConfiguration::validate`] runs the
//! cross-device invariant checks and freezes the result into an immutable,
//! single-use [`ValidatedConfiguration`]. Validation is pure: nothing here
//! touches the host platform.

use crate::device::{
    BalloonDescriptor, BootDescriptor, ConsoleDescriptor, DeviceDescriptor, DeviceKind,
    DirectoryShareDescriptor, GraphicsDescriptor, InputDescriptor, InputKind, NetworkDescriptor,
    StorageDescriptor,
};
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Smallest memory size the platform will accept, in bytes (64 MiB).
pub const MIN_MEMORY_BYTES: u64 = 64 * 1024 * 1024;

/// Resources used when the builder is not told otherwise.
pub const DEFAULT_CPU_COUNT: u32 = 2;

/// Default guest memory size in bytes (1 GiB).
pub const DEFAULT_MEMORY_BYTES: u64 = 1024 * 1024 * 1024;

/// Deadline applied to each asynchronous start/stop transition.
///
/// The platform gives no inherent deadline, so one is always carried in the
/// configuration; a transition still in flight when it elapses lands the
/// machine in a failed state.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Accumulated, not-yet-validated machine configuration.
///
/// Device buckets keep insertion order per kind. The boot and graphics
/// buckets are sequences here so that invariant violations in hand-built
/// configurations are still caught by [`validate`](Self::validate); the
/// builder refuses to create them in the first place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfiguration {
    /// Number of virtual CPUs
    pub cpu_count: u32,
    /// Guest memory size in bytes
    pub memory_size_bytes: u64,
    /// Deadline for each start/stop transition
    pub operation_timeout: Duration,
    /// Boot loader (exactly one required to validate)
    pub boot: Vec<BootDescriptor>,
    /// Block storage devices
    pub storage: Vec<StorageDescriptor>,
    /// Network devices
    pub network: Vec<NetworkDescriptor>,
    /// Graphics scanouts (at most one)
    pub graphics: Vec<GraphicsDescriptor>,
    /// Input devices
    pub input: Vec<InputDescriptor>,
    /// Console ports
    pub console: Vec<ConsoleDescriptor>,
    /// Shared directories
    pub directory_shares: Vec<DirectoryShareDescriptor>,
    /// Memory balloons
    pub balloons: Vec<BalloonDescriptor>,
}

impl Default for RawConfiguration {
    fn default() -> Self {
        Self {
            cpu_count: DEFAULT_CPU_COUNT,
            memory_size_bytes: DEFAULT_MEMORY_BYTES,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            boot: Vec::new(),
            storage: Vec::new(),
            network: Vec::new(),
            graphics: Vec::new(),
            input: Vec::new(),
            console: Vec::new(),
            directory_shares: Vec::new(),
            balloons: Vec::new(),
        }
    }
}

impl RawConfiguration {
    /// All tags carried by tagged devices, in insertion order.
    fn tags(&self) -> impl Iterator<Item = &str> + '_ {
        self.directory_shares
            .iter()
            .map(|share| share.tag.as_str())
            .chain(self.balloons.iter().map(|balloon| balloon.tag.as_str()))
    }

    fn has_input(&self, kind: InputKind) -> bool {
        self.input.iter().any(|input| input.kind == kind)
    }

    /// Run the cross-device invariant checks and freeze the configuration.
    ///
    /// Checks run in a fixed order so the reported violation is
    /// deterministic: boot presence and singleton rules first, then storage
    /// handle collisions, then tag uniqueness, then resource values, then
    /// per-device rules. The first violation is returned; nothing partial.
    ///
    /// A graphics device without both a keyboard and a pointer is accepted
    /// but logged at warn level: the machine boots, it is just unusable
    /// interactively until the guest is reached some other way.
    ///
    /// # Errors
    /// Returns the first violated invariant.
    pub fn validate(self) -> Result<ValidatedConfiguration, ValidationError> {
        if self.boot.len() > 1 {
            return Err(ValidationError::DuplicateSingletonDevice(DeviceKind::Boot));
        }
        if self.boot.is_empty() {
            return Err(ValidationError::MissingBootDevice);
        }
        if self.graphics.len() > 1 {
            return Err(ValidationError::DuplicateSingletonDevice(
                DeviceKind::Graphics,
            ));
        }

        let mut handles = HashSet::new();
        for storage in &self.storage {
            if !handles.insert(storage.handle) {
                return Err(ValidationError::StorageHandleCollision(storage.handle));
            }
        }

        let mut tags = HashSet::new();
        for tag in self.tags() {
            if !tags.insert(tag) {
                return Err(ValidationError::DuplicateTag(tag.to_string()));
            }
        }

        check_resources(self.cpu_count, self.memory_size_bytes)?;
        check_timeout(self.operation_timeout)?;

        for device in self.devices() {
            device.validate()?;
        }

        if !self.graphics.is_empty()
            && !(self.has_input(InputKind::Keyboard) && self.has_input(InputKind::Pointer))
        {
            tracing::warn!(
                "graphics device configured without keyboard and pointer; \
                 the display will not be interactively usable"
            );
        }

        Ok(ValidatedConfiguration { raw: self })
    }

    /// Iterate every descriptor, grouped by kind in insertion order.
    fn devices(&self) -> impl Iterator<Item = DeviceDescriptor> + '_ {
        let boot = self.boot.iter().cloned().map(DeviceDescriptor::Boot);
        let storage = self.storage.iter().cloned().map(DeviceDescriptor::Storage);
        let network = self.network.iter().cloned().map(DeviceDescriptor::Network);
        let graphics = self.graphics.iter().cloned().map(DeviceDescriptor::Graphics);
        let input = self.input.iter().cloned().map(DeviceDescriptor::Input);
        let console = self.console.iter().cloned().map(DeviceDescriptor::Console);
        let shares = self
            .directory_shares
            .iter()
            .cloned()
            .map(DeviceDescriptor::DirectoryShare);
        let balloons = self
            .balloons
            .iter()
            .cloned()
            .map(DeviceDescriptor::MemoryBalloon);
        boot.chain(storage)
            .chain(network)
            .chain(graphics)
            .chain(input)
            .chain(console)
            .chain(shares)
            .chain(balloons)
    }
}

fn check_resources(cpu_count: u32, memory_size_bytes: u64) -> Result<(), ValidationError> {
    if cpu_count == 0 {
        return Err(ValidationError::InvalidResourceValue(
            "cpu_count must be positive".into(),
        ));
    }
    if memory_size_bytes < MIN_MEMORY_BYTES {
        return Err(ValidationError::InvalidResourceValue(format!(
            "memory_size_bytes must be at least {MIN_MEMORY_BYTES}, got {memory_size_bytes}"
        )));
    }
    Ok(())
}

fn check_timeout(timeout: Duration) -> Result<(), ValidationError> {
    if timeout.is_zero() {
        return Err(ValidationError::InvalidResourceValue(
            "operation_timeout must be positive".into(),
        ));
    }
    Ok(())
}

/// Accumulates device descriptors and resource limits for one machine.
///
/// Duplicate singleton devices, repeated tags, per-type rule violations,
/// and out-of-range resource values are rejected at the call that
/// introduces them, leaving the builder untouched so the caller can fix
/// the input and continue.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationBuilder {
    raw: RawConfiguration,
}

impl ConfigurationBuilder {
    /// Create a builder with default resources and no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a device descriptor to its kind's bucket.
    ///
    /// # Errors
    /// [`ValidationError::DuplicateSingletonDevice`] on a second boot or
    /// graphics descriptor, [`ValidationError::DuplicateTag`] on a repeated
    /// tag, [`ValidationError::InvalidDevice`] when per-type rules fail.
    pub fn add_device(&mut self, device: DeviceDescriptor) -> Result<(), ValidationError> {
        device.validate()?;

        if let Some(tag) = device.tag() {
            if self.raw.tags().any(|existing| existing == tag) {
                return Err(ValidationError::DuplicateTag(tag.to_string()));
            }
        }

        match device {
            DeviceDescriptor::Boot(boot) => {
                if !self.raw.boot.is_empty() {
                    return Err(ValidationError::DuplicateSingletonDevice(DeviceKind::Boot));
                }
                self.raw.boot.push(boot);
            }
            DeviceDescriptor::Graphics(graphics) => {
                if !self.raw.graphics.is_empty() {
                    return Err(ValidationError::DuplicateSingletonDevice(
                        DeviceKind::Graphics,
                    ));
                }
                self.raw.graphics.push(graphics);
            }
            DeviceDescriptor::Storage(storage) => self.raw.storage.push(storage),
            DeviceDescriptor::Network(network) => self.raw.network.push(network),
            DeviceDescriptor::Input(input) => self.raw.input.push(input),
            DeviceDescriptor::Console(console) => self.raw.console.push(console),
            DeviceDescriptor::DirectoryShare(share) => self.raw.directory_shares.push(share),
            DeviceDescriptor::MemoryBalloon(balloon) => self.raw.balloons.push(balloon),
        }
        Ok(())
    }

    /// Set the CPU count and memory size.
    ///
    /// # Errors
    /// [`ValidationError::InvalidResourceValue`] if the CPU count is zero or
    /// the memory size is below [`MIN_MEMORY_BYTES`]; the builder keeps its
    /// previous values on failure.
    pub fn set_resources(
        &mut self,
        cpu_count: u32,
        memory_size_bytes: u64,
    ) -> Result<(), ValidationError> {
        check_resources(cpu_count, memory_size_bytes)?;
        self.raw.cpu_count = cpu_count;
        self.raw.memory_size_bytes = memory_size_bytes;
        Ok(())
    }

    /// Set the deadline for each asynchronous start/stop transition.
    ///
    /// # Errors
    /// [`ValidationError::InvalidResourceValue`] on a zero duration.
    pub fn set_operation_timeout(&mut self, timeout: Duration) -> Result<(), ValidationError> {
        check_timeout(timeout)?;
        self.raw.operation_timeout = timeout;
        Ok(())
    }

    /// Validate the accumulated configuration and freeze it.
    ///
    /// # Errors
    /// The first violated invariant, in the order documented on
    /// [`RawConfiguration::validate`].
    pub fn validate(self) -> Result<ValidatedConfiguration, ValidationError> {
        self.raw.validate()
    }
}

/// An immutable, invariant-checked machine configuration.
///
/// Single-use by construction: [`LifecycleController::load`] takes it by
/// value, so one validated configuration can instantiate exactly one
/// machine. Only [`RawConfiguration::validate`] creates these; persisted
/// configurations are stored raw and re-validated on load.
///
/// [`LifecycleController::load`]: crate::LifecycleController::load
#[derive(Debug, Serialize)]
pub struct ValidatedConfiguration {
    raw: RawConfiguration,
}

impl ValidatedConfiguration {
    /// Number of virtual CPUs.
    pub fn cpu_count(&self) -> u32 {
        self.raw.cpu_count
    }

    /// Guest memory size in bytes.
    pub fn memory_size_bytes(&self) -> u64 {
        self.raw.memory_size_bytes
    }

    /// Deadline for each start/stop transition.
    pub fn operation_timeout(&self) -> Duration {
        self.raw.operation_timeout
    }

    /// The boot descriptor.
    pub fn boot(&self) -> &BootDescriptor {
        // validate() guarantees exactly one
        &self.raw.boot[0]
    }

    /// Storage descriptors in insertion order.
    pub fn storage(&self) -> &[StorageDescriptor] {
        &self.raw.storage
    }

    /// Network descriptors in insertion order.
    pub fn network(&self) -> &[NetworkDescriptor] {
        &self.raw.network
    }

    /// The graphics descriptor, if one was configured.
    pub fn graphics(&self) -> Option<&GraphicsDescriptor> {
        self.raw.graphics.first()
    }

    /// Input descriptors in insertion order.
    pub fn input(&self) -> &[InputDescriptor] {
        &self.raw.input
    }

    /// Console descriptors in insertion order.
    pub fn console(&self) -> &[ConsoleDescriptor] {
        &self.raw.console
    }

    /// Directory-share descriptors in insertion order.
    pub fn directory_shares(&self) -> &[DirectoryShareDescriptor] {
        &self.raw.directory_shares
    }

    /// Balloon descriptors in insertion order.
    pub fn balloons(&self) -> &[BalloonDescriptor] {
        &self.raw.balloons
    }

    /// The underlying raw form, for handing to the platform.
    pub fn raw(&self) -> &RawConfiguration {
        &self.raw
    }
}
