//! Runtime device handles - live mutation of a running machine's devices.
//!
//! A handle is a transient, non-owning reference resolved by tag through
//! [`LifecycleController::device_handle`]. It is valid only while the
//! controller is in the running state; any transition out of running
//! expires every outstanding handle. Memory balloons are the only device
//! kind that supports live mutation - everything else is immutable once
//! validation has passed, because the platform cannot reconfigure storage,
//! network, or graphics devices on a live machine.
//!
//! [`LifecycleController::device_handle`]: crate::LifecycleController::device_handle

use crate::controller::{LifecycleState, Observed};
use crate::device::DeviceKind;
use crate::error::TransitionError;
use crate::platform::{Platform, PlatformDeviceRef};
use std::sync::Arc;

/// Non-owning reference to a live, mutation-capable device.
pub struct RuntimeDeviceHandle {
    tag: String,
    device: PlatformDeviceRef,
    memory_limit: u64,
    platform: Arc<dyn Platform>,
    observed: Arc<Observed>,
}

impl RuntimeDeviceHandle {
    pub(crate) fn new(
        tag: String,
        device: PlatformDeviceRef,
        memory_limit: u64,
        platform: Arc<dyn Platform>,
        observed: Arc<Observed>,
    ) -> Self {
        Self {
            tag,
            device,
            memory_limit,
            platform,
            observed,
        }
    }

    /// The tag this handle was resolved from.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The device class behind this handle.
    pub fn kind(&self) -> DeviceKind {
        DeviceKind::MemoryBalloon
    }

    /// Whether the handle still refers to a live device.
    ///
    /// Handles expire the instant the owning controller leaves the running
    /// state; the platform-side object may be gone even if this returns
    /// true a moment later, which is why mutations re-check.
    pub fn is_valid(&self) -> bool {
        self.observed.state() == LifecycleState::Running
    }

    /// Retarget the balloon's memory claim.
    ///
    /// The platform request is dispatched without blocking the caller and
    /// takes effect asynchronously inside the guest; the lifecycle state
    /// is never touched. A platform-side failure of the dispatched request
    /// is logged at warn level - it cannot affect lifecycle correctness.
    ///
    /// # Errors
    /// [`TransitionError::InvalidTargetMemory`] if `bytes` is zero or
    /// exceeds the configuration's original memory size;
    /// [`TransitionError::HandleExpired`] if the machine is no longer
    /// running.
    pub fn set_target_memory(&self, bytes: u64) -> Result<(), TransitionError> {
        if bytes == 0 || bytes > self.memory_limit {
            return Err(TransitionError::InvalidTargetMemory {
                requested: bytes,
                limit: self.memory_limit,
            });
        }
        if !self.is_valid() {
            return Err(TransitionError::HandleExpired);
        }

        tracing::debug!(tag = %self.tag, bytes, "Retargeting memory balloon");
        let platform = Arc::clone(&self.platform);
        let device = self.device;
        let tag = self.tag.clone();
        tokio::spawn(async move {
            if let Err(e) = platform.set_balloon_target(device, bytes).await {
                tracing::warn!(tag = %tag, error = %e, "Balloon retarget failed");
            }
        });
        Ok(())
    }
}
