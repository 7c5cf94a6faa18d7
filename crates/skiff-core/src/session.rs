//! Machine session - one machine's owning context.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use skiff_vm::{
    DisplaySurface, LifecycleController, LifecycleState, Platform, RuntimeDeviceHandle,
    ValidatedConfiguration,
};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a machine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MachineId(Uuid);

impl MachineId {
    /// Create a new random machine ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MachineId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MachineId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// One machine and the context that owns it.
///
/// A session binds an identity and a creation timestamp to exactly one
/// [`LifecycleController`]; constructing it consumes the validated
/// configuration, so a session maps one-to-one onto one machine. There is
/// no ambient machine reference anywhere - whoever holds the session owns
/// the machine, and dropping the session after [`shutdown`](Self::shutdown)
/// ends it.
pub struct MachineSession {
    id: MachineId,
    controller: LifecycleController,
    created_at: DateTime<Utc>,
}

impl MachineSession {
    /// Create a session holding a configured, not-yet-started machine.
    ///
    /// # Errors
    /// Propagates the lifecycle layer's rejection if the controller cannot
    /// accept the configuration.
    pub fn new(
        platform: Arc<dyn Platform>,
        config: ValidatedConfiguration,
    ) -> Result<Self, CoreError> {
        let id = MachineId::new();
        let controller = LifecycleController::new(platform);
        controller.load(config)?;
        tracing::info!(machine_id = %id, "Machine session created");
        Ok(Self {
            id,
            controller,
            created_at: Utc::now(),
        })
    }

    /// Get the session ID.
    pub fn id(&self) -> MachineId {
        self.id
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The machine's current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.controller.current_state()
    }

    /// Reconcile the platform's view into the lifecycle state and return it.
    ///
    /// This is how an externally observed crash becomes visible; the
    /// returned `Failed` state carries the reason to display.
    pub fn refresh_state(&self) -> LifecycleState {
        self.controller.refresh_state()
    }

    /// Boot the machine and report the state it settled in.
    ///
    /// A platform failure shows up as `Failed(reason)` in the returned
    /// state, not as an error; the `Err` path is reserved for calls made
    /// from the wrong state or while another transition is in flight.
    pub async fn start(&self) -> Result<LifecycleState, CoreError> {
        self.controller.start().await?;
        Ok(self.state())
    }

    /// Shut the machine down and report the state it settled in.
    pub async fn stop(&self) -> Result<LifecycleState, CoreError> {
        self.controller.stop().await?;
        Ok(self.state())
    }

    /// Resolve a live balloon device by tag.
    pub fn balloon(&self, tag: &str) -> Option<RuntimeDeviceHandle> {
        self.controller.device_handle(tag)
    }

    /// Retarget a balloon's memory claim in one step.
    ///
    /// # Errors
    /// [`CoreError::DeviceUnavailable`] if the tag resolves to no live
    /// device right now; otherwise the lifecycle layer's target validation
    /// errors pass through.
    pub fn retarget_memory(&self, tag: &str, bytes: u64) -> Result<(), CoreError> {
        let handle = self
            .controller
            .device_handle(tag)
            .ok_or_else(|| CoreError::DeviceUnavailable {
                tag: tag.to_string(),
            })?;
        handle.set_target_memory(bytes)?;
        Ok(())
    }

    /// The machine's display surface, for the presentation layer to attach
    /// to. `None` outside the running state.
    pub fn display_attachment(&self) -> Option<DisplaySurface> {
        self.controller.display_attachment()
    }

    /// Tear the session down, stopping the machine if it is running.
    ///
    /// A stop failure is captured in the controller's terminal state and
    /// logged; teardown proceeds regardless.
    pub async fn shutdown(self) -> Result<(), CoreError> {
        tracing::info!(machine_id = %self.id, "Shutting down machine session");
        match self.state() {
            LifecycleState::Running => {
                if let Err(e) = self.controller.stop().await {
                    tracing::warn!(machine_id = %self.id, error = %e, "Stop during shutdown failed");
                }
            }
            state @ (LifecycleState::Starting | LifecycleState::Stopping) => {
                tracing::warn!(
                    machine_id = %self.id,
                    state = %state,
                    "Shutting down with a transition in flight"
                );
            }
            _ => {}
        }
        Ok(())
    }
}
