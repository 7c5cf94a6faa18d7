//! Machine manager for lifecycle management of multiple sessions.

use crate::error::CoreError;
use crate::session::{MachineId, MachineSession};
use skiff_vm::{DisplaySurface, LifecycleState, Platform, ValidatedConfiguration};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Sessions a manager will hold unless told otherwise.
pub const DEFAULT_MAX_MACHINES: usize = 16;

/// Manages multiple machine sessions.
///
/// The manager provides a high-level API for creating, driving, and
/// destroying machines by ID. It maintains a registry of active sessions
/// and ensures each is torn down exactly once.
///
/// # Thread Safety
///
/// The manager uses an async RwLock internally and is safe to share across
/// tasks. Multiple readers can drive different sessions concurrently;
/// registration and destruction take exclusive access to the registry.
/// Within one session the lifecycle layer still enforces its single-writer
/// rule, so two tasks driving the same machine get `OperationInProgress`
/// rather than interleaved transitions.
pub struct MachineManager {
    platform: Arc<dyn Platform>,
    sessions: RwLock<HashMap<MachineId, MachineSession>>,
    max_machines: usize,
}

impl MachineManager {
    /// Create a manager with the default session limit.
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self::with_max_machines(platform, DEFAULT_MAX_MACHINES)
    }

    /// Create a manager holding at most `max_machines` sessions
    /// (0 = unlimited).
    pub fn with_max_machines(platform: Arc<dyn Platform>, max_machines: usize) -> Self {
        tracing::info!(max_machines, "Creating machine manager");
        Self {
            platform,
            sessions: RwLock::new(HashMap::new()),
            max_machines,
        }
    }

    /// Register a new machine from a validated configuration.
    ///
    /// The session starts out configured but not booted; booting is an
    /// explicit [`start`](Self::start) so that retrying after a failure
    /// stays a caller decision.
    ///
    /// # Errors
    /// [`CoreError::LimitReached`] at capacity.
    pub async fn create(&self, config: ValidatedConfiguration) -> Result<MachineId, CoreError> {
        if self.max_machines > 0 {
            let current = self.sessions.read().await.len();
            if current >= self.max_machines {
                return Err(CoreError::LimitReached(self.max_machines));
            }
        }

        let session = MachineSession::new(Arc::clone(&self.platform), config)?;
        let id = session.id();

        let mut sessions = self.sessions.write().await;
        sessions.insert(id, session);

        tracing::info!(machine_id = %id, "Machine registered");
        Ok(id)
    }

    /// Boot a machine and report the state it settled in.
    ///
    /// `Failed(reason)` in the returned state is a captured platform
    /// failure, observable but not an `Err`.
    pub async fn start(&self, id: MachineId) -> Result<LifecycleState, CoreError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(CoreError::NotFound(id))?;
        session.start().await
    }

    /// Shut a machine down and report the state it settled in.
    pub async fn stop(&self, id: MachineId) -> Result<LifecycleState, CoreError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(CoreError::NotFound(id))?;
        session.stop().await
    }

    /// A machine's current lifecycle state.
    pub async fn state(&self, id: MachineId) -> Result<LifecycleState, CoreError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(CoreError::NotFound(id))?;
        Ok(session.state())
    }

    /// Reconcile a machine's state against the platform's view.
    pub async fn refresh_state(&self, id: MachineId) -> Result<LifecycleState, CoreError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(CoreError::NotFound(id))?;
        Ok(session.refresh_state())
    }

    /// Retarget a running machine's balloon by tag.
    pub async fn retarget_memory(
        &self,
        id: MachineId,
        tag: &str,
        bytes: u64,
    ) -> Result<(), CoreError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(CoreError::NotFound(id))?;
        session.retarget_memory(tag, bytes)
    }

    /// A machine's display surface, if it is running.
    pub async fn display_attachment(
        &self,
        id: MachineId,
    ) -> Result<Option<DisplaySurface>, CoreError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(CoreError::NotFound(id))?;
        Ok(session.display_attachment())
    }

    /// Check if a machine exists.
    pub async fn exists(&self, id: MachineId) -> bool {
        let sessions = self.sessions.read().await;
        sessions.contains_key(&id)
    }

    /// List all machine IDs.
    pub async fn list(&self) -> Vec<MachineId> {
        let sessions = self.sessions.read().await;
        sessions.keys().copied().collect()
    }

    /// Get the number of registered machines.
    pub async fn count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Destroy a machine, stopping it if it is running.
    pub async fn destroy(&self, id: MachineId) -> Result<(), CoreError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&id).ok_or(CoreError::NotFound(id))?
        };
        session.shutdown().await
    }

    /// Destroy all machines.
    ///
    /// Useful for cleanup during shutdown. Errors during individual
    /// teardown are logged but do not stop the sweep.
    pub async fn destroy_all(&self) -> Result<(), CoreError> {
        let sessions = {
            let mut guard = self.sessions.write().await;
            std::mem::take(&mut *guard)
        };

        let count = sessions.len();
        tracing::info!(count, "Destroying all machines");

        for (id, session) in sessions {
            if let Err(e) = session.shutdown().await {
                tracing::error!(machine_id = %id, error = %e, "Failed to shut down machine");
            }
        }

        Ok(())
    }
}
