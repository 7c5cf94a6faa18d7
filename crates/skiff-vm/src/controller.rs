//! Lifecycle controller - owns one machine's state and drives it.

use crate::config::ValidatedConfiguration;
use crate::error::TransitionError;
use crate::platform::{DisplaySurface, MachineHandle, Platform, PlatformState};
use crate::runtime::RuntimeDeviceHandle;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Where one machine is in its lifecycle.
///
/// The state is the single source of truth for which operations are
/// currently legal. `Stopped` and `Failed` are terminal; a controller never
/// leaves them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    /// No configuration loaded yet
    Unconfigured,
    /// Configuration loaded, machine not instantiated
    Configured,
    /// Boot requested, awaiting platform readiness
    Starting,
    /// Guest is executing
    Running,
    /// Shutdown requested, awaiting platform confirmation
    Stopping,
    /// Shut down cleanly
    Stopped,
    /// A platform failure was captured; carries the reason to display
    Failed(String),
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfigured => write!(f, "unconfigured"),
            Self::Configured => write!(f, "configured"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Observation shared with runtime device handles.
///
/// Kept apart from the lifecycle gate so state reads and device-handle
/// checks never wait on an in-flight transition.
pub(crate) struct Observed {
    state: RwLock<LifecycleState>,
    machine: RwLock<Option<MachineHandle>>,
}

impl Observed {
    fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Unconfigured),
            machine: RwLock::new(None),
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn machine(&self) -> Option<MachineHandle> {
        *self.machine.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_machine(&self, machine: Option<MachineHandle>) {
        *self
            .machine
            .write()
            .unwrap_or_else(PoisonError::into_inner) = machine;
    }
}

/// State owned by the lifecycle gate: only the task holding the gate may
/// touch it, which is what serializes load/start/stop.
struct Gated {
    config: Option<ValidatedConfiguration>,
}

/// What runtime lookups need from the configuration after load.
struct RuntimeIndex {
    memory_size_bytes: u64,
    balloon_tags: HashSet<String>,
}

/// Owns a validated configuration and drives one machine through its
/// lifecycle.
///
/// ```text
/// Unconfigured --load--> Configured --start--> Starting --ready--> Running
///                                     Starting --failure--> Failed(reason)
/// Running --stop--> Stopping --confirmed--> Stopped
/// Running --crash--> Failed(reason)    Stopping --timeout/error--> Failed
/// ```
///
/// Lifecycle mutations (`load`, `start`, `stop`) are serialized: a call
/// arriving while another is in flight fails with
/// [`TransitionError::OperationInProgress`] instead of queueing. State
/// observation and device-handle lookups are safe from any task at any
/// time. Platform failures never propagate out of `start`/`stop`; they are
/// captured into [`LifecycleState::Failed`] for callers to observe via
/// [`current_state`](Self::current_state).
pub struct LifecycleController {
    id: Uuid,
    platform: Arc<dyn Platform>,
    gate: Mutex<Gated>,
    observed: Arc<Observed>,
    runtime: RwLock<Option<RuntimeIndex>>,
}

impl LifecycleController {
    /// Create a controller in the `Unconfigured` state.
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            id: Uuid::new_v4(),
            platform,
            gate: Mutex::new(Gated { config: None }),
            observed: Arc::new(Observed::new()),
            runtime: RwLock::new(None),
        }
    }

    /// Unique identifier of this controller, for logging and registries.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The current lifecycle state. Pure observer, always legal.
    pub fn current_state(&self) -> LifecycleState {
        self.observed.state()
    }

    /// Load a validated configuration, consuming it.
    ///
    /// The configuration is single-use: it moves into the controller and
    /// cannot instantiate a second machine.
    ///
    /// # Errors
    /// [`TransitionError::AlreadyConfigured`] unless the controller is
    /// `Unconfigured`; [`TransitionError::OperationInProgress`] if another
    /// lifecycle call is in flight.
    pub fn load(&self, config: ValidatedConfiguration) -> Result<(), TransitionError> {
        let mut gated = self
            .gate
            .try_lock()
            .map_err(|_| TransitionError::OperationInProgress)?;

        if self.observed.state() != LifecycleState::Unconfigured {
            return Err(TransitionError::AlreadyConfigured);
        }

        let index = RuntimeIndex {
            memory_size_bytes: config.memory_size_bytes(),
            balloon_tags: config
                .balloons()
                .iter()
                .map(|balloon| balloon.tag.clone())
                .collect(),
        };
        *self
            .runtime
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(index);

        tracing::info!(
            machine_id = %self.id,
            cpu_count = config.cpu_count(),
            memory_size_bytes = config.memory_size_bytes(),
            "Configuration loaded"
        );
        gated.config = Some(config);
        self.observed.set_state(LifecycleState::Configured);
        Ok(())
    }

    /// Boot the machine.
    ///
    /// Transitions to `Starting` before the first suspension, then awaits
    /// platform validation, instantiation, and readiness under the
    /// configuration's operation timeout. On success the state is
    /// `Running`. On any platform failure or timeout the state is
    /// `Failed(reason)` and the call still returns `Ok(())`: platform
    /// failures surface only through [`current_state`](Self::current_state).
    ///
    /// # Errors
    /// [`TransitionError::InvalidTransition`] unless `Configured`;
    /// [`TransitionError::OperationInProgress`] if another lifecycle call
    /// is in flight.
    pub async fn start(&self) -> Result<(), TransitionError> {
        let gated = self
            .gate
            .try_lock()
            .map_err(|_| TransitionError::OperationInProgress)?;

        let state = self.observed.state();
        if state != LifecycleState::Configured {
            return Err(TransitionError::InvalidTransition {
                operation: "start",
                state,
            });
        }
        let Some(config) = gated.config.as_ref() else {
            return Err(TransitionError::InvalidTransition {
                operation: "start",
                state,
            });
        };

        tracing::info!(machine_id = %self.id, "Starting machine");
        self.observed.set_state(LifecycleState::Starting);

        if let Err(e) = self.platform.validate(config.raw()) {
            self.fail(e.reason);
            return Ok(());
        }

        let machine = match self.platform.instantiate(config.raw()) {
            Ok(machine) => machine,
            Err(e) => {
                self.fail(e.reason);
                return Ok(());
            }
        };
        self.observed.set_machine(Some(machine));

        let deadline = config.operation_timeout();
        match tokio::time::timeout(deadline, self.platform.start(machine)).await {
            Ok(Ok(())) => {
                self.observed.set_state(LifecycleState::Running);
                tracing::info!(machine_id = %self.id, "Machine running");
            }
            Ok(Err(e)) => self.fail(e.reason),
            Err(_) => self.fail(timeout_reason("start", deadline)),
        }
        Ok(())
    }

    /// Shut the machine down.
    ///
    /// Transitions to `Stopping`, then asks the platform whether the
    /// machine can currently be stopped. If not, there is nothing useful
    /// to stop - a machine that never finished booting or is already
    /// tearing down cannot be force-stopped safely - so local bookkeeping
    /// completes and the state proceeds directly to `Stopped` without a
    /// platform stop request. Otherwise the platform shutdown is awaited
    /// under the operation timeout; timeout or platform error lands in
    /// `Failed(reason)`. As with `start`, platform failures do not turn
    /// into an `Err` return.
    ///
    /// # Errors
    /// [`TransitionError::InvalidTransition`] unless `Running`;
    /// [`TransitionError::OperationInProgress`] if another lifecycle call
    /// is in flight.
    pub async fn stop(&self) -> Result<(), TransitionError> {
        let gated = self
            .gate
            .try_lock()
            .map_err(|_| TransitionError::OperationInProgress)?;

        let state = self.observed.state();
        if state != LifecycleState::Running {
            return Err(TransitionError::InvalidTransition {
                operation: "stop",
                state,
            });
        }

        tracing::info!(machine_id = %self.id, "Stopping machine");
        self.observed.set_state(LifecycleState::Stopping);

        let Some(machine) = self.observed.machine() else {
            self.observed.set_state(LifecycleState::Stopped);
            return Ok(());
        };

        if !self.platform.can_stop(machine) {
            tracing::info!(
                machine_id = %self.id,
                "Platform reports machine cannot be stopped; completing local teardown"
            );
            self.release(machine);
            self.observed.set_state(LifecycleState::Stopped);
            return Ok(());
        }

        let deadline = gated
            .config
            .as_ref()
            .map(|config| config.operation_timeout())
            .unwrap_or(crate::config::DEFAULT_OPERATION_TIMEOUT);
        match tokio::time::timeout(deadline, self.platform.stop(machine)).await {
            Ok(Ok(())) => {
                self.release(machine);
                self.observed.set_state(LifecycleState::Stopped);
                tracing::info!(machine_id = %self.id, "Machine stopped");
            }
            Ok(Err(e)) => self.fail(e.reason),
            Err(_) => self.fail(timeout_reason("stop", deadline)),
        }
        Ok(())
    }

    /// Reconcile the platform's observed state into the lifecycle state.
    ///
    /// This is the poll point for crash detection: a machine the platform
    /// reports as errored or stopped while this controller believes it is
    /// `Running` transitions to `Failed(reason)`. Reconciliation is skipped
    /// when a lifecycle operation is in flight (the operation itself will
    /// settle the state). Returns the state after reconciliation.
    pub fn refresh_state(&self) -> LifecycleState {
        let Ok(_gated) = self.gate.try_lock() else {
            return self.observed.state();
        };

        if self.observed.state() == LifecycleState::Running {
            if let Some(machine) = self.observed.machine() {
                match self.platform.observed_state(machine) {
                    PlatformState::Error(reason) => self.fail(reason),
                    PlatformState::Stopped => {
                        self.fail("machine stopped unexpectedly".to_string())
                    }
                    _ => {}
                }
            }
        }
        self.observed.state()
    }

    /// Resolve a live, mutation-capable device by tag.
    ///
    /// Returns `None` unless the machine is `Running`, the tag names a
    /// configured device whose kind supports live mutation (currently:
    /// memory balloons), and the platform can still resolve it. The
    /// returned handle is non-owning and expires the instant the
    /// controller leaves `Running`.
    pub fn device_handle(&self, tag: &str) -> Option<RuntimeDeviceHandle> {
        if self.observed.state() != LifecycleState::Running {
            return None;
        }
        let machine = self.observed.machine()?;

        let memory_limit = {
            let runtime = self.runtime.read().unwrap_or_else(PoisonError::into_inner);
            let index = runtime.as_ref()?;
            if !index.balloon_tags.contains(tag) {
                return None;
            }
            index.memory_size_bytes
        };

        let device = self.platform.resolve_device(machine, tag)?;
        Some(RuntimeDeviceHandle::new(
            tag.to_string(),
            device,
            memory_limit,
            Arc::clone(&self.platform),
            Arc::clone(&self.observed),
        ))
    }

    /// The machine's display surface, valid only while `Running`.
    pub fn display_attachment(&self) -> Option<DisplaySurface> {
        if self.observed.state() != LifecycleState::Running {
            return None;
        }
        let machine = self.observed.machine()?;
        self.platform.display_surface(machine)
    }

    /// Capture a platform failure: release the machine if one exists and
    /// record the reason for observers.
    fn fail(&self, reason: String) {
        tracing::error!(machine_id = %self.id, reason = %reason, "Machine failed");
        if let Some(machine) = self.observed.machine() {
            self.release(machine);
        }
        self.observed.set_state(LifecycleState::Failed(reason));
    }

    fn release(&self, machine: MachineHandle) {
        self.platform.release(machine);
        self.observed.set_machine(None);
    }
}

fn timeout_reason(operation: &str, deadline: Duration) -> String {
    format!("{operation} timed out after {deadline:?}")
}
