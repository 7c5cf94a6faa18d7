//! State-machine tests for the lifecycle controller against a mock
//! platform. Nothing here needs a real hypervisor: the mock records every
//! request and answers with whatever the test scripted.

use skiff_vm::{
    BalloonDescriptor, BootDescriptor, ConfigurationBuilder, DeviceDescriptor,
    DirectoryShareDescriptor, DisplaySurface, InputDescriptor, LifecycleController,
    LifecycleState, MachineHandle, NetworkDescriptor, Platform, PlatformDeviceRef, PlatformError,
    PlatformState, RawConfiguration, StorageDescriptor, StorageHandle, TransitionError,
    ValidatedConfiguration,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const GIB: u64 = 1024 * 1024 * 1024;

/// Scriptable platform double. Counters are atomics so assertions never
/// need to take a lock.
struct MockPlatform {
    next_token: AtomicU64,
    can_stop: AtomicBool,
    validate_error: Mutex<Option<PlatformError>>,
    start_error: Mutex<Option<PlatformError>>,
    start_delay: Mutex<Option<Duration>>,
    observed: Mutex<PlatformState>,
    instantiate_calls: AtomicUsize,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    release_calls: AtomicUsize,
    balloon_targets: Mutex<Vec<(PlatformDeviceRef, u64)>>,
}

impl MockPlatform {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_token: AtomicU64::new(1),
            can_stop: AtomicBool::new(true),
            validate_error: Mutex::new(None),
            start_error: Mutex::new(None),
            start_delay: Mutex::new(None),
            observed: Mutex::new(PlatformState::Running),
            instantiate_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
            balloon_targets: Mutex::new(Vec::new()),
        })
    }

    fn set_observed(&self, state: PlatformState) {
        *self.observed.lock().unwrap() = state;
    }

    fn balloon_targets(&self) -> Vec<(PlatformDeviceRef, u64)> {
        self.balloon_targets.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Platform for MockPlatform {
    fn validate(&self, _config: &RawConfiguration) -> Result<(), PlatformError> {
        match self.validate_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn instantiate(&self, _config: &RawConfiguration) -> Result<MachineHandle, PlatformError> {
        self.instantiate_calls.fetch_add(1, Ordering::SeqCst);
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        Ok(MachineHandle::from_raw(token))
    }

    async fn start(&self, _machine: MachineHandle) -> Result<(), PlatformError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.start_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.start_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn can_stop(&self, _machine: MachineHandle) -> bool {
        self.can_stop.load(Ordering::SeqCst)
    }

    async fn stop(&self, _machine: MachineHandle) -> Result<(), PlatformError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn observed_state(&self, _machine: MachineHandle) -> PlatformState {
        self.observed.lock().unwrap().clone()
    }

    fn resolve_device(&self, _machine: MachineHandle, tag: &str) -> Option<PlatformDeviceRef> {
        // The platform resolves anything it was configured with; kind
        // filtering is the controller's job.
        Some(PlatformDeviceRef::from_raw(tag.len() as u64))
    }

    async fn set_balloon_target(
        &self,
        device: PlatformDeviceRef,
        bytes: u64,
    ) -> Result<(), PlatformError> {
        self.balloon_targets.lock().unwrap().push((device, bytes));
        Ok(())
    }

    fn display_surface(&self, machine: MachineHandle) -> Option<DisplaySurface> {
        Some(DisplaySurface::from_raw(machine.into_raw()))
    }

    fn release(&self, _machine: MachineHandle) {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn test_config() -> ValidatedConfiguration {
    let mut builder = ConfigurationBuilder::new();
    builder.set_resources(4, 8 * GIB).unwrap();
    builder
        .add_device(DeviceDescriptor::Boot(BootDescriptor::new(
            "/tmp/skiff-test/efi-vars.bin",
            true,
        )))
        .unwrap();
    builder
        .add_device(DeviceDescriptor::Storage(StorageDescriptor::new(
            StorageHandle::from_raw(4),
            false,
        )))
        .unwrap();
    builder
        .add_device(DeviceDescriptor::Network(NetworkDescriptor::nat()))
        .unwrap();
    builder
        .add_device(DeviceDescriptor::Input(InputDescriptor::keyboard()))
        .unwrap();
    builder
        .add_device(DeviceDescriptor::Input(InputDescriptor::pointer()))
        .unwrap();
    builder
        .add_device(DeviceDescriptor::DirectoryShare(
            DirectoryShareDescriptor::new("/home/user", "homedir", false),
        ))
        .unwrap();
    builder
        .add_device(DeviceDescriptor::MemoryBalloon(BalloonDescriptor::new(
            "balloon0",
        )))
        .unwrap();
    builder.validate().unwrap()
}

async fn running_controller(platform: Arc<MockPlatform>) -> LifecycleController {
    let controller = LifecycleController::new(platform);
    controller.load(test_config()).unwrap();
    controller.start().await.unwrap();
    assert_eq!(controller.current_state(), LifecycleState::Running);
    controller
}

/// Wait for the fire-and-forget balloon task to land on the mock.
async fn drain_spawned_tasks() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn full_lifecycle_reaches_stopped() {
    let platform = MockPlatform::new();
    let controller = LifecycleController::new(platform.clone());
    assert_eq!(controller.current_state(), LifecycleState::Unconfigured);

    controller.load(test_config()).unwrap();
    assert_eq!(controller.current_state(), LifecycleState::Configured);

    controller.start().await.unwrap();
    assert_eq!(controller.current_state(), LifecycleState::Running);
    assert_eq!(platform.instantiate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(platform.start_calls.load(Ordering::SeqCst), 1);

    controller.stop().await.unwrap();
    assert_eq!(controller.current_state(), LifecycleState::Stopped);
    assert_eq!(platform.stop_calls.load(Ordering::SeqCst), 1);
    assert_eq!(platform.release_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn load_twice_is_already_configured() {
    let platform = MockPlatform::new();
    let controller = LifecycleController::new(platform);

    controller.load(test_config()).unwrap();
    let err = controller.load(test_config()).unwrap_err();
    assert_eq!(err, TransitionError::AlreadyConfigured);
    assert_eq!(controller.current_state(), LifecycleState::Configured);
}

#[tokio::test]
async fn start_from_stopped_is_invalid_transition() {
    let platform = MockPlatform::new();
    let controller = running_controller(platform).await;
    controller.stop().await.unwrap();

    let err = controller.start().await.unwrap_err();
    assert_eq!(
        err,
        TransitionError::InvalidTransition {
            operation: "start",
            state: LifecycleState::Stopped,
        }
    );
    assert_eq!(controller.current_state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn start_before_load_is_invalid_transition() {
    let platform = MockPlatform::new();
    let controller = LifecycleController::new(platform);

    let err = controller.start().await.unwrap_err();
    assert!(matches!(
        err,
        TransitionError::InvalidTransition {
            operation: "start",
            ..
        }
    ));
    assert_eq!(controller.current_state(), LifecycleState::Unconfigured);
}

#[tokio::test]
async fn stop_when_platform_cannot_stop_goes_straight_to_stopped() {
    let platform = MockPlatform::new();
    let controller = running_controller(platform.clone()).await;

    platform.can_stop.store(false, Ordering::SeqCst);
    controller.stop().await.unwrap();

    assert_eq!(controller.current_state(), LifecycleState::Stopped);
    // No platform stop request was issued; teardown still happened.
    assert_eq!(platform.stop_calls.load(Ordering::SeqCst), 0);
    assert_eq!(platform.release_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn platform_start_failure_is_captured_not_raised() {
    let platform = MockPlatform::new();
    *platform.start_error.lock().unwrap() = Some(PlatformError::new("device attach failure"));

    let controller = LifecycleController::new(platform.clone());
    controller.load(test_config()).unwrap();

    // The call itself succeeds; the failure is observable state.
    controller.start().await.unwrap();
    assert_eq!(
        controller.current_state(),
        LifecycleState::Failed("device attach failure".into())
    );
    assert_eq!(platform.release_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn platform_validation_failure_prevents_instantiation() {
    let platform = MockPlatform::new();
    *platform.validate_error.lock().unwrap() = Some(PlatformError::new("too many vcpus"));

    let controller = LifecycleController::new(platform.clone());
    controller.load(test_config()).unwrap();
    controller.start().await.unwrap();

    assert_eq!(
        controller.current_state(),
        LifecycleState::Failed("too many vcpus".into())
    );
    assert_eq!(platform.instantiate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn start_timeout_lands_in_failed() {
    let platform = MockPlatform::new();
    *platform.start_delay.lock().unwrap() = Some(Duration::from_secs(120));

    let mut builder = ConfigurationBuilder::new();
    builder
        .add_device(DeviceDescriptor::Boot(BootDescriptor::new(
            "/tmp/skiff-test/efi-vars.bin",
            true,
        )))
        .unwrap();
    builder
        .set_operation_timeout(Duration::from_secs(5))
        .unwrap();
    let config = builder.validate().unwrap();

    let controller = LifecycleController::new(platform.clone());
    controller.load(config).unwrap();
    controller.start().await.unwrap();

    match controller.current_state() {
        LifecycleState::Failed(reason) => assert!(reason.contains("timed out")),
        state => panic!("expected Failed, got {state}"),
    }
    assert_eq!(platform.release_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_start_is_operation_in_progress() {
    let platform = MockPlatform::new();
    *platform.start_delay.lock().unwrap() = Some(Duration::from_secs(10));

    let controller = Arc::new(LifecycleController::new(platform));
    controller.load(test_config()).unwrap();

    let background = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.start().await })
    };
    // Let the first start reach its suspension point.
    tokio::task::yield_now().await;
    assert_eq!(controller.current_state(), LifecycleState::Starting);

    let err = controller.start().await.unwrap_err();
    assert_eq!(err, TransitionError::OperationInProgress);

    background.await.unwrap().unwrap();
    assert_eq!(controller.current_state(), LifecycleState::Running);
}

#[tokio::test]
async fn refresh_state_captures_external_crash() {
    let platform = MockPlatform::new();
    let controller = running_controller(platform.clone()).await;

    platform.set_observed(PlatformState::Error("guest panic".into()));
    let state = controller.refresh_state();
    assert_eq!(state, LifecycleState::Failed("guest panic".into()));
    assert_eq!(platform.release_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refresh_state_is_a_no_op_while_healthy() {
    let platform = MockPlatform::new();
    let controller = running_controller(platform).await;
    assert_eq!(controller.refresh_state(), LifecycleState::Running);
}

#[tokio::test]
async fn device_handle_resolves_configured_balloon_only() {
    let platform = MockPlatform::new();
    let controller = running_controller(platform).await;

    assert!(controller.device_handle("balloon0").is_some());
    // Directory shares do not support live mutation.
    assert!(controller.device_handle("homedir").is_none());
    assert!(controller.device_handle("no-such-tag").is_none());
}

#[tokio::test]
async fn device_handle_is_none_outside_running() {
    let platform = MockPlatform::new();
    let controller = LifecycleController::new(platform);
    controller.load(test_config()).unwrap();
    assert!(controller.device_handle("balloon0").is_none());
}

#[tokio::test]
async fn balloon_retarget_reaches_platform() {
    let platform = MockPlatform::new();
    let controller = running_controller(platform.clone()).await;

    let handle = controller.device_handle("balloon0").unwrap();
    assert!(handle.is_valid());
    handle.set_target_memory(6 * GIB).unwrap();

    drain_spawned_tasks().await;
    let targets = platform.balloon_targets();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].1, 6 * GIB);
    assert_eq!(controller.current_state(), LifecycleState::Running);
}

#[tokio::test]
async fn balloon_target_above_allocation_is_rejected() {
    let platform = MockPlatform::new();
    let controller = running_controller(platform.clone()).await;

    let handle = controller.device_handle("balloon0").unwrap();
    let err = handle.set_target_memory(20 * GIB).unwrap_err();
    assert_eq!(
        err,
        TransitionError::InvalidTargetMemory {
            requested: 20 * GIB,
            limit: 8 * GIB,
        }
    );

    let err = handle.set_target_memory(0).unwrap_err();
    assert!(matches!(err, TransitionError::InvalidTargetMemory { .. }));

    drain_spawned_tasks().await;
    assert!(platform.balloon_targets().is_empty());
}

#[tokio::test]
async fn stale_handle_expires_after_stop() {
    let platform = MockPlatform::new();
    let controller = running_controller(platform.clone()).await;

    let handle = controller.device_handle("balloon0").unwrap();
    controller.stop().await.unwrap();

    assert!(!handle.is_valid());
    let err = handle.set_target_memory(4 * GIB).unwrap_err();
    assert_eq!(err, TransitionError::HandleExpired);

    drain_spawned_tasks().await;
    assert!(platform.balloon_targets().is_empty());
}

#[tokio::test]
async fn display_attachment_tracks_running_period() {
    let platform = MockPlatform::new();
    let controller = LifecycleController::new(platform);
    controller.load(test_config()).unwrap();
    assert!(controller.display_attachment().is_none());

    controller.start().await.unwrap();
    assert!(controller.display_attachment().is_some());

    controller.stop().await.unwrap();
    assert!(controller.display_attachment().is_none());
}
