use std::sync::Arc;

use tracing::{info, warn};

use crate::audio::AudioNormalizer;
use crate::error::KioskError;
use crate::events::EventMultiplexer;
use crate::gate::CapabilityGate;
use crate::pipeline::Pipeline;
use crate::provider::{CapabilityProvider, NullProvider};
use crate::schedule::PowerSchedule;
use crate::state::{DeviceSnapshot, PipelineState, SharedState};
use crate::topic::ObserverRef;
use crate::types::{DownloadProgress, InstallStatus, RingerMode, VolumeChange};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AgentOptions {
    /// When a privilege precondition fails, also start the matching request
    /// flow on the device before returning the remediation.
    pub auto_request_remediation: bool,
}

/// Entry point for every device-management operation.
///
/// The provider variant is fixed at construction. Subscription to the
/// provider's push channels happens once, here, and lasts until
/// [`shutdown`](Self::shutdown) or drop.
pub struct KioskAgent {
    gate: Arc<CapabilityGate>,
    state: Arc<SharedState>,
    events: Arc<EventMultiplexer>,
    pipeline: Pipeline,
    schedule: PowerSchedule,
    audio: AudioNormalizer,
}

impl KioskAgent {
    /// Must be called from within a tokio runtime when the provider exposes
    /// push channels.
    pub fn new(provider: Arc<dyn CapabilityProvider>, options: AgentOptions) -> Self {
        let gate = Arc::new(CapabilityGate::new(provider));
        let state = Arc::new(SharedState::default());
        let events = Arc::new(EventMultiplexer::default());
        match gate.provider().subscribe() {
            Some(channels) => events.connect(channels, Arc::clone(&state)),
            None => warn!("provider exposes no event channels; observers will not receive events"),
        }
        info!(
            available = gate.is_available(),
            auto_request_remediation = options.auto_request_remediation,
            "kiosk agent ready"
        );
        Self {
            pipeline: Pipeline::new(
                Arc::clone(&gate),
                Arc::clone(&state),
                options.auto_request_remediation,
            ),
            schedule: PowerSchedule::new(Arc::clone(&gate), Arc::clone(&state)),
            audio: AudioNormalizer::new(
                Arc::clone(&gate),
                Arc::clone(&state),
                options.auto_request_remediation,
            ),
            gate,
            state,
            events,
        }
    }

    pub fn with_null_provider() -> Self {
        Self::new(Arc::new(NullProvider), AgentOptions::default())
    }

    pub fn is_available(&self) -> bool {
        self.gate.is_available()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn schedule(&self) -> &PowerSchedule {
        &self.schedule
    }

    pub fn audio(&self) -> &AudioNormalizer {
        &self.audio
    }

    pub fn events(&self) -> &EventMultiplexer {
        &self.events
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.state.pipeline()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.state.snapshot()
    }

    pub async fn wait_for_install_terminal(&self) -> Result<InstallStatus, KioskError> {
        self.pipeline.wait_for_terminal().await
    }

    // Lifecycle.

    pub fn start_kiosk(&self) {
        info!("entering kiosk lock mode");
        self.gate.fire("start_kiosk", |provider| provider.start_kiosk());
    }

    pub fn stop_kiosk(&self) {
        info!("leaving kiosk lock mode");
        self.gate.fire("stop_kiosk", |provider| provider.stop_kiosk());
    }

    pub fn set_boot_autostart(&self, enabled: bool) {
        self.gate
            .fire("set_boot_autostart", |provider| provider.set_boot_autostart(enabled));
    }

    pub async fn is_boot_autostart_enabled(&self) -> Result<bool, KioskError> {
        self.gate
            .invoke(
                "is_boot_autostart_enabled",
                self.gate.provider().is_boot_autostart_enabled(),
            )
            .await
    }

    pub async fn request_device_owner(&self) -> Result<(), KioskError> {
        self.gate
            .invoke(
                "request_device_owner",
                self.gate.provider().request_device_owner(),
            )
            .await
    }

    pub async fn is_device_owner(&self) -> Result<bool, KioskError> {
        self.gate
            .invoke("is_device_owner", self.gate.provider().is_device_owner())
            .await
    }

    pub async fn clear_device_owner(&self) -> Result<bool, KioskError> {
        self.gate
            .invoke("clear_device_owner", self.gate.provider().clear_device_owner())
            .await
    }

    /// Replaces the lock-task allow-list. Blank entries are dropped.
    pub async fn set_lock_task_packages(&self, packages: Vec<String>) -> Result<bool, KioskError> {
        let mut cleaned: Vec<String> = Vec::with_capacity(packages.len());
        for package in packages {
            let package = package.trim();
            if package.is_empty() {
                continue;
            }
            if package.chars().any(char::is_whitespace) {
                return Err(KioskError::validation(format!(
                    "invalid package name: {package}"
                )));
            }
            if !cleaned.iter().any(|existing| existing == package) {
                cleaned.push(package.to_string());
            }
        }
        self.gate
            .invoke(
                "set_lock_task_packages",
                self.gate.provider().set_lock_task_packages(cleaned),
            )
            .await
    }

    // Observer registration.

    pub fn attach_download_progress(&self, observer: ObserverRef<DownloadProgress>) -> bool {
        self.events.download_progress.attach(observer)
    }

    pub fn detach_download_progress(&self, observer: &ObserverRef<DownloadProgress>) -> bool {
        self.events.download_progress.detach(observer)
    }

    pub fn attach_install_status(&self, observer: ObserverRef<InstallStatus>) -> bool {
        self.events.install_status.attach(observer)
    }

    pub fn detach_install_status(&self, observer: &ObserverRef<InstallStatus>) -> bool {
        self.events.install_status.detach(observer)
    }

    pub fn attach_system_brightness(&self, observer: ObserverRef<u8>) -> bool {
        self.events.system_brightness.attach(observer)
    }

    pub fn detach_system_brightness(&self, observer: &ObserverRef<u8>) -> bool {
        self.events.system_brightness.detach(observer)
    }

    pub fn attach_volume(&self, observer: ObserverRef<VolumeChange>) -> bool {
        self.events.volume.attach(observer)
    }

    pub fn detach_volume(&self, observer: &ObserverRef<VolumeChange>) -> bool {
        self.events.volume.detach(observer)
    }

    pub fn attach_global_volume(&self, observer: ObserverRef<f32>) -> bool {
        self.events.global_volume.attach(observer)
    }

    pub fn detach_global_volume(&self, observer: &ObserverRef<f32>) -> bool {
        self.events.global_volume.detach(observer)
    }

    pub fn attach_ringer_mode(&self, observer: ObserverRef<RingerMode>) -> bool {
        self.events.ringer_mode.attach(observer)
    }

    pub fn detach_ringer_mode(&self, observer: &ObserverRef<RingerMode>) -> bool {
        self.events.ringer_mode.detach(observer)
    }

    /// Stops the channel pumps, drops every observer and releases install
    /// waiters with `Closed`. Safe to call more than once; the agent keeps
    /// answering direct calls afterwards.
    pub fn shutdown(&self) {
        self.events.shutdown();
        self.state.close();
    }
}

impl Drop for KioskAgent {
    fn drop(&mut self) {
        self.events.shutdown();
    }
}
