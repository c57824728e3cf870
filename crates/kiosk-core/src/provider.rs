//! The capability provider boundary.
//!
//! A provider performs the privileged work (installs, schedules, audio and
//! brightness mutation) and pushes device state on six broadcast channels.
//! Two variants exist at startup: a full provider supplied by the host
//! process, or [`NullProvider`] on platforms without the capability layer.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{ProviderError, ProviderResult};
use crate::types::{
    AudioStream, DownloadProgress, DownloadResult, DownloadedFile, InstallRequest, InstallStatus,
    RingerMode, ScheduleKind, ScheduledPowerSettings, VolumeChange,
};

const CHANNEL_CAPACITY: usize = 256;

/// Receiving ends of the provider's push channels, handed out once.
pub struct ProviderChannels {
    pub download_progress: broadcast::Receiver<DownloadProgress>,
    pub install_status: broadcast::Receiver<InstallStatus>,
    pub system_brightness: broadcast::Receiver<i32>,
    pub volume: broadcast::Receiver<VolumeChange>,
    pub global_volume: broadcast::Receiver<f32>,
    pub ringer_mode: broadcast::Receiver<RingerMode>,
}

/// Sending ends of the push channels, owned by a provider implementation.
#[derive(Clone)]
pub struct ProviderEmitters {
    pub download_progress: broadcast::Sender<DownloadProgress>,
    pub install_status: broadcast::Sender<InstallStatus>,
    pub system_brightness: broadcast::Sender<i32>,
    pub volume: broadcast::Sender<VolumeChange>,
    pub global_volume: broadcast::Sender<f32>,
    pub ringer_mode: broadcast::Sender<RingerMode>,
}

impl Default for ProviderEmitters {
    fn default() -> Self {
        Self {
            download_progress: broadcast::channel(CHANNEL_CAPACITY).0,
            install_status: broadcast::channel(CHANNEL_CAPACITY).0,
            system_brightness: broadcast::channel(CHANNEL_CAPACITY).0,
            volume: broadcast::channel(CHANNEL_CAPACITY).0,
            global_volume: broadcast::channel(CHANNEL_CAPACITY).0,
            ringer_mode: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }
}

impl ProviderEmitters {
    pub fn subscribe(&self) -> ProviderChannels {
        ProviderChannels {
            download_progress: self.download_progress.subscribe(),
            install_status: self.install_status.subscribe(),
            system_brightness: self.system_brightness.subscribe(),
            volume: self.volume.subscribe(),
            global_volume: self.global_volume.subscribe(),
            ringer_mode: self.ringer_mode.subscribe(),
        }
    }

    // Send errors only mean nobody is subscribed yet.
    pub fn download_progress(&self, progress: DownloadProgress) {
        let _ = self.download_progress.send(progress);
    }

    pub fn install_status(&self, status: InstallStatus) {
        let _ = self.install_status.send(status);
    }

    pub fn system_brightness(&self, value: i32) {
        let _ = self.system_brightness.send(value);
    }

    pub fn volume(&self, change: VolumeChange) {
        let _ = self.volume.send(change);
    }

    pub fn global_volume(&self, level: f32) {
        let _ = self.global_volume.send(level);
    }

    pub fn ringer_mode(&self, mode: RingerMode) {
        let _ = self.ringer_mode.send(mode);
    }
}

#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Whether the capability layer is present at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Push channels. Called once per agent; `None` means nothing will ever
    /// be emitted.
    fn subscribe(&self) -> Option<ProviderChannels>;

    // Fire-and-forget.
    fn start_kiosk(&self);
    fn stop_kiosk(&self);
    fn set_boot_autostart(&self, enabled: bool);

    async fn is_boot_autostart_enabled(&self) -> ProviderResult<bool>;
    async fn request_device_owner(&self) -> ProviderResult<()>;
    async fn is_device_owner(&self) -> ProviderResult<bool>;
    async fn clear_device_owner(&self) -> ProviderResult<bool>;
    async fn set_lock_task_packages(&self, packages: Vec<String>) -> ProviderResult<bool>;

    async fn has_install_permission(&self) -> ProviderResult<bool>;
    async fn request_install_permission(&self) -> ProviderResult<()>;
    async fn download(&self, url: &str, file_name: Option<&str>) -> ProviderResult<DownloadResult>;
    async fn list_downloaded_files(&self) -> ProviderResult<Vec<DownloadedFile>>;
    async fn delete_downloaded_file(&self, file_path: &str) -> ProviderResult<bool>;
    async fn clear_downloaded_files(&self) -> ProviderResult<u32>;
    /// Dispatches an install; progress and the outcome arrive on the install
    /// status channel.
    async fn install(&self, request: InstallRequest) -> ProviderResult<()>;
    async fn is_app_installed(&self, package_name: &str) -> ProviderResult<bool>;
    async fn launch_app(&self, package_name: &str) -> ProviderResult<()>;

    async fn system_brightness(&self) -> ProviderResult<i32>;
    async fn set_system_brightness(&self, value: u8) -> ProviderResult<bool>;
    /// Returns the raw override, `-1.0` when deferring to the system.
    async fn app_brightness(&self) -> ProviderResult<f32>;
    async fn set_app_brightness(&self, value: f32) -> ProviderResult<bool>;
    async fn stream_volume(&self, stream: AudioStream) -> ProviderResult<f32>;
    async fn set_stream_volume(&self, stream: AudioStream, level: f32) -> ProviderResult<bool>;
    async fn global_volume(&self) -> ProviderResult<f32>;
    async fn set_global_volume(&self, level: f32) -> ProviderResult<bool>;
    async fn is_stream_muted(&self, stream: AudioStream) -> ProviderResult<bool>;
    async fn set_stream_muted(&self, stream: AudioStream, muted: bool) -> ProviderResult<bool>;
    async fn is_global_muted(&self) -> ProviderResult<bool>;
    async fn set_global_muted(&self, muted: bool) -> ProviderResult<bool>;
    async fn ringer_mode(&self) -> ProviderResult<RingerMode>;
    async fn set_ringer_mode(&self, mode: RingerMode) -> ProviderResult<bool>;
    async fn has_dnd_access(&self) -> ProviderResult<bool>;
    async fn request_dnd_access(&self) -> ProviderResult<()>;
    async fn start_observing(&self) -> ProviderResult<()>;
    async fn stop_observing(&self) -> ProviderResult<()>;

    async fn set_schedule(
        &self,
        kind: ScheduleKind,
        settings: ScheduledPowerSettings,
    ) -> ProviderResult<bool>;
    async fn schedule(&self, kind: ScheduleKind) -> ProviderResult<Option<ScheduledPowerSettings>>;
    async fn cancel_schedule(&self, kind: ScheduleKind) -> ProviderResult<bool>;
    async fn shutdown_now(&self) -> ProviderResult<bool>;
}

/// Stand-in for platforms without the capability layer. Every request
/// reports `Unavailable`, which the gate turns into a degraded default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProvider;

fn absent<T>() -> ProviderResult<T> {
    Err(ProviderError::Unavailable(
        "capability layer not present on this platform".into(),
    ))
}

#[async_trait]
impl CapabilityProvider for NullProvider {
    fn is_available(&self) -> bool {
        false
    }

    fn subscribe(&self) -> Option<ProviderChannels> {
        None
    }

    fn start_kiosk(&self) {}

    fn stop_kiosk(&self) {}

    fn set_boot_autostart(&self, _enabled: bool) {}

    async fn is_boot_autostart_enabled(&self) -> ProviderResult<bool> {
        absent()
    }

    async fn request_device_owner(&self) -> ProviderResult<()> {
        absent()
    }

    async fn is_device_owner(&self) -> ProviderResult<bool> {
        absent()
    }

    async fn clear_device_owner(&self) -> ProviderResult<bool> {
        absent()
    }

    async fn set_lock_task_packages(&self, _packages: Vec<String>) -> ProviderResult<bool> {
        absent()
    }

    async fn has_install_permission(&self) -> ProviderResult<bool> {
        absent()
    }

    async fn request_install_permission(&self) -> ProviderResult<()> {
        absent()
    }

    async fn download(
        &self,
        _url: &str,
        _file_name: Option<&str>,
    ) -> ProviderResult<DownloadResult> {
        absent()
    }

    async fn list_downloaded_files(&self) -> ProviderResult<Vec<DownloadedFile>> {
        absent()
    }

    async fn delete_downloaded_file(&self, _file_path: &str) -> ProviderResult<bool> {
        absent()
    }

    async fn clear_downloaded_files(&self) -> ProviderResult<u32> {
        absent()
    }

    async fn install(&self, _request: InstallRequest) -> ProviderResult<()> {
        absent()
    }

    async fn is_app_installed(&self, _package_name: &str) -> ProviderResult<bool> {
        absent()
    }

    async fn launch_app(&self, _package_name: &str) -> ProviderResult<()> {
        absent()
    }

    async fn system_brightness(&self) -> ProviderResult<i32> {
        absent()
    }

    async fn set_system_brightness(&self, _value: u8) -> ProviderResult<bool> {
        absent()
    }

    async fn app_brightness(&self) -> ProviderResult<f32> {
        absent()
    }

    async fn set_app_brightness(&self, _value: f32) -> ProviderResult<bool> {
        absent()
    }

    async fn stream_volume(&self, _stream: AudioStream) -> ProviderResult<f32> {
        absent()
    }

    async fn set_stream_volume(&self, _stream: AudioStream, _level: f32) -> ProviderResult<bool> {
        absent()
    }

    async fn global_volume(&self) -> ProviderResult<f32> {
        absent()
    }

    async fn set_global_volume(&self, _level: f32) -> ProviderResult<bool> {
        absent()
    }

    async fn is_stream_muted(&self, _stream: AudioStream) -> ProviderResult<bool> {
        absent()
    }

    async fn set_stream_muted(&self, _stream: AudioStream, _muted: bool) -> ProviderResult<bool> {
        absent()
    }

    async fn is_global_muted(&self) -> ProviderResult<bool> {
        absent()
    }

    async fn set_global_muted(&self, _muted: bool) -> ProviderResult<bool> {
        absent()
    }

    async fn ringer_mode(&self) -> ProviderResult<RingerMode> {
        absent()
    }

    async fn set_ringer_mode(&self, _mode: RingerMode) -> ProviderResult<bool> {
        absent()
    }

    async fn has_dnd_access(&self) -> ProviderResult<bool> {
        absent()
    }

    async fn request_dnd_access(&self) -> ProviderResult<()> {
        absent()
    }

    async fn start_observing(&self) -> ProviderResult<()> {
        absent()
    }

    async fn stop_observing(&self) -> ProviderResult<()> {
        absent()
    }

    async fn set_schedule(
        &self,
        _kind: ScheduleKind,
        _settings: ScheduledPowerSettings,
    ) -> ProviderResult<bool> {
        absent()
    }

    async fn schedule(
        &self,
        _kind: ScheduleKind,
    ) -> ProviderResult<Option<ScheduledPowerSettings>> {
        absent()
    }

    async fn cancel_schedule(&self, _kind: ScheduleKind) -> ProviderResult<bool> {
        absent()
    }

    async fn shutdown_now(&self) -> ProviderResult<bool> {
        absent()
    }
}
