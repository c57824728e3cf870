//! Call-counting provider used by the unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{CapabilityProvider, ProviderChannels, ProviderEmitters};
use crate::types::{
    AudioStream, DownloadResult, DownloadedFile, InstallRequest, RingerMode, ScheduleKind,
    ScheduledPowerSettings, APP_BRIGHTNESS_SYSTEM,
};

pub(crate) struct FakeState {
    pub(crate) install_permission: bool,
    pub(crate) device_owner: bool,
    pub(crate) dnd_access: bool,
    pub(crate) boot_autostart: bool,
    pub(crate) kiosk_active: bool,
    pub(crate) lock_task_packages: Vec<String>,
    pub(crate) installed: HashSet<String>,
    pub(crate) installs: Vec<InstallRequest>,
    pub(crate) downloads: Vec<DownloadedFile>,
    pub(crate) system_brightness: i32,
    pub(crate) app_brightness: f32,
    pub(crate) volumes: BTreeMap<AudioStream, f32>,
    pub(crate) muted: BTreeMap<AudioStream, bool>,
    pub(crate) global_volume: f32,
    pub(crate) global_muted: bool,
    pub(crate) ringer_mode: RingerMode,
    pub(crate) schedules: HashMap<ScheduleKind, ScheduledPowerSettings>,
    /// When set, schedule writes are stored with this minute instead.
    pub(crate) coerce_minute: Option<u8>,
    pub(crate) observing: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            install_permission: true,
            device_owner: true,
            dnd_access: true,
            boot_autostart: false,
            kiosk_active: false,
            lock_task_packages: Vec::new(),
            installed: HashSet::new(),
            installs: Vec::new(),
            downloads: Vec::new(),
            system_brightness: 128,
            app_brightness: APP_BRIGHTNESS_SYSTEM,
            volumes: BTreeMap::new(),
            muted: BTreeMap::new(),
            global_volume: 0.5,
            global_muted: false,
            ringer_mode: RingerMode::Normal,
            schedules: HashMap::new(),
            coerce_minute: None,
            observing: false,
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeProvider {
    state: Mutex<FakeState>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, ProviderError>>,
    pub(crate) emit: ProviderEmitters,
}

impl FakeProvider {
    pub(crate) fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn calls(&self, operation: &str) -> usize {
        self.calls.lock().unwrap().get(operation).copied().unwrap_or(0)
    }

    pub(crate) fn fail_next(&self, operation: &'static str, err: ProviderError) {
        self.failures.lock().unwrap().insert(operation, err);
    }

    fn record(&self, operation: &'static str) -> ProviderResult<()> {
        *self.calls.lock().unwrap().entry(operation).or_default() += 1;
        match self.failures.lock().unwrap().remove(operation) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CapabilityProvider for FakeProvider {
    fn subscribe(&self) -> Option<ProviderChannels> {
        Some(self.emit.subscribe())
    }

    fn start_kiosk(&self) {
        if self.record("start_kiosk").is_ok() {
            self.state().kiosk_active = true;
        }
    }

    fn stop_kiosk(&self) {
        if self.record("stop_kiosk").is_ok() {
            self.state().kiosk_active = false;
        }
    }

    fn set_boot_autostart(&self, enabled: bool) {
        if self.record("set_boot_autostart").is_ok() {
            self.state().boot_autostart = enabled;
        }
    }

    async fn is_boot_autostart_enabled(&self) -> ProviderResult<bool> {
        self.record("is_boot_autostart_enabled")?;
        Ok(self.state().boot_autostart)
    }

    async fn request_device_owner(&self) -> ProviderResult<()> {
        self.record("request_device_owner")
    }

    async fn is_device_owner(&self) -> ProviderResult<bool> {
        self.record("is_device_owner")?;
        Ok(self.state().device_owner)
    }

    async fn clear_device_owner(&self) -> ProviderResult<bool> {
        self.record("clear_device_owner")?;
        let mut state = self.state();
        let was_owner = state.device_owner;
        state.device_owner = false;
        Ok(was_owner)
    }

    async fn set_lock_task_packages(&self, packages: Vec<String>) -> ProviderResult<bool> {
        self.record("set_lock_task_packages")?;
        let mut state = self.state();
        if !state.device_owner {
            return Ok(false);
        }
        state.lock_task_packages = packages;
        Ok(true)
    }

    async fn has_install_permission(&self) -> ProviderResult<bool> {
        self.record("has_install_permission")?;
        Ok(self.state().install_permission)
    }

    async fn request_install_permission(&self) -> ProviderResult<()> {
        self.record("request_install_permission")
    }

    async fn download(&self, url: &str, file_name: Option<&str>) -> ProviderResult<DownloadResult> {
        self.record("download")?;
        let file_name = file_name
            .map(str::to_string)
            .or_else(|| url.rsplit('/').next().map(str::to_string))
            .unwrap_or_else(|| "package.apk".into());
        let file_path = format!("/data/downloads/{file_name}");
        let file_size = 4096;
        self.state().downloads.push(DownloadedFile {
            file_path: file_path.clone(),
            file_name: file_name.clone(),
            file_size,
            last_modified_unix_millis: 1_700_000_000_000,
        });
        Ok(DownloadResult {
            file_name,
            file_path,
            file_size,
        })
    }

    async fn list_downloaded_files(&self) -> ProviderResult<Vec<DownloadedFile>> {
        self.record("list_downloaded_files")?;
        Ok(self.state().downloads.clone())
    }

    async fn delete_downloaded_file(&self, file_path: &str) -> ProviderResult<bool> {
        self.record("delete_downloaded_file")?;
        let mut state = self.state();
        let before = state.downloads.len();
        state.downloads.retain(|file| file.file_path != file_path);
        Ok(state.downloads.len() != before)
    }

    async fn clear_downloaded_files(&self) -> ProviderResult<u32> {
        self.record("clear_downloaded_files")?;
        let mut state = self.state();
        let count = state.downloads.len() as u32;
        state.downloads.clear();
        Ok(count)
    }

    async fn install(&self, request: InstallRequest) -> ProviderResult<()> {
        self.record("install")?;
        self.state().installs.push(request);
        Ok(())
    }

    async fn is_app_installed(&self, package_name: &str) -> ProviderResult<bool> {
        self.record("is_app_installed")?;
        Ok(self.state().installed.contains(package_name))
    }

    async fn launch_app(&self, _package_name: &str) -> ProviderResult<()> {
        self.record("launch_app")
    }

    async fn system_brightness(&self) -> ProviderResult<i32> {
        self.record("system_brightness")?;
        Ok(self.state().system_brightness)
    }

    async fn set_system_brightness(&self, value: u8) -> ProviderResult<bool> {
        self.record("set_system_brightness")?;
        self.state().system_brightness = i32::from(value);
        Ok(true)
    }

    async fn app_brightness(&self) -> ProviderResult<f32> {
        self.record("app_brightness")?;
        Ok(self.state().app_brightness)
    }

    async fn set_app_brightness(&self, value: f32) -> ProviderResult<bool> {
        self.record("set_app_brightness")?;
        self.state().app_brightness = value;
        Ok(true)
    }

    async fn stream_volume(&self, stream: AudioStream) -> ProviderResult<f32> {
        self.record("stream_volume")?;
        Ok(self.state().volumes.get(&stream).copied().unwrap_or(0.5))
    }

    async fn set_stream_volume(&self, stream: AudioStream, level: f32) -> ProviderResult<bool> {
        self.record("set_stream_volume")?;
        self.state().volumes.insert(stream, level);
        Ok(true)
    }

    async fn global_volume(&self) -> ProviderResult<f32> {
        self.record("global_volume")?;
        Ok(self.state().global_volume)
    }

    async fn set_global_volume(&self, level: f32) -> ProviderResult<bool> {
        self.record("set_global_volume")?;
        self.state().global_volume = level;
        Ok(true)
    }

    async fn is_stream_muted(&self, stream: AudioStream) -> ProviderResult<bool> {
        self.record("is_stream_muted")?;
        Ok(self.state().muted.get(&stream).copied().unwrap_or(false))
    }

    async fn set_stream_muted(&self, stream: AudioStream, muted: bool) -> ProviderResult<bool> {
        self.record("set_stream_muted")?;
        self.state().muted.insert(stream, muted);
        Ok(true)
    }

    async fn is_global_muted(&self) -> ProviderResult<bool> {
        self.record("is_global_muted")?;
        Ok(self.state().global_muted)
    }

    async fn set_global_muted(&self, muted: bool) -> ProviderResult<bool> {
        self.record("set_global_muted")?;
        self.state().global_muted = muted;
        Ok(true)
    }

    async fn ringer_mode(&self) -> ProviderResult<RingerMode> {
        self.record("ringer_mode")?;
        Ok(self.state().ringer_mode)
    }

    async fn set_ringer_mode(&self, mode: RingerMode) -> ProviderResult<bool> {
        self.record("set_ringer_mode")?;
        self.state().ringer_mode = mode;
        Ok(true)
    }

    async fn has_dnd_access(&self) -> ProviderResult<bool> {
        self.record("has_dnd_access")?;
        Ok(self.state().dnd_access)
    }

    async fn request_dnd_access(&self) -> ProviderResult<()> {
        self.record("request_dnd_access")
    }

    async fn start_observing(&self) -> ProviderResult<()> {
        self.record("start_observing")?;
        self.state().observing = true;
        Ok(())
    }

    async fn stop_observing(&self) -> ProviderResult<()> {
        self.record("stop_observing")?;
        self.state().observing = false;
        Ok(())
    }

    async fn set_schedule(
        &self,
        kind: ScheduleKind,
        settings: ScheduledPowerSettings,
    ) -> ProviderResult<bool> {
        self.record("set_schedule")?;
        let mut state = self.state();
        let stored = match state.coerce_minute {
            Some(minute) => ScheduledPowerSettings { minute, ..settings },
            None => settings,
        };
        state.schedules.insert(kind, stored);
        Ok(true)
    }

    async fn schedule(&self, kind: ScheduleKind) -> ProviderResult<Option<ScheduledPowerSettings>> {
        self.record("schedule")?;
        Ok(self.state().schedules.get(&kind).copied())
    }

    async fn cancel_schedule(&self, kind: ScheduleKind) -> ProviderResult<bool> {
        self.record("cancel_schedule")?;
        Ok(self.state().schedules.remove(&kind).is_some())
    }

    async fn shutdown_now(&self) -> ProviderResult<bool> {
        self.record("shutdown_now")?;
        Ok(true)
    }
}
