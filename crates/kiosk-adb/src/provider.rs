use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use kiosk_core::{
    AudioStream, CapabilityProvider, DownloadResult, DownloadedFile, InstallRequest,
    ProviderChannels, ProviderEmitters, ProviderError, ProviderResult, RingerMode, ScheduleKind,
    ScheduledPowerSettings, APP_BRIGHTNESS_SYSTEM,
};
use tokio::{runtime::Handle, sync::Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adb::{adb_path, wait_for_adb_device, AdbDevice, AdbFailure};
use crate::download::Downloads;
use crate::ids::is_valid_package_name;
use crate::install::{launch, run_install_job};
use crate::observer::DeviceObserver;
use crate::parse::{
    parse_appops_allowed, parse_colon_list, parse_device_owner, parse_settings_int, parse_task_id,
    parse_volume, VolumeReading,
};
use crate::scheduler::run_scheduler;
use crate::state::{load_state, save_state_best_effort, state_file_path, DeviceState};

const INSTALL_OP: &str = "REQUEST_INSTALL_PACKAGES";

#[derive(Clone, Debug)]
pub struct AdbProviderConfig {
    /// Device to bind; the first online device when unset.
    pub serial: Option<String>,
    /// Package of the on-device kiosk app. Install permission, DND access
    /// and boot auto-start are granted to it.
    pub agent_package: Option<String>,
    /// Device admin receiver, `package/.Receiver`, used for device ownership.
    pub admin_component: Option<String>,
    pub downloads_dir: PathBuf,
    pub state_path: PathBuf,
    pub poll_interval: Duration,
    pub command_timeout: Duration,
}

impl Default for AdbProviderConfig {
    fn default() -> Self {
        Self {
            serial: None,
            agent_package: None,
            admin_component: None,
            downloads_dir: kiosk_util::downloads_dir(),
            state_path: state_file_path(),
            poll_interval: Duration::from_secs(2),
            command_timeout: Duration::from_secs(180),
        }
    }
}

/// State shared between the provider and its background tasks.
pub(crate) struct Shared {
    pub(crate) device: AdbDevice,
    pub(crate) emit: ProviderEmitters,
    pub(crate) config: AdbProviderConfig,
    pub(crate) reschedule: Notify,
    state: Mutex<DeviceState>,
}

impl Shared {
    pub(crate) fn read_state<R>(&self, f: impl FnOnce(&DeviceState) -> R) -> R {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }

    /// Applies `f` and persists the result.
    pub(crate) fn update_state<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let out = f(&mut state);
        save_state_best_effort(&self.config.state_path, self.device.serial(), &state);
        out
    }
}

/// Capability provider that drives one Android device over adb.
pub struct AdbProvider {
    shared: Arc<Shared>,
    downloads: Downloads,
    runtime: Handle,
    scheduler: CancellationToken,
    observer: Mutex<Option<CancellationToken>>,
}

impl AdbProvider {
    /// Binds to an online device, polling up to `attempts` times. No device
    /// means the capability layer is absent and the caller should fall back
    /// to the null provider.
    pub async fn connect(
        config: AdbProviderConfig,
        attempts: usize,
    ) -> Result<Self, ProviderError> {
        let serial = wait_for_adb_device(
            config.serial.as_deref(),
            attempts.max(1),
            Duration::from_secs(2),
        )
        .await
        .ok_or_else(|| match &config.serial {
            Some(serial) => ProviderError::Unavailable(format!("device {serial} not online")),
            None => ProviderError::Unavailable("no adb device online".into()),
        })?;
        let device = AdbDevice::new(adb_path(), &serial).with_timeout(config.command_timeout);
        Self::new(device, config)
    }

    /// Must be called inside a tokio runtime; the power scheduler starts
    /// immediately.
    pub fn new(device: AdbDevice, config: AdbProviderConfig) -> Result<Self, ProviderError> {
        let downloads = Downloads::new(config.downloads_dir.clone())?;
        let state = load_state(&config.state_path, device.serial());
        let runtime = Handle::try_current().map_err(|e| {
            ProviderError::Unavailable(format!("adb provider needs a tokio runtime: {e}"))
        })?;
        info!(
            serial = device.serial(),
            downloads = %config.downloads_dir.display(),
            "adb provider bound"
        );
        let shared = Arc::new(Shared {
            device,
            emit: ProviderEmitters::default(),
            config,
            reschedule: Notify::new(),
            state: Mutex::new(state),
        });
        let scheduler = CancellationToken::new();
        runtime.spawn(run_scheduler(shared.clone(), scheduler.clone()));
        Ok(Self {
            shared,
            downloads,
            runtime,
            scheduler,
            observer: Mutex::new(None),
        })
    }

    pub fn serial(&self) -> &str {
        self.shared.device.serial()
    }

    fn device(&self) -> &AdbDevice {
        &self.shared.device
    }

    fn agent_package(&self, purpose: &str) -> ProviderResult<&str> {
        self.shared.config.agent_package.as_deref().ok_or_else(|| {
            ProviderError::rejected(
                "config",
                format!("agent package is not configured; required to {purpose}"),
            )
        })
    }

    fn admin_component(&self) -> ProviderResult<&str> {
        self.shared
            .config
            .admin_component
            .as_deref()
            .ok_or_else(|| ProviderError::rejected("config", "admin component is not configured"))
    }

    async fn shell(&self, args: &[&str]) -> ProviderResult<String> {
        Ok(self.device().shell(args).await?)
    }

    async fn put_setting(&self, namespace: &str, key: &str, value: &str) -> ProviderResult<()> {
        self.shell(&["settings", "put", namespace, key, value]).await?;
        Ok(())
    }

    async fn read_int_setting(&self, namespace: &str, key: &str) -> ProviderResult<i32> {
        let output = self.shell(&["settings", "get", namespace, key]).await?;
        parse_settings_int(&output).ok_or_else(|| {
            ProviderError::rejected(
                "parse",
                format!("unexpected {namespace}/{key} value: {output}"),
            )
        })
    }

    async fn read_volume(&self, stream: AudioStream) -> ProviderResult<VolumeReading> {
        let id = stream.android_stream_id().to_string();
        let output = self
            .shell(&["cmd", "media_session", "volume", "--stream", id.as_str(), "--get"])
            .await?;
        parse_volume(&output).ok_or_else(|| {
            ProviderError::rejected(
                "parse",
                format!("unexpected volume output for {stream}: {output}"),
            )
        })
    }

    async fn write_volume(&self, stream: AudioStream, index: i32) -> ProviderResult<()> {
        let id = stream.android_stream_id().to_string();
        let index = index.to_string();
        self.shell(&[
            "cmd",
            "media_session",
            "volume",
            "--stream",
            id.as_str(),
            "--set",
            index.as_str(),
        ])
        .await?;
        Ok(())
    }

    async fn write_brightness(&self, value: i32) -> ProviderResult<()> {
        // Manual mode, otherwise adaptive brightness overwrites the value.
        self.put_setting("system", "screen_brightness_mode", "0").await?;
        self.put_setting("system", "screen_brightness", &value.to_string())
            .await
    }

    async fn mute_stream(&self, stream: AudioStream) -> ProviderResult<()> {
        if self.shared.read_state(|s| s.premute_volumes.contains_key(&stream)) {
            return Ok(());
        }
        let reading = self.read_volume(stream).await?;
        self.write_volume(stream, reading.min).await?;
        self.shared
            .update_state(|s| s.premute_volumes.insert(stream, reading.current));
        Ok(())
    }

    async fn unmute_stream(&self, stream: AudioStream) -> ProviderResult<()> {
        let Some(index) = self.shared.read_state(|s| s.premute_volumes.get(&stream).copied()) else {
            return Ok(());
        };
        self.write_volume(stream, index).await?;
        self.shared.update_state(|s| s.premute_volumes.remove(&stream));
        Ok(())
    }

    fn spawn_shell(&self, label: &'static str, args: Vec<String>) {
        let device = self.device().clone();
        self.runtime.spawn(async move {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            if let Err(err) = device.shell(&args).await {
                warn!("{label} failed: {err}");
            }
        });
    }
}

impl Drop for AdbProvider {
    fn drop(&mut self) {
        self.scheduler.cancel();
        if let Some(token) = self.observer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            token.cancel();
        }
    }
}

fn is_missing_package(err: &AdbFailure) -> bool {
    matches!(err, AdbFailure::Exit { .. }) && !err.is_transport()
}

#[async_trait]
impl CapabilityProvider for AdbProvider {
    fn subscribe(&self) -> Option<ProviderChannels> {
        Some(self.shared.emit.subscribe())
    }

    fn start_kiosk(&self) {
        let device = self.device().clone();
        self.runtime.spawn(async move {
            let task = match device.shell(&["am", "stack", "list"]).await {
                Ok(output) => parse_task_id(&output),
                Err(err) => {
                    warn!("start kiosk: task lookup failed: {err}");
                    return;
                }
            };
            let Some(task) = task else {
                warn!("start kiosk: no foreground task to pin");
                return;
            };
            let task = task.to_string();
            match device.shell(&["am", "task", "lock", task.as_str()]).await {
                Ok(_) => info!(task = %task, "lock task mode entered"),
                Err(err) => warn!("start kiosk failed: {err}"),
            }
        });
    }

    fn stop_kiosk(&self) {
        self.spawn_shell(
            "stop kiosk",
            vec!["am".into(), "task".into(), "lock".into(), "stop".into()],
        );
    }

    fn set_boot_autostart(&self, enabled: bool) {
        self.shared.update_state(|s| s.boot_autostart = enabled);
        info!(enabled, "boot auto-start updated");
    }

    async fn is_boot_autostart_enabled(&self) -> ProviderResult<bool> {
        Ok(self.shared.read_state(|s| s.boot_autostart))
    }

    async fn request_device_owner(&self) -> ProviderResult<()> {
        let component = self.admin_component()?;
        self.shell(&["dpm", "set-device-owner", component]).await?;
        info!(component, "device owner set");
        Ok(())
    }

    async fn is_device_owner(&self) -> ProviderResult<bool> {
        let output = self.shell(&["dpm", "list-owners"]).await?;
        let owner = parse_device_owner(&output);
        Ok(match (&owner, self.shared.config.admin_component.as_deref()) {
            (Some(owner), Some(component)) => owner == component,
            (Some(_), None) => true,
            (None, _) => false,
        })
    }

    async fn clear_device_owner(&self) -> ProviderResult<bool> {
        if !self.is_device_owner().await? {
            return Ok(false);
        }
        let component = self.admin_component()?;
        self.shell(&["dpm", "remove-active-admin", component]).await?;
        info!(component, "device owner cleared");
        Ok(true)
    }

    async fn set_lock_task_packages(&self, packages: Vec<String>) -> ProviderResult<bool> {
        if let Some(bad) = packages.iter().find(|p| !is_valid_package_name(p)) {
            return Err(ProviderError::rejected(
                "invalid_package",
                format!("not a package name: {bad}"),
            ));
        }
        self.shared.update_state(|s| s.lock_task_packages = packages);
        Ok(true)
    }

    async fn has_install_permission(&self) -> ProviderResult<bool> {
        // Without an agent package the shell user installs, which is always
        // permitted.
        let Some(package) = self.shared.config.agent_package.as_deref() else {
            return Ok(true);
        };
        let output = self.shell(&["appops", "get", package, INSTALL_OP]).await?;
        Ok(parse_appops_allowed(&output, INSTALL_OP))
    }

    async fn request_install_permission(&self) -> ProviderResult<()> {
        let package = self.agent_package("grant install permission")?;
        self.shell(&["appops", "set", package, INSTALL_OP, "allow"])
            .await?;
        Ok(())
    }

    async fn download(&self, url: &str, file_name: Option<&str>) -> ProviderResult<DownloadResult> {
        self.downloads.fetch(url, file_name, &self.shared.emit).await
    }

    async fn list_downloaded_files(&self) -> ProviderResult<Vec<DownloadedFile>> {
        self.downloads.list()
    }

    async fn delete_downloaded_file(&self, file_path: &str) -> ProviderResult<bool> {
        self.downloads.delete(file_path)
    }

    async fn clear_downloaded_files(&self) -> ProviderResult<u32> {
        self.downloads.clear()
    }

    async fn install(&self, request: InstallRequest) -> ProviderResult<()> {
        if !Path::new(&request.file_path).is_file() {
            return Err(ProviderError::NotFound(request.file_path));
        }
        let installer = self.shared.config.agent_package.clone();
        self.runtime.spawn(run_install_job(
            self.device().clone(),
            self.shared.emit.clone(),
            request,
            installer,
        ));
        Ok(())
    }

    async fn is_app_installed(&self, package_name: &str) -> ProviderResult<bool> {
        // `pm path` exits non-zero for unknown packages.
        match self.device().shell(&["pm", "path", package_name]).await {
            Ok(output) => Ok(output.lines().any(|line| line.starts_with("package:"))),
            Err(err) if is_missing_package(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn launch_app(&self, package_name: &str) -> ProviderResult<()> {
        if !self.is_app_installed(package_name).await? {
            return Err(ProviderError::NotFound(package_name.to_string()));
        }
        launch(self.device(), package_name).await
    }

    async fn system_brightness(&self) -> ProviderResult<i32> {
        if let Some(saved) = self.shared.read_state(|s| s.saved_system_brightness) {
            return Ok(saved);
        }
        self.read_int_setting("system", "screen_brightness").await
    }

    async fn set_system_brightness(&self, value: u8) -> ProviderResult<bool> {
        let value = i32::from(value);
        // An active app override owns the screen; the new system value is
        // applied when the override is reset.
        let overridden = self.shared.update_state(|s| match s.saved_system_brightness {
            Some(_) => {
                s.saved_system_brightness = Some(value);
                true
            }
            None => false,
        });
        if !overridden {
            self.write_brightness(value).await?;
        }
        Ok(true)
    }

    async fn app_brightness(&self) -> ProviderResult<f32> {
        Ok(self.shared.read_state(|s| s.app_brightness))
    }

    async fn set_app_brightness(&self, value: f32) -> ProviderResult<bool> {
        if value < 0.0 {
            if let Some(saved) = self.shared.read_state(|s| s.saved_system_brightness) {
                self.write_brightness(saved).await?;
            }
            self.shared.update_state(|s| {
                s.app_brightness = APP_BRIGHTNESS_SYSTEM;
                s.saved_system_brightness = None;
            });
            return Ok(true);
        }
        let value = value.clamp(0.0, 1.0);
        if self.shared.read_state(|s| s.saved_system_brightness.is_none()) {
            let current = self.read_int_setting("system", "screen_brightness").await?;
            self.shared
                .update_state(|s| s.saved_system_brightness = Some(current));
        }
        self.write_brightness((value * 255.0).round() as i32).await?;
        self.shared.update_state(|s| s.app_brightness = value);
        Ok(true)
    }

    async fn stream_volume(&self, stream: AudioStream) -> ProviderResult<f32> {
        Ok(self.read_volume(stream).await?.level())
    }

    async fn set_stream_volume(&self, stream: AudioStream, level: f32) -> ProviderResult<bool> {
        let reading = self.read_volume(stream).await?;
        self.write_volume(stream, reading.index_for(level)).await?;
        // An explicit volume ends any mute on the stream.
        self.shared.update_state(|s| s.premute_volumes.remove(&stream));
        Ok(true)
    }

    async fn global_volume(&self) -> ProviderResult<f32> {
        self.stream_volume(AudioStream::Music).await
    }

    async fn set_global_volume(&self, level: f32) -> ProviderResult<bool> {
        self.set_stream_volume(AudioStream::Music, level).await
    }

    async fn is_stream_muted(&self, stream: AudioStream) -> ProviderResult<bool> {
        Ok(self.shared.read_state(|s| s.premute_volumes.contains_key(&stream)))
    }

    async fn set_stream_muted(&self, stream: AudioStream, muted: bool) -> ProviderResult<bool> {
        if muted {
            self.mute_stream(stream).await?;
        } else {
            self.unmute_stream(stream).await?;
        }
        Ok(true)
    }

    async fn is_global_muted(&self) -> ProviderResult<bool> {
        Ok(self.shared.read_state(|s| s.global_muted))
    }

    async fn set_global_muted(&self, muted: bool) -> ProviderResult<bool> {
        let mut switched = Vec::new();
        for stream in AudioStream::ALL {
            if self.shared.read_state(|s| s.premute_volumes.contains_key(&stream)) == muted {
                continue;
            }
            if let Err(err) = self.set_stream_muted(stream, muted).await {
                // Put the streams already switched back so they agree with the flag.
                for done in switched.into_iter().rev() {
                    if let Err(undo) = self.set_stream_muted(done, !muted).await {
                        warn!(stream = done.as_str(), "global mute rollback failed: {undo}");
                    }
                }
                return Err(err);
            }
            switched.push(stream);
        }
        self.shared.update_state(|s| s.global_muted = muted);
        Ok(true)
    }

    async fn ringer_mode(&self) -> ProviderResult<RingerMode> {
        let value = self.read_int_setting("global", "mode_ringer").await?;
        RingerMode::from_android_value(value)
            .ok_or_else(|| ProviderError::rejected("parse", format!("unknown ringer mode {value}")))
    }

    async fn set_ringer_mode(&self, mode: RingerMode) -> ProviderResult<bool> {
        let name = mode.as_str().to_ascii_uppercase();
        match self
            .device()
            .shell(&["cmd", "audio", "set-ringer-mode", name.as_str()])
            .await
        {
            Ok(_) => {}
            // Older releases lack the audio shell command; the setting still
            // drives the ringer there.
            Err(err) if !err.is_transport() => {
                self.put_setting("global", "mode_ringer", &mode.android_value().to_string())
                    .await?;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(true)
    }

    async fn has_dnd_access(&self) -> ProviderResult<bool> {
        let Some(package) = self.shared.config.agent_package.as_deref() else {
            return Ok(true);
        };
        let output = self
            .shell(&[
                "settings",
                "get",
                "secure",
                "enabled_notification_policy_access_packages",
            ])
            .await?;
        Ok(parse_colon_list(&output).iter().any(|p| p == package))
    }

    async fn request_dnd_access(&self) -> ProviderResult<()> {
        let package = self.agent_package("grant do-not-disturb access")?;
        self.shell(&["cmd", "notification", "allow_dnd", package])
            .await?;
        Ok(())
    }

    async fn start_observing(&self) -> ProviderResult<()> {
        let mut slot = self.observer.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Ok(());
        }
        let token = CancellationToken::new();
        let observer = DeviceObserver::new(
            self.device().clone(),
            self.shared.emit.clone(),
            token.clone(),
        )
        .with_poll_interval(self.shared.config.poll_interval);
        self.runtime.spawn(observer.run());
        *slot = Some(token);
        Ok(())
    }

    async fn stop_observing(&self) -> ProviderResult<()> {
        if let Some(token) = self.observer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            token.cancel();
        }
        Ok(())
    }

    async fn set_schedule(
        &self,
        kind: ScheduleKind,
        settings: ScheduledPowerSettings,
    ) -> ProviderResult<bool> {
        self.shared
            .update_state(|s| *s.schedule_mut(kind) = Some(settings));
        self.shared.reschedule.notify_one();
        info!(
            kind = kind.as_str(),
            hour = settings.hour,
            minute = settings.minute,
            repeat = settings.repeat,
            "power schedule stored"
        );
        Ok(true)
    }

    async fn schedule(&self, kind: ScheduleKind) -> ProviderResult<Option<ScheduledPowerSettings>> {
        Ok(self.shared.read_state(|s| s.schedule(kind)))
    }

    async fn cancel_schedule(&self, kind: ScheduleKind) -> ProviderResult<bool> {
        let removed = self.shared.update_state(|s| s.schedule_mut(kind).take().is_some());
        self.shared.reschedule.notify_one();
        Ok(removed)
    }

    async fn shutdown_now(&self) -> ProviderResult<bool> {
        info!(serial = self.serial(), "powering off device");
        self.shell(&["reboot", "-p"]).await?;
        Ok(true)
    }
}
