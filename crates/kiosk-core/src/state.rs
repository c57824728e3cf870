use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use crate::types::{
    AppBrightness, AudioStream, DownloadProgress, DownloadResult, InstallStatus, RingerMode,
    ScheduleKind, ScheduledPowerSettings,
};

/// Where the acquisition/installation pipeline currently stands.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum PipelineState {
    #[default]
    Idle,
    Downloading(DownloadProgress),
    Downloaded(DownloadResult),
    Installing(InstallStatus),
    Finished(InstallStatus),
}

impl PipelineState {
    pub fn is_installing(&self) -> bool {
        matches!(self, PipelineState::Installing(_))
    }
}

/// Last-known device values. Every field is provisional until the next
/// query or push event confirms it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceSnapshot {
    pub system_brightness: Option<u8>,
    pub app_brightness: Option<AppBrightness>,
    pub stream_volumes: BTreeMap<AudioStream, f32>,
    pub stream_muted: BTreeMap<AudioStream, bool>,
    pub global_volume: Option<f32>,
    pub global_muted: Option<bool>,
    pub ringer_mode: Option<RingerMode>,
    pub shutdown_schedule: Option<ScheduledPowerSettings>,
    pub boot_schedule: Option<ScheduledPowerSettings>,
    pub last_install_status: Option<InstallStatus>,
    pub installing: bool,
}

/// Session state shared by the pipeline, normalizer, schedule contract and
/// the channel pumps.
pub struct SharedState {
    snapshot: Mutex<DeviceSnapshot>,
    pipeline: Mutex<PipelineState>,
    /// Dropped on [`close`](Self::close) so pending waiters wake up.
    install_tx: Mutex<Option<watch::Sender<Option<InstallStatus>>>>,
}

impl Default for SharedState {
    fn default() -> Self {
        let (install_tx, _) = watch::channel(None);
        Self {
            snapshot: Mutex::new(DeviceSnapshot::default()),
            pipeline: Mutex::new(PipelineState::Idle),
            install_tx: Mutex::new(Some(install_tx)),
        }
    }
}

impl SharedState {
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.lock_snapshot().clone()
    }

    pub fn pipeline(&self) -> PipelineState {
        self.lock_pipeline().clone()
    }

    pub(crate) fn update(&self, apply: impl FnOnce(&mut DeviceSnapshot)) {
        apply(&mut *self.lock_snapshot());
    }

    pub(crate) fn set_pipeline(&self, next: PipelineState) {
        *self.lock_pipeline() = next;
    }

    pub(crate) fn record_download_progress(&self, progress: DownloadProgress) {
        let mut pipeline = self.lock_pipeline();
        // Stray progress after the download finished must not roll the state back.
        if matches!(*pipeline, PipelineState::Idle | PipelineState::Downloading(_)) {
            *pipeline = PipelineState::Downloading(progress);
        }
    }

    pub(crate) fn record_install_status(&self, status: InstallStatus) {
        {
            let mut snapshot = self.lock_snapshot();
            snapshot.installing = status.is_installing();
            snapshot.last_install_status = Some(status.clone());
        }
        self.set_pipeline(if status.is_installing() {
            PipelineState::Installing(status.clone())
        } else {
            PipelineState::Finished(status.clone())
        });
        if let Some(tx) = self.lock_install_tx().as_ref() {
            tx.send_replace(Some(status));
        }
    }

    pub(crate) fn set_schedule(&self, kind: ScheduleKind, value: Option<ScheduledPowerSettings>) {
        self.update(|snapshot| match kind {
            ScheduleKind::Shutdown => snapshot.shutdown_schedule = value,
            ScheduleKind::Boot => snapshot.boot_schedule = value,
        });
    }

    /// `None` once the state has been closed.
    pub(crate) fn install_updates(&self) -> Option<watch::Receiver<Option<InstallStatus>>> {
        self.lock_install_tx().as_ref().map(watch::Sender::subscribe)
    }

    /// Ends install status delivery. Waiters observe a closed channel.
    pub(crate) fn close(&self) {
        self.lock_install_tx().take();
    }

    fn lock_snapshot(&self) -> MutexGuard<'_, DeviceSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_install_tx(&self) -> MutexGuard<'_, Option<watch::Sender<Option<InstallStatus>>>> {
        self.install_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_pipeline(&self) -> MutexGuard<'_, PipelineState> {
        self.pipeline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InstallState;

    #[test]
    fn install_status_drives_flag_and_pipeline() {
        let state = SharedState::default();
        state.record_install_status(InstallStatus::new(InstallState::Installing));
        assert!(state.snapshot().installing);
        assert!(state.pipeline().is_installing());

        state.record_install_status(InstallStatus::new(InstallState::Conflict));
        assert!(!state.snapshot().installing);
        assert_eq!(
            state.pipeline(),
            PipelineState::Finished(InstallStatus::new(InstallState::Conflict))
        );
    }

    #[test]
    fn late_progress_does_not_rewind_pipeline() {
        let state = SharedState::default();
        state.record_download_progress(DownloadProgress::new(1, 2));
        let result = DownloadResult {
            file_name: "a.apk".into(),
            file_path: "/tmp/a.apk".into(),
            file_size: 2,
        };
        state.set_pipeline(PipelineState::Downloaded(result.clone()));
        state.record_download_progress(DownloadProgress::new(2, 2));
        assert_eq!(state.pipeline(), PipelineState::Downloaded(result));
    }

    #[test]
    fn closing_ends_install_updates() {
        let state = SharedState::default();
        let mut updates = state.install_updates().unwrap();
        state.close();
        assert!(state.install_updates().is_none());
        assert!(updates.has_changed().is_err());

        // Statuses recorded after close still reach the snapshot.
        state.record_install_status(InstallStatus::new(InstallState::Installed));
        assert_eq!(
            state.snapshot().last_install_status,
            Some(InstallStatus::new(InstallState::Installed))
        );
    }
}
