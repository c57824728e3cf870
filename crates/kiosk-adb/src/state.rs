use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};

use kiosk_core::{AudioStream, ScheduleKind, ScheduledPowerSettings, APP_BRIGHTNESS_SYSTEM};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub(crate) const STATE_FILE_NAME: &str = "kiosk-device.json";

/// Host-side device state that the device itself has no place to keep.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct DeviceState {
    pub(crate) shutdown_schedule: Option<ScheduledPowerSettings>,
    pub(crate) boot_schedule: Option<ScheduledPowerSettings>,
    pub(crate) boot_autostart: bool,
    pub(crate) lock_task_packages: Vec<String>,
    /// Volume index per stream from before it was muted.
    pub(crate) premute_volumes: BTreeMap<AudioStream, i32>,
    pub(crate) global_muted: bool,
    pub(crate) app_brightness: f32,
    /// System brightness to restore when the app override is reset.
    pub(crate) saved_system_brightness: Option<i32>,
    pub(crate) last_boot_id: Option<String>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            shutdown_schedule: None,
            boot_schedule: None,
            boot_autostart: false,
            lock_task_packages: Vec::new(),
            premute_volumes: BTreeMap::new(),
            global_muted: false,
            app_brightness: APP_BRIGHTNESS_SYSTEM,
            saved_system_brightness: None,
            last_boot_id: None,
        }
    }
}

impl DeviceState {
    pub(crate) fn schedule(&self, kind: ScheduleKind) -> Option<ScheduledPowerSettings> {
        match kind {
            ScheduleKind::Shutdown => self.shutdown_schedule,
            ScheduleKind::Boot => self.boot_schedule,
        }
    }

    pub(crate) fn schedule_mut(&mut self, kind: ScheduleKind) -> &mut Option<ScheduledPowerSettings> {
        match kind {
            ScheduleKind::Shutdown => &mut self.shutdown_schedule,
            ScheduleKind::Boot => &mut self.boot_schedule,
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct PersistedState {
    serial: String,
    shutdown_schedule: Option<PersistedSchedule>,
    boot_schedule: Option<PersistedSchedule>,
    boot_autostart: bool,
    lock_task_packages: Vec<String>,
    premute_volumes: BTreeMap<String, i32>,
    global_muted: bool,
    app_brightness: Option<f32>,
    saved_system_brightness: Option<i32>,
    last_boot_id: Option<String>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Default)]
#[serde(default)]
struct PersistedSchedule {
    hour: u8,
    minute: u8,
    repeat: bool,
}

impl PersistedSchedule {
    fn from_settings(settings: ScheduledPowerSettings) -> Self {
        Self {
            hour: settings.hour,
            minute: settings.minute,
            repeat: settings.repeat,
        }
    }

    /// Out-of-range entries from a hand-edited file are dropped.
    fn into_settings(self) -> Option<ScheduledPowerSettings> {
        (self.hour <= 23 && self.minute <= 59).then_some(ScheduledPowerSettings {
            hour: self.hour,
            minute: self.minute,
            repeat: self.repeat,
        })
    }
}

pub(crate) fn state_file_path() -> PathBuf {
    kiosk_util::state_file_path(STATE_FILE_NAME)
}

/// Loads the state saved for `serial`. State written for another device is
/// ignored.
pub(crate) fn load_state(path: &Path, serial: &str) -> DeviceState {
    let parsed: PersistedState = kiosk_util::read_json_or_default(path);
    if !parsed.serial.is_empty() && parsed.serial != serial {
        warn!(
            stored = %parsed.serial,
            serial,
            "device state belongs to another device; starting fresh"
        );
        return DeviceState::default();
    }
    DeviceState {
        shutdown_schedule: parsed
            .shutdown_schedule
            .and_then(PersistedSchedule::into_settings),
        boot_schedule: parsed.boot_schedule.and_then(PersistedSchedule::into_settings),
        boot_autostart: parsed.boot_autostart,
        lock_task_packages: parsed.lock_task_packages,
        premute_volumes: parsed
            .premute_volumes
            .into_iter()
            .filter_map(|(stream, index)| Some((stream.parse::<AudioStream>().ok()?, index)))
            .collect(),
        global_muted: parsed.global_muted,
        app_brightness: parsed.app_brightness.unwrap_or(APP_BRIGHTNESS_SYSTEM),
        saved_system_brightness: parsed.saved_system_brightness,
        last_boot_id: parsed.last_boot_id,
    }
}

pub(crate) fn save_state(path: &Path, serial: &str, state: &DeviceState) -> io::Result<()> {
    let persist = PersistedState {
        serial: serial.to_string(),
        shutdown_schedule: state.shutdown_schedule.map(PersistedSchedule::from_settings),
        boot_schedule: state.boot_schedule.map(PersistedSchedule::from_settings),
        boot_autostart: state.boot_autostart,
        lock_task_packages: state.lock_task_packages.clone(),
        premute_volumes: state
            .premute_volumes
            .iter()
            .map(|(stream, index)| (stream.as_str().to_string(), *index))
            .collect(),
        global_muted: state.global_muted,
        app_brightness: Some(state.app_brightness),
        saved_system_brightness: state.saved_system_brightness,
        last_boot_id: state.last_boot_id.clone(),
    };
    kiosk_util::write_json_atomic(path, &persist)
}

pub(crate) fn save_state_best_effort(path: &Path, serial: &str, state: &DeviceState) {
    if let Err(err) = save_state(path, serial, state) {
        warn!("Failed to persist device state: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_survives_a_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join(STATE_FILE_NAME);
        let mut state = DeviceState::default();
        state.shutdown_schedule = Some(ScheduledPowerSettings {
            hour: 23,
            minute: 5,
            repeat: true,
        });
        state.boot_autostart = true;
        state.lock_task_packages = vec!["com.example.kiosk".into()];
        state.premute_volumes.insert(AudioStream::Music, 9);
        state.app_brightness = 0.25;

        save_state(&path, "R58N12ABCDE", &state).unwrap();
        assert_eq!(load_state(&path, "R58N12ABCDE"), state);
    }

    #[test]
    fn missing_or_foreign_state_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATE_FILE_NAME);
        assert_eq!(load_state(&path, "A"), DeviceState::default());

        let mut state = DeviceState::default();
        state.boot_autostart = true;
        save_state(&path, "A", &state).unwrap();
        assert_eq!(load_state(&path, "B"), DeviceState::default());
    }

    #[test]
    fn out_of_range_schedules_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATE_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"serial":"A","shutdown_schedule":{"hour":30,"minute":0,"repeat":true},"boot_schedule":{"hour":6,"minute":30}}"#,
        )
        .unwrap();
        let state = load_state(&path, "A");
        assert_eq!(state.shutdown_schedule, None);
        assert_eq!(
            state.boot_schedule,
            Some(ScheduledPowerSettings {
                hour: 6,
                minute: 30,
                repeat: false
            })
        );
        assert_eq!(state.app_brightness, APP_BRIGHTNESS_SYSTEM);
    }
}
