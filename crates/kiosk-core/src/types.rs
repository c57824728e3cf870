use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Sentinel stored by the provider when the app does not override the system
/// brightness.
pub const APP_BRIGHTNESS_SYSTEM: f32 = -1.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub bytes_read: u64,
    pub total_bytes: u64,
    pub progress: u8,
}

impl DownloadProgress {
    pub fn new(bytes_read: u64, total_bytes: u64) -> Self {
        let progress = if total_bytes == 0 {
            0
        } else {
            ((bytes_read.min(total_bytes) * 100) / total_bytes) as u8
        };
        Self {
            bytes_read,
            total_bytes,
            progress,
        }
    }

    pub(crate) fn normalized(self) -> Self {
        Self {
            progress: self.progress.min(100),
            ..self
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub file_name: String,
    pub file_path: String,
    pub file_size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedFile {
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub last_modified_unix_millis: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    Installing,
    Installed,
    Launching,
    Launched,
    Failed,
    Cancelled,
    Blocked,
    Conflict,
    Incompatible,
    Invalid,
    StorageError,
    Timeout,
    Error,
    LaunchFailed,
}

impl InstallState {
    pub const ALL: [InstallState; 14] = [
        InstallState::Installing,
        InstallState::Installed,
        InstallState::Launching,
        InstallState::Launched,
        InstallState::Failed,
        InstallState::Cancelled,
        InstallState::Blocked,
        InstallState::Conflict,
        InstallState::Incompatible,
        InstallState::Invalid,
        InstallState::StorageError,
        InstallState::Timeout,
        InstallState::Error,
        InstallState::LaunchFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InstallState::Installing => "installing",
            InstallState::Installed => "installed",
            InstallState::Launching => "launching",
            InstallState::Launched => "launched",
            InstallState::Failed => "failed",
            InstallState::Cancelled => "cancelled",
            InstallState::Blocked => "blocked",
            InstallState::Conflict => "conflict",
            InstallState::Incompatible => "incompatible",
            InstallState::Invalid => "invalid",
            InstallState::StorageError => "storage_error",
            InstallState::Timeout => "timeout",
            InstallState::Error => "error",
            InstallState::LaunchFailed => "launch_failed",
        }
    }

    /// No further transition follows a terminal state for the same attempt.
    pub fn is_terminal(self) -> bool {
        !is_installing(self)
    }
}

/// True exactly while an installation attempt is still moving.
pub fn is_installing(state: InstallState) -> bool {
    matches!(state, InstallState::Installing | InstallState::Launching)
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        InstallState::ALL
            .into_iter()
            .find(|state| state.as_str() == value)
            .ok_or_else(|| format!("unknown install status: {value}"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallStatus {
    pub state: InstallState,
    pub message: Option<String>,
    pub package_name: Option<String>,
    pub progress: Option<u8>,
}

impl InstallStatus {
    pub fn new(state: InstallState) -> Self {
        Self {
            state,
            message: None,
            package_name: None,
            progress: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_package(mut self, package_name: impl Into<String>) -> Self {
        self.package_name = Some(package_name.into());
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_installing(&self) -> bool {
        is_installing(self.state)
    }

    pub(crate) fn normalized(mut self) -> Self {
        self.progress = self.progress.map(|value| value.min(100));
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledPowerSettings {
    pub hour: u8,
    pub minute: u8,
    pub repeat: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleKind {
    Shutdown,
    Boot,
}

impl ScheduleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleKind::Shutdown => "shutdown",
            ScheduleKind::Boot => "boot",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioStream {
    Music,
    Ring,
    Alarm,
    Notification,
    System,
    VoiceCall,
    Dtmf,
}

impl AudioStream {
    pub const ALL: [AudioStream; 7] = [
        AudioStream::Music,
        AudioStream::Ring,
        AudioStream::Alarm,
        AudioStream::Notification,
        AudioStream::System,
        AudioStream::VoiceCall,
        AudioStream::Dtmf,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AudioStream::Music => "music",
            AudioStream::Ring => "ring",
            AudioStream::Alarm => "alarm",
            AudioStream::Notification => "notification",
            AudioStream::System => "system",
            AudioStream::VoiceCall => "voice_call",
            AudioStream::Dtmf => "dtmf",
        }
    }

    /// Android `AudioManager.STREAM_*` constant.
    pub fn android_stream_id(self) -> i32 {
        match self {
            AudioStream::VoiceCall => 0,
            AudioStream::System => 1,
            AudioStream::Ring => 2,
            AudioStream::Music => 3,
            AudioStream::Alarm => 4,
            AudioStream::Notification => 5,
            AudioStream::Dtmf => 8,
        }
    }

    pub fn from_android_stream_id(id: i32) -> Option<Self> {
        AudioStream::ALL
            .into_iter()
            .find(|stream| stream.android_stream_id() == id)
    }
}

impl fmt::Display for AudioStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioStream {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        AudioStream::ALL
            .into_iter()
            .find(|stream| stream.as_str() == value)
            .ok_or_else(|| format!("unknown audio stream: {value}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingerMode {
    Silent,
    Vibrate,
    Normal,
}

impl RingerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RingerMode::Silent => "silent",
            RingerMode::Vibrate => "vibrate",
            RingerMode::Normal => "normal",
        }
    }

    /// Android `AudioManager.RINGER_MODE_*` constant.
    pub fn android_value(self) -> i32 {
        match self {
            RingerMode::Silent => 0,
            RingerMode::Vibrate => 1,
            RingerMode::Normal => 2,
        }
    }

    pub fn from_android_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(RingerMode::Silent),
            1 => Some(RingerMode::Vibrate),
            2 => Some(RingerMode::Normal),
            _ => None,
        }
    }
}

impl fmt::Display for RingerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RingerMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(RingerMode::Silent),
            "vibrate" => Ok(RingerMode::Vibrate),
            "normal" => Ok(RingerMode::Normal),
            other => Err(format!("unknown ringer mode: {other}")),
        }
    }
}

/// App-level brightness: either a window override or deferral to the system
/// setting.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum AppBrightness {
    System,
    Level(f32),
}

impl AppBrightness {
    pub fn as_raw(self) -> f32 {
        match self {
            AppBrightness::System => APP_BRIGHTNESS_SYSTEM,
            AppBrightness::Level(level) => level,
        }
    }
}

/// Per-stream volume change as pushed by the provider.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeChange {
    pub stream: AudioStream,
    pub current: i32,
    pub max: i32,
    pub level: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstallStrategy {
    Standard,
    Silent,
    SilentAndLaunch,
    SystemSilent,
}

impl InstallStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallStrategy::Standard => "standard",
            InstallStrategy::Silent => "silent",
            InstallStrategy::SilentAndLaunch => "silent_and_launch",
            InstallStrategy::SystemSilent => "system_silent",
        }
    }

    pub fn requires_device_owner(self) -> bool {
        !matches!(self, InstallStrategy::Standard)
    }

    pub fn launches(self) -> bool {
        matches!(self, InstallStrategy::SilentAndLaunch)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallRequest {
    pub file_path: String,
    pub strategy: InstallStrategy,
    pub package_name: Option<String>,
}
