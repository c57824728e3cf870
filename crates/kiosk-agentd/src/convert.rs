//! Mapping between domain types and their wire form.

use kiosk_core::{
    AppBrightness, AudioStream, DeviceSnapshot, DownloadProgress, DownloadResult, DownloadedFile,
    InstallState, InstallStatus, InstallStrategy, KioskError, LaunchFailure, PipelineState,
    RingerMode, ScheduleKind, ScheduleOutcome, ScheduledPowerSettings, VolumeChange,
};
use kiosk_proto::kiosk::v1 as pb;
use tonic::Status;

pub(crate) fn status_from_error(err: KioskError) -> Status {
    let message = err.to_string();
    match err {
        KioskError::Validation(_) => Status::invalid_argument(message),
        KioskError::PreconditionNotMet(remediation) => {
            Status::failed_precondition(format!("remediation={remediation}: {message}"))
        }
        KioskError::NotFound(_) => Status::not_found(message),
        KioskError::InFlight => Status::aborted(message),
        KioskError::Provider { .. } | KioskError::CapabilityUnavailable { .. } => {
            Status::unavailable(message)
        }
        KioskError::Launch(LaunchFailure::NoLaunchTarget) => Status::failed_precondition(message),
        KioskError::Launch(LaunchFailure::Exception(_)) => Status::internal(message),
        KioskError::Closed => Status::cancelled(message),
    }
}

#[allow(clippy::result_large_err)]
pub(crate) fn audio_stream_from_proto(value: i32) -> Result<AudioStream, Status> {
    match pb::AudioStream::try_from(value) {
        Ok(pb::AudioStream::Music) => Ok(AudioStream::Music),
        Ok(pb::AudioStream::Ring) => Ok(AudioStream::Ring),
        Ok(pb::AudioStream::Alarm) => Ok(AudioStream::Alarm),
        Ok(pb::AudioStream::Notification) => Ok(AudioStream::Notification),
        Ok(pb::AudioStream::System) => Ok(AudioStream::System),
        Ok(pb::AudioStream::VoiceCall) => Ok(AudioStream::VoiceCall),
        Ok(pb::AudioStream::Dtmf) => Ok(AudioStream::Dtmf),
        Ok(pb::AudioStream::Unspecified) | Err(_) => {
            Err(Status::invalid_argument("stream is required"))
        }
    }
}

pub(crate) fn audio_stream_to_proto(stream: AudioStream) -> pb::AudioStream {
    match stream {
        AudioStream::Music => pb::AudioStream::Music,
        AudioStream::Ring => pb::AudioStream::Ring,
        AudioStream::Alarm => pb::AudioStream::Alarm,
        AudioStream::Notification => pb::AudioStream::Notification,
        AudioStream::System => pb::AudioStream::System,
        AudioStream::VoiceCall => pb::AudioStream::VoiceCall,
        AudioStream::Dtmf => pb::AudioStream::Dtmf,
    }
}

#[allow(clippy::result_large_err)]
pub(crate) fn ringer_mode_from_proto(value: i32) -> Result<RingerMode, Status> {
    match pb::RingerMode::try_from(value) {
        Ok(pb::RingerMode::Silent) => Ok(RingerMode::Silent),
        Ok(pb::RingerMode::Vibrate) => Ok(RingerMode::Vibrate),
        Ok(pb::RingerMode::Normal) => Ok(RingerMode::Normal),
        Ok(pb::RingerMode::Unspecified) | Err(_) => {
            Err(Status::invalid_argument("mode is required"))
        }
    }
}

pub(crate) fn ringer_mode_to_proto(mode: Option<RingerMode>) -> pb::RingerMode {
    match mode {
        Some(RingerMode::Silent) => pb::RingerMode::Silent,
        Some(RingerMode::Vibrate) => pb::RingerMode::Vibrate,
        Some(RingerMode::Normal) => pb::RingerMode::Normal,
        None => pb::RingerMode::Unspecified,
    }
}

/// Unspecified means the standard strategy.
#[allow(clippy::result_large_err)]
pub(crate) fn install_strategy_from_proto(value: i32) -> Result<InstallStrategy, Status> {
    match pb::InstallStrategy::try_from(value) {
        Ok(pb::InstallStrategy::Unspecified | pb::InstallStrategy::Standard) => {
            Ok(InstallStrategy::Standard)
        }
        Ok(pb::InstallStrategy::Silent) => Ok(InstallStrategy::Silent),
        Ok(pb::InstallStrategy::SilentAndLaunch) => Ok(InstallStrategy::SilentAndLaunch),
        Ok(pb::InstallStrategy::SystemSilent) => Ok(InstallStrategy::SystemSilent),
        Err(_) => Err(Status::invalid_argument(format!(
            "unknown install strategy: {value}"
        ))),
    }
}

#[allow(clippy::result_large_err)]
pub(crate) fn schedule_kind_from_proto(value: i32) -> Result<ScheduleKind, Status> {
    match pb::ScheduleKind::try_from(value) {
        Ok(pb::ScheduleKind::Shutdown) => Ok(ScheduleKind::Shutdown),
        Ok(pb::ScheduleKind::Boot) => Ok(ScheduleKind::Boot),
        Ok(pb::ScheduleKind::Unspecified) | Err(_) => {
            Err(Status::invalid_argument("kind must be shutdown or boot"))
        }
    }
}

fn install_state_to_proto(state: InstallState) -> pb::InstallState {
    match state {
        InstallState::Installing => pb::InstallState::Installing,
        InstallState::Installed => pb::InstallState::Installed,
        InstallState::Launching => pb::InstallState::Launching,
        InstallState::Launched => pb::InstallState::Launched,
        InstallState::Failed => pb::InstallState::Failed,
        InstallState::Cancelled => pb::InstallState::Cancelled,
        InstallState::Blocked => pb::InstallState::Blocked,
        InstallState::Conflict => pb::InstallState::Conflict,
        InstallState::Incompatible => pb::InstallState::Incompatible,
        InstallState::Invalid => pb::InstallState::Invalid,
        InstallState::StorageError => pb::InstallState::StorageError,
        InstallState::Timeout => pb::InstallState::Timeout,
        InstallState::Error => pb::InstallState::Error,
        InstallState::LaunchFailed => pb::InstallState::LaunchFailed,
    }
}

pub(crate) fn install_status_to_proto(status: &InstallStatus) -> pb::InstallStatus {
    pb::InstallStatus {
        state: install_state_to_proto(status.state) as i32,
        message: status.message.clone(),
        package_name: status.package_name.clone(),
        progress: status.progress.map(u32::from),
        installing: status.is_installing(),
    }
}

pub(crate) fn download_progress_to_proto(progress: &DownloadProgress) -> pb::DownloadProgress {
    pb::DownloadProgress {
        bytes_read: progress.bytes_read,
        total_bytes: progress.total_bytes,
        progress: u32::from(progress.progress),
    }
}

pub(crate) fn download_result_to_proto(result: &DownloadResult) -> pb::DownloadResult {
    pb::DownloadResult {
        file_name: result.file_name.clone(),
        file_path: result.file_path.clone(),
        file_size: result.file_size,
    }
}

pub(crate) fn downloaded_file_to_proto(file: &DownloadedFile) -> pb::DownloadedFile {
    pb::DownloadedFile {
        file_path: file.file_path.clone(),
        file_name: file.file_name.clone(),
        file_size: file.file_size,
        last_modified_unix_millis: file.last_modified_unix_millis,
    }
}

pub(crate) fn pipeline_state_to_proto(state: &PipelineState) -> pb::PipelineState {
    use pb::pipeline_state::State;
    let state = match state {
        PipelineState::Idle => State::Idle(pb::Empty {}),
        PipelineState::Downloading(progress) => {
            State::Downloading(download_progress_to_proto(progress))
        }
        PipelineState::Downloaded(result) => State::Downloaded(download_result_to_proto(result)),
        PipelineState::Installing(status) => State::Installing(install_status_to_proto(status)),
        PipelineState::Finished(status) => State::Finished(install_status_to_proto(status)),
    };
    pb::PipelineState { state: Some(state) }
}

pub(crate) fn settings_to_proto(settings: ScheduledPowerSettings) -> pb::ScheduledPowerSettings {
    pb::ScheduledPowerSettings {
        hour: u32::from(settings.hour),
        minute: u32::from(settings.minute),
        repeat: settings.repeat,
    }
}

pub(crate) fn schedule_outcome_to_proto(outcome: &ScheduleOutcome) -> pb::ScheduleOutcome {
    pb::ScheduleOutcome {
        requested: Some(settings_to_proto(outcome.requested)),
        accepted: outcome.accepted,
        applied: outcome.applied.map(settings_to_proto),
    }
}

pub(crate) fn app_brightness_to_proto(value: Option<AppBrightness>) -> pb::AppBrightnessResponse {
    match value {
        None => pb::AppBrightnessResponse::default(),
        Some(AppBrightness::System) => pb::AppBrightnessResponse {
            known: true,
            system: true,
            level: kiosk_core::APP_BRIGHTNESS_SYSTEM,
        },
        Some(AppBrightness::Level(level)) => pb::AppBrightnessResponse {
            known: true,
            system: false,
            level,
        },
    }
}

pub(crate) fn volume_change_to_proto(change: &VolumeChange) -> pb::VolumeChange {
    pb::VolumeChange {
        stream: audio_stream_to_proto(change.stream) as i32,
        current: change.current,
        max: change.max,
        level: change.level,
    }
}

pub(crate) fn snapshot_to_proto(snapshot: &DeviceSnapshot) -> pb::DeviceSnapshot {
    pb::DeviceSnapshot {
        system_brightness: snapshot.system_brightness.map(u32::from),
        app_brightness: Some(app_brightness_to_proto(snapshot.app_brightness)),
        stream_volumes: snapshot
            .stream_volumes
            .iter()
            .map(|(stream, level)| pb::StreamLevel {
                stream: audio_stream_to_proto(*stream) as i32,
                level: *level,
            })
            .collect(),
        stream_muted: snapshot
            .stream_muted
            .iter()
            .map(|(stream, muted)| pb::StreamFlag {
                stream: audio_stream_to_proto(*stream) as i32,
                value: *muted,
            })
            .collect(),
        global_volume: snapshot.global_volume,
        global_muted: snapshot.global_muted,
        ringer_mode: ringer_mode_to_proto(snapshot.ringer_mode) as i32,
        shutdown_schedule: snapshot.shutdown_schedule.map(settings_to_proto),
        boot_schedule: snapshot.boot_schedule.map(settings_to_proto),
        last_install_status: snapshot
            .last_install_status
            .as_ref()
            .map(install_status_to_proto),
        installing: snapshot.installing,
    }
}
