use std::sync::Arc;

use kiosk_core::{InstallStrategy, KioskAgent, KioskError, ObserverRef};
use kiosk_proto::kiosk::v1::{
    kiosk_service_server::KioskService, Ack, AppBrightnessResponse,
    BrightnessEvent, BrightnessResponse, CountResponse, DeleteDownloadedFileRequest,
    DeviceSnapshot, DownloadAndInstallRequest, DownloadProgress, DownloadRequest, DownloadResult,
    Empty, FlagResponse, InstallRequest, InstallStatus, LevelEvent, LevelResponse,
    ListDownloadedFilesResponse, PackageRequest, PipelineState, RingerModeEvent,
    RingerModeResponse, ScheduleOutcome, ScheduleRequest, ScheduleResponse, SetFlagRequest,
    SetLevelRequest, SetLockTaskPackagesRequest, SetMutedRequest, SetRingerModeRequest,
    SetScheduleRequest, SetSystemBrightnessRequest, SetVolumeRequest, ShutdownRequest,
    StreamRequest, VolumeChange,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use crate::convert::{
    app_brightness_to_proto, audio_stream_from_proto, download_progress_to_proto,
    download_result_to_proto, downloaded_file_to_proto, install_status_to_proto,
    install_strategy_from_proto, pipeline_state_to_proto, ringer_mode_from_proto,
    ringer_mode_to_proto, schedule_kind_from_proto, schedule_outcome_to_proto,
    settings_to_proto, snapshot_to_proto, status_from_error, volume_change_to_proto,
};

const STREAM_BUFFER: usize = 256;

type EventStream<M> = ReceiverStream<Result<M, Status>>;

#[derive(Clone)]
pub(crate) struct Svc {
    agent: Arc<KioskAgent>,
}

impl Svc {
    pub(crate) fn new(agent: Arc<KioskAgent>) -> Self {
        Self { agent }
    }

    /// Attaches a forwarding observer for one stream. The observer is
    /// detached once the client hangs up.
    fn open_stream<T, M>(
        &self,
        channel: &'static str,
        map: fn(&T) -> M,
        attach: fn(&KioskAgent, ObserverRef<T>) -> bool,
        detach: fn(&KioskAgent, &ObserverRef<T>) -> bool,
    ) -> EventStream<M>
    where
        T: 'static,
        M: Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Result<M, Status>>(STREAM_BUFFER);
        let sink = tx.clone();
        let observer: ObserverRef<T> = Arc::new(move |event: &T| {
            // Observers run on the channel pump; a slow client loses events
            // instead of stalling delivery to everyone else.
            if let Err(mpsc::error::TrySendError::Full(_)) = sink.try_send(Ok(map(event))) {
                debug!(channel, "stream client lagging; event dropped");
            }
        });
        attach(&*self.agent, observer.clone());
        info!(channel, "event stream opened");

        let agent = Arc::clone(&self.agent);
        tokio::spawn(async move {
            tx.closed().await;
            detach(&*agent, &observer);
            info!(channel, "event stream closed");
        });
        ReceiverStream::new(rx)
    }
}

fn ok<T>(value: T) -> Result<Response<T>, Status> {
    Ok(Response::new(value))
}

fn flag(result: Result<bool, KioskError>) -> Result<Response<FlagResponse>, Status> {
    let value = result.map_err(status_from_error)?;
    ok(FlagResponse { value })
}

fn ack(result: Result<(), KioskError>) -> Result<Response<Ack>, Status> {
    result.map_err(status_from_error)?;
    ok(Ack {})
}

#[tonic::async_trait]
impl KioskService for Svc {
    async fn start_kiosk(&self, _request: Request<Empty>) -> Result<Response<Ack>, Status> {
        self.agent.start_kiosk();
        ok(Ack {})
    }

    async fn stop_kiosk(&self, _request: Request<Empty>) -> Result<Response<Ack>, Status> {
        self.agent.stop_kiosk();
        ok(Ack {})
    }

    async fn set_boot_autostart(
        &self,
        request: Request<SetFlagRequest>,
    ) -> Result<Response<Ack>, Status> {
        self.agent.set_boot_autostart(request.into_inner().enabled);
        ok(Ack {})
    }

    async fn get_boot_autostart(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(self.agent.is_boot_autostart_enabled().await)
    }

    async fn request_device_owner(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Ack>, Status> {
        ack(self.agent.request_device_owner().await)
    }

    async fn get_device_owner(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(self.agent.is_device_owner().await)
    }

    async fn clear_device_owner(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(self.agent.clear_device_owner().await)
    }

    async fn set_lock_task_packages(
        &self,
        request: Request<SetLockTaskPackagesRequest>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(
            self.agent
                .set_lock_task_packages(request.into_inner().packages)
                .await,
        )
    }

    async fn download(
        &self,
        request: Request<DownloadRequest>,
    ) -> Result<Response<DownloadResult>, Status> {
        let req = request.into_inner();
        let result = self
            .agent
            .pipeline()
            .download(&req.url, req.file_name.as_deref())
            .await
            .map_err(status_from_error)?;
        ok(download_result_to_proto(&result))
    }

    async fn install(&self, request: Request<InstallRequest>) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let strategy = install_strategy_from_proto(req.strategy)?;
        ack(self
            .agent
            .pipeline()
            .install_with(&req.file_path, strategy, req.package_name.as_deref())
            .await)
    }

    async fn download_and_install(
        &self,
        request: Request<DownloadAndInstallRequest>,
    ) -> Result<Response<DownloadResult>, Status> {
        let req = request.into_inner();
        let pipeline = self.agent.pipeline();
        let result = match install_strategy_from_proto(req.strategy)? {
            InstallStrategy::Standard => pipeline.download_and_install(&req.url).await,
            InstallStrategy::Silent => {
                pipeline
                    .download_and_silent_install(&req.url, false, req.package_name.as_deref())
                    .await
            }
            InstallStrategy::SilentAndLaunch => {
                pipeline
                    .download_and_silent_install(&req.url, true, req.package_name.as_deref())
                    .await
            }
            InstallStrategy::SystemSilent => {
                return Err(Status::invalid_argument(
                    "system silent install needs a downloaded file; use Download then Install",
                ))
            }
        }
        .map_err(status_from_error)?;
        ok(download_result_to_proto(&result))
    }

    async fn get_install_permission(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(self.agent.pipeline().has_install_permission().await)
    }

    async fn request_install_permission(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Ack>, Status> {
        ack(self.agent.pipeline().request_install_permission().await)
    }

    async fn list_downloaded_files(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<ListDownloadedFilesResponse>, Status> {
        let files = self
            .agent
            .pipeline()
            .list_downloaded_files()
            .await
            .map_err(status_from_error)?;
        ok(ListDownloadedFilesResponse {
            files: files.iter().map(downloaded_file_to_proto).collect(),
        })
    }

    async fn delete_downloaded_file(
        &self,
        request: Request<DeleteDownloadedFileRequest>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(
            self.agent
                .pipeline()
                .delete_downloaded_file(&request.into_inner().file_path)
                .await,
        )
    }

    async fn clear_downloaded_files(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<CountResponse>, Status> {
        let count = self
            .agent
            .pipeline()
            .clear_downloaded_files()
            .await
            .map_err(status_from_error)?;
        ok(CountResponse { count })
    }

    async fn is_app_installed(
        &self,
        request: Request<PackageRequest>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(
            self.agent
                .pipeline()
                .is_app_installed(&request.into_inner().package_name)
                .await,
        )
    }

    async fn launch_app(&self, request: Request<PackageRequest>) -> Result<Response<Ack>, Status> {
        ack(self
            .agent
            .pipeline()
            .launch_app(&request.into_inner().package_name)
            .await)
    }

    async fn get_pipeline_state(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<PipelineState>, Status> {
        ok(pipeline_state_to_proto(&self.agent.pipeline_state()))
    }

    async fn wait_for_install(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<InstallStatus>, Status> {
        let status = self
            .agent
            .wait_for_install_terminal()
            .await
            .map_err(status_from_error)?;
        ok(install_status_to_proto(&status))
    }

    async fn get_system_brightness(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<BrightnessResponse>, Status> {
        let value = self
            .agent
            .audio()
            .system_brightness()
            .await
            .map_err(status_from_error)?;
        ok(BrightnessResponse {
            value: value.map(u32::from),
        })
    }

    async fn set_system_brightness(
        &self,
        request: Request<SetSystemBrightnessRequest>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(
            self.agent
                .audio()
                .set_system_brightness(request.into_inner().value)
                .await,
        )
    }

    async fn get_app_brightness(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<AppBrightnessResponse>, Status> {
        let value = self
            .agent
            .audio()
            .app_brightness()
            .await
            .map_err(status_from_error)?;
        ok(app_brightness_to_proto(value))
    }

    async fn set_app_brightness(
        &self,
        request: Request<SetLevelRequest>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(
            self.agent
                .audio()
                .set_app_brightness(request.into_inner().level)
                .await,
        )
    }

    async fn reset_app_brightness(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(self.agent.audio().reset_app_brightness().await)
    }

    async fn get_volume(
        &self,
        request: Request<StreamRequest>,
    ) -> Result<Response<LevelResponse>, Status> {
        let stream = audio_stream_from_proto(request.into_inner().stream)?;
        let level = self
            .agent
            .audio()
            .stream_volume(stream)
            .await
            .map_err(status_from_error)?;
        ok(LevelResponse { level })
    }

    async fn set_volume(
        &self,
        request: Request<SetVolumeRequest>,
    ) -> Result<Response<FlagResponse>, Status> {
        let req = request.into_inner();
        let stream = audio_stream_from_proto(req.stream)?;
        flag(self.agent.audio().set_stream_volume(stream, req.level).await)
    }

    async fn get_global_volume(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<LevelResponse>, Status> {
        let level = self
            .agent
            .audio()
            .global_volume()
            .await
            .map_err(status_from_error)?;
        ok(LevelResponse { level })
    }

    async fn set_global_volume(
        &self,
        request: Request<SetLevelRequest>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(
            self.agent
                .audio()
                .set_global_volume(request.into_inner().level)
                .await,
        )
    }

    async fn get_muted(
        &self,
        request: Request<StreamRequest>,
    ) -> Result<Response<FlagResponse>, Status> {
        let stream = audio_stream_from_proto(request.into_inner().stream)?;
        flag(self.agent.audio().is_stream_muted(stream).await)
    }

    async fn set_muted(
        &self,
        request: Request<SetMutedRequest>,
    ) -> Result<Response<FlagResponse>, Status> {
        let req = request.into_inner();
        let stream = audio_stream_from_proto(req.stream)?;
        flag(self.agent.audio().set_stream_muted(stream, req.muted).await)
    }

    async fn get_global_muted(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(self.agent.audio().is_global_muted().await)
    }

    async fn set_global_muted(
        &self,
        request: Request<SetFlagRequest>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(
            self.agent
                .audio()
                .set_global_muted(request.into_inner().enabled)
                .await,
        )
    }

    async fn get_ringer_mode(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<RingerModeResponse>, Status> {
        let mode = self
            .agent
            .audio()
            .ringer_mode()
            .await
            .map_err(status_from_error)?;
        ok(RingerModeResponse {
            mode: ringer_mode_to_proto(mode) as i32,
        })
    }

    async fn set_ringer_mode(
        &self,
        request: Request<SetRingerModeRequest>,
    ) -> Result<Response<FlagResponse>, Status> {
        let mode = ringer_mode_from_proto(request.into_inner().mode)?;
        flag(self.agent.audio().set_ringer_mode(mode).await)
    }

    async fn get_dnd_access(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(self.agent.audio().has_dnd_access().await)
    }

    async fn request_dnd_access(&self, _request: Request<Empty>) -> Result<Response<Ack>, Status> {
        ack(self.agent.audio().request_dnd_access().await)
    }

    async fn start_observing(&self, _request: Request<Empty>) -> Result<Response<Ack>, Status> {
        ack(self.agent.audio().start_observing().await)
    }

    async fn stop_observing(&self, _request: Request<Empty>) -> Result<Response<Ack>, Status> {
        ack(self.agent.audio().stop_observing().await)
    }

    async fn set_schedule(
        &self,
        request: Request<SetScheduleRequest>,
    ) -> Result<Response<ScheduleOutcome>, Status> {
        let req = request.into_inner();
        let kind = schedule_kind_from_proto(req.kind)?;
        let outcome = self
            .agent
            .schedule()
            .set(kind, req.hour, req.minute, req.repeat)
            .await
            .map_err(status_from_error)?;
        ok(schedule_outcome_to_proto(&outcome))
    }

    async fn get_schedule(
        &self,
        request: Request<ScheduleRequest>,
    ) -> Result<Response<ScheduleResponse>, Status> {
        let kind = schedule_kind_from_proto(request.into_inner().kind)?;
        let settings = self
            .agent
            .schedule()
            .get(kind)
            .await
            .map_err(status_from_error)?;
        ok(ScheduleResponse {
            settings: settings.map(settings_to_proto),
        })
    }

    async fn cancel_schedule(
        &self,
        request: Request<ScheduleRequest>,
    ) -> Result<Response<FlagResponse>, Status> {
        let kind = schedule_kind_from_proto(request.into_inner().kind)?;
        flag(self.agent.schedule().cancel(kind).await)
    }

    async fn shutdown_now(
        &self,
        request: Request<ShutdownRequest>,
    ) -> Result<Response<FlagResponse>, Status> {
        flag(
            self.agent
                .schedule()
                .perform_immediate_shutdown(request.into_inner().confirmed)
                .await,
        )
    }

    async fn get_snapshot(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<DeviceSnapshot>, Status> {
        ok(snapshot_to_proto(&self.agent.snapshot()))
    }

    type StreamDownloadProgressStream = EventStream<DownloadProgress>;

    async fn stream_download_progress(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::StreamDownloadProgressStream>, Status> {
        ok(self.open_stream(
            "download_progress",
            download_progress_to_proto,
            KioskAgent::attach_download_progress,
            KioskAgent::detach_download_progress,
        ))
    }

    type StreamInstallStatusStream = EventStream<InstallStatus>;

    async fn stream_install_status(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::StreamInstallStatusStream>, Status> {
        ok(self.open_stream(
            "install_status",
            install_status_to_proto,
            KioskAgent::attach_install_status,
            KioskAgent::detach_install_status,
        ))
    }

    type StreamSystemBrightnessStream = EventStream<BrightnessEvent>;

    async fn stream_system_brightness(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::StreamSystemBrightnessStream>, Status> {
        ok(self.open_stream(
            "system_brightness",
            |value: &u8| BrightnessEvent {
                value: u32::from(*value),
            },
            KioskAgent::attach_system_brightness,
            KioskAgent::detach_system_brightness,
        ))
    }

    type StreamVolumeStream = EventStream<VolumeChange>;

    async fn stream_volume(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::StreamVolumeStream>, Status> {
        ok(self.open_stream(
            "volume",
            volume_change_to_proto,
            KioskAgent::attach_volume,
            KioskAgent::detach_volume,
        ))
    }

    type StreamGlobalVolumeStream = EventStream<LevelEvent>;

    async fn stream_global_volume(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::StreamGlobalVolumeStream>, Status> {
        ok(self.open_stream(
            "global_volume",
            |level: &f32| LevelEvent { level: *level },
            KioskAgent::attach_global_volume,
            KioskAgent::detach_global_volume,
        ))
    }

    type StreamRingerModeStream = EventStream<RingerModeEvent>;

    async fn stream_ringer_mode(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::StreamRingerModeStream>, Status> {
        ok(self.open_stream(
            "ringer_mode",
            |mode: &kiosk_core::RingerMode| RingerModeEvent {
                mode: ringer_mode_to_proto(Some(*mode)) as i32,
            },
            KioskAgent::attach_ringer_mode,
            KioskAgent::detach_ringer_mode,
        ))
    }
}
