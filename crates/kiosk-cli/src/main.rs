use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use kiosk_proto::kiosk::v1::{
    self as pb, kiosk_service_client::KioskServiceClient, pipeline_state, DeleteDownloadedFileRequest,
    DownloadAndInstallRequest, DownloadRequest, Empty, InstallRequest, PackageRequest,
    ScheduleRequest, SetFlagRequest, SetLevelRequest, SetLockTaskPackagesRequest,
    SetMutedRequest, SetRingerModeRequest, SetScheduleRequest, SetSystemBrightnessRequest,
    SetVolumeRequest, ShutdownRequest, StreamRequest,
};
use serde_json::json;
use tonic::transport::Channel;

type Client = KioskServiceClient<Channel>;

#[derive(Parser)]
#[command(name = "kiosk-cli", version, about = "Kiosk agent CLI")]
struct Cli {
    /// Agent address
    #[arg(long, global = true, default_value_t = kiosk_util::agent_addr())]
    addr: String,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Kiosk lock mode and boot auto-start
    Kiosk {
        #[command(subcommand)]
        cmd: KioskCmd,
    },
    /// Device-owner status and provisioning
    Owner {
        #[command(subcommand)]
        cmd: OwnerCmd,
    },
    /// Replace the lock-task allow-list
    LockTask { packages: Vec<String> },
    /// Downloaded packages
    Downloads {
        #[command(subcommand)]
        cmd: DownloadsCmd,
    },
    /// Install a downloaded package file
    Install {
        file_path: String,
        #[arg(long, value_enum, default_value_t = StrategyArg::Standard)]
        strategy: StrategyArg,
        /// Package to launch after a silent-launch install
        #[arg(long)]
        package: Option<String>,
    },
    /// Download a package and install it in one step
    InstallUrl {
        url: String,
        #[arg(long, value_enum, default_value_t = StrategyArg::Standard)]
        strategy: StrategyArg,
        /// Package being installed, used to launch it after an update
        #[arg(long)]
        package: Option<String>,
    },
    /// Install permission status and request
    Permission {
        #[command(subcommand)]
        cmd: GrantCmd,
    },
    /// Check whether a package is installed
    Installed { package: String },
    /// Launch an installed package
    Launch { package: String },
    /// Print the acquisition pipeline state
    Pipeline,
    /// Wait for the install attempt to finish
    WaitInstall,
    /// System and app brightness
    Brightness {
        #[command(subcommand)]
        cmd: BrightnessCmd,
    },
    /// Per-stream and global volume
    Volume {
        #[command(subcommand)]
        cmd: VolumeCmd,
    },
    /// Per-stream and global mute
    Mute {
        #[command(subcommand)]
        cmd: MuteCmd,
    },
    /// Ringer mode
    Ringer {
        #[command(subcommand)]
        cmd: RingerCmd,
    },
    /// Do-not-disturb access
    Dnd {
        #[command(subcommand)]
        cmd: GrantCmd,
    },
    /// Start or stop audio/brightness change events
    Observe {
        #[command(subcommand)]
        cmd: ObserveCmd,
    },
    /// Shutdown and boot schedules
    Schedule {
        #[command(subcommand)]
        cmd: ScheduleCmd,
    },
    /// Power the device off now
    Shutdown {
        /// Confirm the power-off
        #[arg(long)]
        yes: bool,
    },
    /// Print the agent's cached device state
    Snapshot,
    /// Stream events from one channel until interrupted
    Watch {
        #[arg(value_enum)]
        channel: ChannelArg,
    },
}

#[derive(Subcommand)]
enum KioskCmd {
    Start,
    Stop,
    /// Enable or disable launching the kiosk app after boot
    Autostart {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Show whether boot auto-start is enabled
    AutostartStatus,
}

#[derive(Subcommand)]
enum OwnerCmd {
    Status,
    Request,
    Clear,
}

#[derive(Subcommand)]
enum DownloadsCmd {
    /// Download a package into the agent's downloads directory
    Fetch {
        url: String,
        #[arg(long)]
        name: Option<String>,
    },
    List {
        #[arg(long)]
        json: bool,
    },
    Delete { file_path: String },
    Clear,
}

#[derive(Subcommand)]
enum GrantCmd {
    Status,
    Request,
}

#[derive(Subcommand)]
enum BrightnessCmd {
    Get,
    /// Set system brightness, 0..=255
    Set { value: i64 },
    AppGet,
    /// Override brightness for the kiosk app, 0.0..=1.0
    AppSet { level: f32 },
    /// Return the app to the system brightness
    AppReset,
}

#[derive(Subcommand)]
enum VolumeCmd {
    Get {
        #[arg(value_enum)]
        stream: StreamArg,
    },
    Set {
        #[arg(value_enum)]
        stream: StreamArg,
        level: f32,
    },
    GlobalGet,
    GlobalSet { level: f32 },
}

#[derive(Subcommand)]
enum MuteCmd {
    Get {
        #[arg(value_enum)]
        stream: StreamArg,
    },
    Set {
        #[arg(value_enum)]
        stream: StreamArg,
        #[arg(value_enum)]
        state: Toggle,
    },
    GlobalGet,
    GlobalSet {
        #[arg(value_enum)]
        state: Toggle,
    },
}

#[derive(Subcommand)]
enum RingerCmd {
    Get,
    Set {
        #[arg(value_enum)]
        mode: RingerArg,
    },
}

#[derive(Subcommand)]
enum ObserveCmd {
    Start,
    Stop,
}

#[derive(Subcommand)]
enum ScheduleCmd {
    Set {
        #[arg(value_enum)]
        kind: KindArg,
        #[arg(allow_negative_numbers = true)]
        hour: i32,
        #[arg(allow_negative_numbers = true)]
        minute: i32,
        #[arg(long)]
        repeat: bool,
    },
    Get {
        #[arg(value_enum)]
        kind: KindArg,
    },
    Cancel {
        #[arg(value_enum)]
        kind: KindArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Standard,
    Silent,
    SilentLaunch,
    System,
}

impl StrategyArg {
    fn to_proto(self) -> pb::InstallStrategy {
        match self {
            StrategyArg::Standard => pb::InstallStrategy::Standard,
            StrategyArg::Silent => pb::InstallStrategy::Silent,
            StrategyArg::SilentLaunch => pb::InstallStrategy::SilentAndLaunch,
            StrategyArg::System => pb::InstallStrategy::SystemSilent,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StreamArg {
    Music,
    Ring,
    Alarm,
    Notification,
    System,
    VoiceCall,
    Dtmf,
}

impl StreamArg {
    fn to_proto(self) -> i32 {
        let stream = match self {
            StreamArg::Music => pb::AudioStream::Music,
            StreamArg::Ring => pb::AudioStream::Ring,
            StreamArg::Alarm => pb::AudioStream::Alarm,
            StreamArg::Notification => pb::AudioStream::Notification,
            StreamArg::System => pb::AudioStream::System,
            StreamArg::VoiceCall => pb::AudioStream::VoiceCall,
            StreamArg::Dtmf => pb::AudioStream::Dtmf,
        };
        stream as i32
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RingerArg {
    Silent,
    Vibrate,
    Normal,
}

impl RingerArg {
    fn to_proto(self) -> i32 {
        let mode = match self {
            RingerArg::Silent => pb::RingerMode::Silent,
            RingerArg::Vibrate => pb::RingerMode::Vibrate,
            RingerArg::Normal => pb::RingerMode::Normal,
        };
        mode as i32
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Shutdown,
    Boot,
}

impl KindArg {
    fn to_proto(self) -> i32 {
        let kind = match self {
            KindArg::Shutdown => pb::ScheduleKind::Shutdown,
            KindArg::Boot => pb::ScheduleKind::Boot,
        };
        kind as i32
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ChannelArg {
    DownloadProgress,
    InstallStatus,
    Brightness,
    Volume,
    GlobalVolume,
    Ringer,
}

fn stream_name(value: i32) -> &'static str {
    pb::AudioStream::try_from(value)
        .map(|s| s.as_str_name())
        .unwrap_or("AUDIO_STREAM_UNKNOWN")
}

fn ringer_name(value: i32) -> &'static str {
    pb::RingerMode::try_from(value)
        .map(|m| m.as_str_name())
        .unwrap_or("RINGER_MODE_UNKNOWN")
}

fn install_state_name(value: i32) -> &'static str {
    pb::InstallState::try_from(value)
        .map(|s| s.as_str_name())
        .unwrap_or("INSTALL_STATE_UNKNOWN")
}

fn format_install_status(status: &pb::InstallStatus) -> String {
    let mut line = format!(
        "state={}\tinstalling={}",
        install_state_name(status.state),
        status.installing
    );
    if let Some(progress) = status.progress {
        line.push_str(&format!("\tprogress={progress}"));
    }
    if let Some(package) = &status.package_name {
        line.push_str(&format!("\tpackage={package}"));
    }
    if let Some(message) = &status.message {
        line.push_str(&format!("\tmessage={message}"));
    }
    line
}

fn format_settings(settings: Option<&pb::ScheduledPowerSettings>) -> String {
    match settings {
        Some(s) => format!("{:02}:{:02}\trepeat={}", s.hour, s.minute, s.repeat),
        None => "none".to_string(),
    }
}

fn format_level(level: Option<f32>) -> String {
    level.map_or_else(|| "unknown".to_string(), |level| format!("{level:.2}"))
}

async fn print_stream<T>(
    mut stream: tonic::Streaming<T>,
    format: impl Fn(&T) -> String,
) -> Result<(), Box<dyn std::error::Error>> {
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => println!("{}", format(&event)),
            Err(e) => {
                eprintln!("stream error: {e}");
                break;
            }
        }
    }
    Ok(())
}

async fn watch(client: &mut Client, channel: ChannelArg) -> Result<(), Box<dyn std::error::Error>> {
    match channel {
        ChannelArg::DownloadProgress => {
            let stream = client.stream_download_progress(Empty {}).await?.into_inner();
            print_stream(stream, |p| {
                format!("{}%\t{}/{} bytes", p.progress, p.bytes_read, p.total_bytes)
            })
            .await
        }
        ChannelArg::InstallStatus => {
            let stream = client.stream_install_status(Empty {}).await?.into_inner();
            print_stream(stream, format_install_status).await
        }
        ChannelArg::Brightness => {
            let stream = client.stream_system_brightness(Empty {}).await?.into_inner();
            print_stream(stream, |e| format!("brightness={}", e.value)).await
        }
        ChannelArg::Volume => {
            let stream = client.stream_volume(Empty {}).await?.into_inner();
            print_stream(stream, |v| {
                format!(
                    "{}\t{}/{}\tlevel={:.2}",
                    stream_name(v.stream),
                    v.current,
                    v.max,
                    v.level
                )
            })
            .await
        }
        ChannelArg::GlobalVolume => {
            let stream = client.stream_global_volume(Empty {}).await?.into_inner();
            print_stream(stream, |e| format!("global_volume={:.2}", e.level)).await
        }
        ChannelArg::Ringer => {
            let stream = client.stream_ringer_mode(Empty {}).await?.into_inner();
            print_stream(stream, |e| ringer_name(e.mode).to_string()).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut client = KioskServiceClient::new(connect(&cli.addr).await?);

    match cli.cmd {
        Cmd::Kiosk { cmd } => match cmd {
            KioskCmd::Start => {
                client.start_kiosk(Empty {}).await?;
                println!("kiosk start requested");
            }
            KioskCmd::Stop => {
                client.stop_kiosk(Empty {}).await?;
                println!("kiosk stop requested");
            }
            KioskCmd::Autostart { state } => {
                client
                    .set_boot_autostart(SetFlagRequest {
                        enabled: state.enabled(),
                    })
                    .await?;
                println!("autostart={}", state.enabled());
            }
            KioskCmd::AutostartStatus => {
                let resp = client.get_boot_autostart(Empty {}).await?.into_inner();
                println!("autostart={}", resp.value);
            }
        },

        Cmd::Owner { cmd } => match cmd {
            OwnerCmd::Status => {
                let resp = client.get_device_owner(Empty {}).await?.into_inner();
                println!("device_owner={}", resp.value);
            }
            OwnerCmd::Request => {
                client.request_device_owner(Empty {}).await?;
                println!("device owner requested");
            }
            OwnerCmd::Clear => {
                let resp = client.clear_device_owner(Empty {}).await?.into_inner();
                println!("cleared={}", resp.value);
            }
        },

        Cmd::LockTask { packages } => {
            let resp = client
                .set_lock_task_packages(SetLockTaskPackagesRequest { packages })
                .await?
                .into_inner();
            println!("applied={}", resp.value);
        }

        Cmd::Downloads { cmd } => match cmd {
            DownloadsCmd::Fetch { url, name } => {
                let resp = client
                    .download(DownloadRequest {
                        url,
                        file_name: name,
                    })
                    .await?
                    .into_inner();
                println!("{}\t{} bytes", resp.file_path, resp.file_size);
            }
            DownloadsCmd::List { json } => {
                let resp = client.list_downloaded_files(Empty {}).await?.into_inner();
                if json {
                    let files: Vec<_> = resp
                        .files
                        .iter()
                        .map(|f| {
                            json!({
                                "file_path": f.file_path,
                                "file_name": f.file_name,
                                "file_size": f.file_size,
                                "last_modified_unix_millis": f.last_modified_unix_millis,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&files)?);
                } else {
                    for f in resp.files {
                        println!("{}\t{}\t{}", f.file_name, f.file_size, f.file_path);
                    }
                }
            }
            DownloadsCmd::Delete { file_path } => {
                let resp = client
                    .delete_downloaded_file(DeleteDownloadedFileRequest { file_path })
                    .await?
                    .into_inner();
                println!("deleted={}", resp.value);
            }
            DownloadsCmd::Clear => {
                let resp = client.clear_downloaded_files(Empty {}).await?.into_inner();
                println!("removed={}", resp.count);
            }
        },

        Cmd::Install {
            file_path,
            strategy,
            package,
        } => {
            client
                .install(InstallRequest {
                    file_path,
                    strategy: strategy.to_proto() as i32,
                    package_name: package,
                })
                .await?;
            println!("install dispatched; use `watch install-status` or `wait-install`");
        }
        Cmd::InstallUrl {
            url,
            strategy,
            package,
        } => {
            let resp = client
                .download_and_install(DownloadAndInstallRequest {
                    url,
                    strategy: strategy.to_proto() as i32,
                    package_name: package,
                })
                .await?
                .into_inner();
            println!("downloaded {}; install dispatched", resp.file_path);
        }
        Cmd::Permission { cmd } => match cmd {
            GrantCmd::Status => {
                let resp = client.get_install_permission(Empty {}).await?.into_inner();
                println!("install_permission={}", resp.value);
            }
            GrantCmd::Request => {
                client.request_install_permission(Empty {}).await?;
                println!("install permission requested");
            }
        },
        Cmd::Installed { package } => {
            let resp = client
                .is_app_installed(PackageRequest {
                    package_name: package,
                })
                .await?
                .into_inner();
            println!("installed={}", resp.value);
        }
        Cmd::Launch { package } => {
            client
                .launch_app(PackageRequest {
                    package_name: package.clone(),
                })
                .await?;
            println!("launched {package}");
        }
        Cmd::Pipeline => {
            let resp = client.get_pipeline_state(Empty {}).await?.into_inner();
            match resp.state {
                None | Some(pipeline_state::State::Idle(_)) => println!("idle"),
                Some(pipeline_state::State::Downloading(p)) => {
                    println!("downloading\t{}%", p.progress)
                }
                Some(pipeline_state::State::Downloaded(r)) => {
                    println!("downloaded\t{}", r.file_path)
                }
                Some(pipeline_state::State::Installing(s)) => {
                    println!("installing\t{}", format_install_status(&s))
                }
                Some(pipeline_state::State::Finished(s)) => {
                    println!("finished\t{}", format_install_status(&s))
                }
            }
        }
        Cmd::WaitInstall => {
            let resp = client.wait_for_install(Empty {}).await?.into_inner();
            println!("{}", format_install_status(&resp));
        }

        Cmd::Brightness { cmd } => match cmd {
            BrightnessCmd::Get => {
                let resp = client.get_system_brightness(Empty {}).await?.into_inner();
                match resp.value {
                    Some(value) => println!("brightness={value}"),
                    None => println!("brightness=unknown"),
                }
            }
            BrightnessCmd::Set { value } => {
                let resp = client
                    .set_system_brightness(SetSystemBrightnessRequest { value })
                    .await?
                    .into_inner();
                println!("applied={}", resp.value);
            }
            BrightnessCmd::AppGet => {
                let resp = client.get_app_brightness(Empty {}).await?.into_inner();
                if !resp.known {
                    println!("app_brightness=unknown");
                } else if resp.system {
                    println!("app_brightness=system");
                } else {
                    println!("app_brightness={:.2}", resp.level);
                }
            }
            BrightnessCmd::AppSet { level } => {
                let resp = client
                    .set_app_brightness(SetLevelRequest { level })
                    .await?
                    .into_inner();
                println!("applied={}", resp.value);
            }
            BrightnessCmd::AppReset => {
                let resp = client.reset_app_brightness(Empty {}).await?.into_inner();
                println!("applied={}", resp.value);
            }
        },

        Cmd::Volume { cmd } => match cmd {
            VolumeCmd::Get { stream } => {
                let resp = client
                    .get_volume(StreamRequest {
                        stream: stream.to_proto(),
                    })
                    .await?
                    .into_inner();
                println!("volume={}", format_level(resp.level));
            }
            VolumeCmd::Set { stream, level } => {
                let resp = client
                    .set_volume(SetVolumeRequest {
                        stream: stream.to_proto(),
                        level,
                    })
                    .await?
                    .into_inner();
                println!("applied={}", resp.value);
            }
            VolumeCmd::GlobalGet => {
                let resp = client.get_global_volume(Empty {}).await?.into_inner();
                println!("global_volume={}", format_level(resp.level));
            }
            VolumeCmd::GlobalSet { level } => {
                let resp = client
                    .set_global_volume(SetLevelRequest { level })
                    .await?
                    .into_inner();
                println!("applied={}", resp.value);
            }
        },

        Cmd::Mute { cmd } => match cmd {
            MuteCmd::Get { stream } => {
                let resp = client
                    .get_muted(StreamRequest {
                        stream: stream.to_proto(),
                    })
                    .await?
                    .into_inner();
                println!("muted={}", resp.value);
            }
            MuteCmd::Set { stream, state } => {
                let resp = client
                    .set_muted(SetMutedRequest {
                        stream: stream.to_proto(),
                        muted: state.enabled(),
                    })
                    .await?
                    .into_inner();
                println!("applied={}", resp.value);
            }
            MuteCmd::GlobalGet => {
                let resp = client.get_global_muted(Empty {}).await?.into_inner();
                println!("global_muted={}", resp.value);
            }
            MuteCmd::GlobalSet { state } => {
                let resp = client
                    .set_global_muted(SetFlagRequest {
                        enabled: state.enabled(),
                    })
                    .await?
                    .into_inner();
                println!("applied={}", resp.value);
            }
        },

        Cmd::Ringer { cmd } => match cmd {
            RingerCmd::Get => {
                let resp = client.get_ringer_mode(Empty {}).await?.into_inner();
                println!("{}", ringer_name(resp.mode));
            }
            RingerCmd::Set { mode } => {
                let resp = client
                    .set_ringer_mode(SetRingerModeRequest {
                        mode: mode.to_proto(),
                    })
                    .await?
                    .into_inner();
                println!("applied={}", resp.value);
            }
        },

        Cmd::Dnd { cmd } => match cmd {
            GrantCmd::Status => {
                let resp = client.get_dnd_access(Empty {}).await?.into_inner();
                println!("dnd_access={}", resp.value);
            }
            GrantCmd::Request => {
                client.request_dnd_access(Empty {}).await?;
                println!("dnd access requested");
            }
        },

        Cmd::Observe { cmd } => match cmd {
            ObserveCmd::Start => {
                client.start_observing(Empty {}).await?;
                println!("observing");
            }
            ObserveCmd::Stop => {
                client.stop_observing(Empty {}).await?;
                println!("stopped observing");
            }
        },

        Cmd::Schedule { cmd } => match cmd {
            ScheduleCmd::Set {
                kind,
                hour,
                minute,
                repeat,
            } => {
                let resp = client
                    .set_schedule(SetScheduleRequest {
                        kind: kind.to_proto(),
                        hour,
                        minute,
                        repeat,
                    })
                    .await?
                    .into_inner();
                println!(
                    "accepted={}\tapplied={}",
                    resp.accepted,
                    format_settings(resp.applied.as_ref())
                );
                if matches!(kind, KindArg::Boot) {
                    eprintln!("note: a stored boot schedule is not guaranteed to power the device on");
                }
            }
            ScheduleCmd::Get { kind } => {
                let resp = client
                    .get_schedule(ScheduleRequest {
                        kind: kind.to_proto(),
                    })
                    .await?
                    .into_inner();
                println!("{}", format_settings(resp.settings.as_ref()));
            }
            ScheduleCmd::Cancel { kind } => {
                let resp = client
                    .cancel_schedule(ScheduleRequest {
                        kind: kind.to_proto(),
                    })
                    .await?
                    .into_inner();
                println!("cancelled={}", resp.value);
            }
        },

        Cmd::Shutdown { yes } => {
            if !yes {
                eprintln!("refusing to power off without --yes");
                std::process::exit(2);
            }
            let resp = client
                .shutdown_now(ShutdownRequest { confirmed: true })
                .await?
                .into_inner();
            println!("shutdown={}", resp.value);
        }

        Cmd::Snapshot => {
            let snap = client.get_snapshot(Empty {}).await?.into_inner();
            let volumes: serde_json::Map<String, serde_json::Value> = snap
                .stream_volumes
                .iter()
                .map(|v| (stream_name(v.stream).to_string(), json!(v.level)))
                .collect();
            let muted: serde_json::Map<String, serde_json::Value> = snap
                .stream_muted
                .iter()
                .map(|m| (stream_name(m.stream).to_string(), json!(m.value)))
                .collect();
            let app = snap.app_brightness.unwrap_or_default();
            let value = json!({
                "system_brightness": snap.system_brightness,
                "app_brightness": if !app.known {
                    json!(null)
                } else if app.system {
                    json!("system")
                } else {
                    json!(app.level)
                },
                "stream_volumes": volumes,
                "stream_muted": muted,
                "global_volume": snap.global_volume,
                "global_muted": snap.global_muted,
                "ringer_mode": ringer_name(snap.ringer_mode),
                "shutdown_schedule": format_settings(snap.shutdown_schedule.as_ref()),
                "boot_schedule": format_settings(snap.boot_schedule.as_ref()),
                "last_install_status": snap.last_install_status.as_ref().map(format_install_status),
                "installing": snap.installing,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }

        Cmd::Watch { channel } => watch(&mut client, channel).await?,
    }

    Ok(())
}

async fn connect(addr: &str) -> Result<Channel, Box<dyn std::error::Error>> {
    let endpoint = format!("http://{addr}");
    Ok(Channel::from_shared(endpoint)?.connect().await?)
}
