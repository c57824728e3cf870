use std::sync::{Arc, Mutex};

use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};

use crate::normalize::{clamp_brightness, clamp_level, normalize_volume_change};
use crate::provider::ProviderChannels;
use crate::state::SharedState;
use crate::topic::Topic;
use crate::types::{DownloadProgress, InstallStatus, RingerMode, VolumeChange};

/// Fans the provider's six push channels out to independent observers.
///
/// Each upstream channel is drained by one pump task, so events on a channel
/// reach observers in arrival order. Brightness and volume payloads are
/// clamped before delivery and mirrored into the shared device snapshot.
pub struct EventMultiplexer {
    pub download_progress: Topic<DownloadProgress>,
    pub install_status: Topic<InstallStatus>,
    pub system_brightness: Topic<u8>,
    pub volume: Topic<VolumeChange>,
    pub global_volume: Topic<f32>,
    pub ringer_mode: Topic<RingerMode>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for EventMultiplexer {
    fn default() -> Self {
        Self {
            download_progress: Topic::new("download_progress"),
            install_status: Topic::new("install_status"),
            system_brightness: Topic::new("system_brightness"),
            volume: Topic::new("volume"),
            global_volume: Topic::new("global_volume"),
            ringer_mode: Topic::new("ringer_mode"),
            pumps: Mutex::new(Vec::new()),
        }
    }
}

impl EventMultiplexer {
    /// Starts one pump per upstream channel. Must run inside a tokio runtime.
    pub(crate) fn connect(self: &Arc<Self>, channels: ProviderChannels, state: Arc<SharedState>) {
        let mut pumps = self.lock_pumps();

        let mux = Arc::clone(self);
        let st = Arc::clone(&state);
        pumps.push(spawn_pump(
            channels.download_progress,
            "download_progress",
            move |progress: DownloadProgress| {
                let progress = progress.normalized();
                st.record_download_progress(progress);
                mux.download_progress.publish(&progress);
            },
        ));

        let mux = Arc::clone(self);
        let st = Arc::clone(&state);
        pumps.push(spawn_pump(
            channels.install_status,
            "install_status",
            move |status: InstallStatus| {
                let status = status.normalized();
                st.record_install_status(status.clone());
                mux.install_status.publish(&status);
            },
        ));

        let mux = Arc::clone(self);
        let st = Arc::clone(&state);
        pumps.push(spawn_pump(
            channels.system_brightness,
            "system_brightness",
            move |raw: i32| {
                let value = clamp_brightness(i64::from(raw));
                st.update(|snapshot| snapshot.system_brightness = Some(value));
                mux.system_brightness.publish(&value);
            },
        ));

        let mux = Arc::clone(self);
        let st = Arc::clone(&state);
        pumps.push(spawn_pump(
            channels.volume,
            "volume",
            move |change: VolumeChange| {
                let change = normalize_volume_change(change);
                st.update(|snapshot| {
                    snapshot.stream_volumes.insert(change.stream, change.level);
                });
                mux.volume.publish(&change);
            },
        ));

        let mux = Arc::clone(self);
        let st = Arc::clone(&state);
        pumps.push(spawn_pump(
            channels.global_volume,
            "global_volume",
            move |raw: f32| {
                let level = clamp_level(raw);
                st.update(|snapshot| snapshot.global_volume = Some(level));
                mux.global_volume.publish(&level);
            },
        ));

        let mux = Arc::clone(self);
        pumps.push(spawn_pump(
            channels.ringer_mode,
            "ringer_mode",
            move |mode: RingerMode| {
                state.update(|snapshot| snapshot.ringer_mode = Some(mode));
                mux.ringer_mode.publish(&mode);
            },
        ));
    }

    /// Stops every pump and drops every observer. Idempotent.
    pub fn shutdown(&self) {
        for pump in self.lock_pumps().drain(..) {
            pump.abort();
        }
        self.download_progress.clear();
        self.install_status.clear();
        self.system_brightness.clear();
        self.volume.clear();
        self.global_volume.clear();
        self.ringer_mode.clear();
    }

    fn lock_pumps(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pumps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn spawn_pump<T, F>(
    mut rx: broadcast::Receiver<T>,
    channel: &'static str,
    mut deliver: F,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => deliver(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel, skipped, "event pump lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(channel, "upstream channel closed");
                    return;
                }
            }
        }
    })
}
