//! Audio and brightness change detection.
//!
//! The device exposes no change notifications over adb, so [`DeviceObserver`]
//! samples brightness, per-stream volume and ringer mode on an interval and
//! pushes a provider event only when a value differs from the last sample.

use std::{collections::BTreeMap, time::Duration};

use kiosk_core::{AudioStream, ProviderEmitters, RingerMode, VolumeChange};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::adb::AdbDevice;
use crate::parse::{parse_settings_int, parse_volume, VolumeReading};

/// Values the observer compares between polls.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Sample {
    pub(crate) brightness: Option<i32>,
    pub(crate) volumes: BTreeMap<AudioStream, VolumeReading>,
    pub(crate) ringer_mode: Option<RingerMode>,
}

impl Sample {
    /// Emits one event per value that differs from `previous`.
    pub(crate) fn emit_changes(&self, previous: &Sample, emit: &ProviderEmitters) {
        if self.brightness != previous.brightness {
            if let Some(value) = self.brightness {
                emit.system_brightness(value);
            }
        }
        for (stream, reading) in &self.volumes {
            if previous.volumes.get(stream) == Some(reading) {
                continue;
            }
            emit.volume(VolumeChange {
                stream: *stream,
                current: reading.current,
                max: reading.max,
                level: reading.level(),
            });
            if *stream == AudioStream::Music {
                emit.global_volume(reading.level());
            }
        }
        if self.ringer_mode != previous.ringer_mode {
            if let Some(mode) = self.ringer_mode {
                emit.ringer_mode(mode);
            }
        }
    }
}

pub(crate) async fn sample(device: &AdbDevice) -> Sample {
    let brightness = device
        .shell(&["settings", "get", "system", "screen_brightness"])
        .await
        .ok()
        .and_then(|out| parse_settings_int(&out));
    let mut volumes = BTreeMap::new();
    for stream in AudioStream::ALL {
        let id = stream.android_stream_id().to_string();
        let reading = device
            .shell(&["cmd", "media_session", "volume", "--stream", id.as_str(), "--get"])
            .await
            .ok()
            .and_then(|out| parse_volume(&out));
        if let Some(reading) = reading {
            volumes.insert(stream, reading);
        }
    }
    let ringer_mode = device
        .shell(&["settings", "get", "global", "mode_ringer"])
        .await
        .ok()
        .and_then(|out| parse_settings_int(&out))
        .and_then(RingerMode::from_android_value);
    Sample {
        brightness,
        volumes,
        ringer_mode,
    }
}

pub(crate) struct DeviceObserver {
    device: AdbDevice,
    emit: ProviderEmitters,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl DeviceObserver {
    pub(crate) fn new(device: AdbDevice, emit: ProviderEmitters, cancel: CancellationToken) -> Self {
        Self {
            device,
            emit,
            cancel,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub(crate) fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Runs until the token is cancelled. The first sample is a baseline and
    /// emits nothing.
    pub(crate) async fn run(self) {
        let mut last = tokio::select! {
            _ = self.cancel.cancelled() => return,
            first = sample(&self.device) => first,
        };
        info!(serial = self.device.serial(), "device observer started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("device observer cancelled");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    let current = sample(&self.device).await;
                    if current != last {
                        debug!("device audio/brightness state changed");
                        current.emit_changes(&last, &self.emit);
                        last = current;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn reading(current: i32) -> VolumeReading {
        VolumeReading {
            current,
            min: 0,
            max: 15,
        }
    }

    #[test]
    fn only_changed_values_are_emitted() {
        let emit = ProviderEmitters::default();
        let mut channels = emit.subscribe();

        let mut previous = Sample::default();
        previous.brightness = Some(100);
        previous.volumes.insert(AudioStream::Alarm, reading(3));
        previous.volumes.insert(AudioStream::Music, reading(5));
        previous.ringer_mode = Some(RingerMode::Normal);

        let mut current = previous.clone();
        current.volumes.insert(AudioStream::Music, reading(15));
        current.ringer_mode = Some(RingerMode::Vibrate);
        current.emit_changes(&previous, &emit);

        assert!(channels.system_brightness.try_recv().is_err());
        let change = channels.volume.try_recv().unwrap();
        assert_eq!(change.stream, AudioStream::Music);
        assert_eq!(change.level, 1.0);
        assert!(channels.volume.try_recv().is_err());
        assert_eq!(channels.global_volume.try_recv().unwrap(), 1.0);
        assert_eq!(channels.ringer_mode.try_recv().unwrap(), RingerMode::Vibrate);
    }

    #[tokio::test]
    async fn observer_stops_on_cancel() {
        let device = AdbDevice::new(PathBuf::from("/nonexistent/adb"), "test-serial");
        let cancel = CancellationToken::new();
        let observer = DeviceObserver::new(device, ProviderEmitters::default(), cancel.clone())
            .with_poll_interval(Duration::from_secs(60));
        let task = tokio::spawn(observer.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(result.is_ok(), "observer task should finish after cancel");
    }
}
