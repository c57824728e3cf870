use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{KioskError, Remediation};
use crate::gate::CapabilityGate;
use crate::normalize::{app_brightness_from_raw, clamp_brightness, clamp_level};
use crate::state::SharedState;
use crate::types::{AppBrightness, AudioStream, RingerMode};

/// Brightness, volume, mute and ringer controls. Every value written to the
/// provider is clamped first; every value read back is clamped again before
/// it is cached.
pub struct AudioNormalizer {
    gate: Arc<CapabilityGate>,
    state: Arc<SharedState>,
    auto_request_remediation: bool,
}

impl AudioNormalizer {
    pub(crate) fn new(
        gate: Arc<CapabilityGate>,
        state: Arc<SharedState>,
        auto_request_remediation: bool,
    ) -> Self {
        Self {
            gate,
            state,
            auto_request_remediation,
        }
    }

    pub async fn system_brightness(&self) -> Result<Option<u8>, KioskError> {
        let raw = self
            .gate
            .optional("system_brightness", self.gate.provider().system_brightness())
            .await?;
        let value = raw.map(|raw| clamp_brightness(i64::from(raw)));
        if value.is_some() {
            self.state.update(|snapshot| snapshot.system_brightness = value);
        }
        Ok(value)
    }

    /// Accepts any integer and writes it clamped to `0..=255`.
    pub async fn set_system_brightness(&self, value: i64) -> Result<bool, KioskError> {
        let value = clamp_brightness(value);
        let applied = self
            .gate
            .invoke(
                "set_system_brightness",
                self.gate.provider().set_system_brightness(value),
            )
            .await?;
        if applied {
            self.state
                .update(|snapshot| snapshot.system_brightness = Some(value));
        }
        Ok(applied)
    }

    pub async fn app_brightness(&self) -> Result<Option<AppBrightness>, KioskError> {
        let raw = self
            .gate
            .optional("app_brightness", self.gate.provider().app_brightness())
            .await?;
        let value = raw.map(app_brightness_from_raw);
        if value.is_some() {
            self.state.update(|snapshot| snapshot.app_brightness = value);
        }
        Ok(value)
    }

    pub async fn set_app_brightness(&self, level: f32) -> Result<bool, KioskError> {
        self.write_app_brightness(AppBrightness::Level(clamp_level(level)))
            .await
    }

    /// Hands brightness control back to the system setting.
    pub async fn reset_app_brightness(&self) -> Result<bool, KioskError> {
        self.write_app_brightness(AppBrightness::System).await
    }

    async fn write_app_brightness(&self, value: AppBrightness) -> Result<bool, KioskError> {
        let raw = value.as_raw();
        let applied = self
            .gate
            .invoke(
                "set_app_brightness",
                self.gate.provider().set_app_brightness(raw),
            )
            .await?;
        if applied {
            self.state
                .update(|snapshot| snapshot.app_brightness = Some(value));
        }
        Ok(applied)
    }

    pub async fn stream_volume(&self, stream: AudioStream) -> Result<Option<f32>, KioskError> {
        let level = self
            .gate
            .optional("stream_volume", self.gate.provider().stream_volume(stream))
            .await?
            .map(clamp_level);
        if let Some(level) = level {
            self.state.update(|snapshot| {
                snapshot.stream_volumes.insert(stream, level);
            });
        }
        Ok(level)
    }

    pub async fn set_stream_volume(
        &self,
        stream: AudioStream,
        level: f32,
    ) -> Result<bool, KioskError> {
        let level = clamp_level(level);
        let applied = self
            .gate
            .invoke(
                "set_stream_volume",
                self.gate.provider().set_stream_volume(stream, level),
            )
            .await?;
        if applied {
            self.state.update(|snapshot| {
                snapshot.stream_volumes.insert(stream, level);
            });
        }
        Ok(applied)
    }

    pub async fn global_volume(&self) -> Result<Option<f32>, KioskError> {
        let level = self
            .gate
            .optional("global_volume", self.gate.provider().global_volume())
            .await?
            .map(clamp_level);
        if level.is_some() {
            self.state.update(|snapshot| snapshot.global_volume = level);
        }
        Ok(level)
    }

    pub async fn set_global_volume(&self, level: f32) -> Result<bool, KioskError> {
        let level = clamp_level(level);
        let applied = self
            .gate
            .invoke(
                "set_global_volume",
                self.gate.provider().set_global_volume(level),
            )
            .await?;
        if applied {
            self.state
                .update(|snapshot| snapshot.global_volume = Some(level));
        }
        Ok(applied)
    }

    /// A degraded `false` is returned but not cached as a confirmed value.
    pub async fn is_stream_muted(&self, stream: AudioStream) -> Result<bool, KioskError> {
        let muted = self
            .gate
            .optional("is_stream_muted", self.gate.provider().is_stream_muted(stream))
            .await?;
        if let Some(muted) = muted {
            self.state.update(|snapshot| {
                snapshot.stream_muted.insert(stream, muted);
            });
        }
        Ok(muted.unwrap_or(false))
    }

    pub async fn set_stream_muted(
        &self,
        stream: AudioStream,
        muted: bool,
    ) -> Result<bool, KioskError> {
        let applied = self
            .gate
            .invoke(
                "set_stream_muted",
                self.gate.provider().set_stream_muted(stream, muted),
            )
            .await?;
        if applied {
            self.state.update(|snapshot| {
                snapshot.stream_muted.insert(stream, muted);
            });
        }
        Ok(applied)
    }

    pub async fn is_global_muted(&self) -> Result<bool, KioskError> {
        let muted = self
            .gate
            .optional("is_global_muted", self.gate.provider().is_global_muted())
            .await?;
        if let Some(muted) = muted {
            self.state
                .update(|snapshot| snapshot.global_muted = Some(muted));
        }
        Ok(muted.unwrap_or(false))
    }

    pub async fn set_global_muted(&self, muted: bool) -> Result<bool, KioskError> {
        let applied = self
            .gate
            .invoke(
                "set_global_muted",
                self.gate.provider().set_global_muted(muted),
            )
            .await?;
        if applied {
            self.state
                .update(|snapshot| snapshot.global_muted = Some(muted));
        }
        Ok(applied)
    }

    pub async fn ringer_mode(&self) -> Result<Option<RingerMode>, KioskError> {
        let mode = self
            .gate
            .optional("ringer_mode", self.gate.provider().ringer_mode())
            .await?;
        if mode.is_some() {
            self.state.update(|snapshot| snapshot.ringer_mode = mode);
        }
        Ok(mode)
    }

    /// Switching to `Silent` needs do-not-disturb access; without it the
    /// provider is not asked to change anything.
    pub async fn set_ringer_mode(&self, mode: RingerMode) -> Result<bool, KioskError> {
        if mode == RingerMode::Silent && !self.has_dnd_access().await? {
            warn!("silent ringer refused without do-not-disturb access");
            if self.auto_request_remediation {
                if let Err(err) = self.request_dnd_access().await {
                    warn!(error = %err, "do-not-disturb access request failed");
                }
            }
            return Err(KioskError::PreconditionNotMet(Remediation::RequestDndAccess));
        }
        let applied = self
            .gate
            .invoke("set_ringer_mode", self.gate.provider().set_ringer_mode(mode))
            .await?;
        if applied {
            info!(mode = mode.as_str(), "ringer mode changed");
            self.state
                .update(|snapshot| snapshot.ringer_mode = Some(mode));
        }
        Ok(applied)
    }

    pub async fn has_dnd_access(&self) -> Result<bool, KioskError> {
        self.gate
            .invoke("has_dnd_access", self.gate.provider().has_dnd_access())
            .await
    }

    pub async fn request_dnd_access(&self) -> Result<(), KioskError> {
        self.gate
            .invoke("request_dnd_access", self.gate.provider().request_dnd_access())
            .await
    }

    /// Asks the provider to begin emitting on the audio and brightness
    /// channels.
    pub async fn start_observing(&self) -> Result<(), KioskError> {
        self.gate
            .invoke("start_observing", self.gate.provider().start_observing())
            .await
    }

    pub async fn stop_observing(&self) -> Result<(), KioskError> {
        self.gate
            .invoke("stop_observing", self.gate.provider().stop_observing())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::NullProvider;
    use crate::testing::FakeProvider;
    use crate::types::APP_BRIGHTNESS_SYSTEM;

    fn normalizer_with(fake: &Arc<FakeProvider>, auto_request: bool) -> AudioNormalizer {
        let gate = Arc::new(CapabilityGate::new(fake.clone()));
        AudioNormalizer::new(gate, Arc::new(SharedState::default()), auto_request)
    }

    #[tokio::test]
    async fn setters_clamp_before_the_provider_sees_them() {
        let fake = Arc::new(FakeProvider::default());
        let audio = normalizer_with(&fake, false);

        assert_eq!(audio.set_system_brightness(999).await, Ok(true));
        assert_eq!(fake.state().system_brightness, 255);
        assert_eq!(audio.set_system_brightness(-4).await, Ok(true));
        assert_eq!(fake.state().system_brightness, 0);

        audio.set_app_brightness(1.7).await.unwrap();
        assert_eq!(fake.state().app_brightness, 1.0);

        audio.set_stream_volume(AudioStream::Music, f32::NAN).await.unwrap();
        assert_eq!(fake.state().volumes.get(&AudioStream::Music), Some(&0.0));

        audio.set_global_volume(-3.0).await.unwrap();
        assert_eq!(fake.state().global_volume, 0.0);
    }

    #[tokio::test]
    async fn reset_app_brightness_writes_sentinel() {
        let fake = Arc::new(FakeProvider::default());
        let audio = normalizer_with(&fake, false);
        audio.set_app_brightness(0.4).await.unwrap();
        assert_eq!(audio.app_brightness().await, Ok(Some(AppBrightness::Level(0.4))));
        audio.reset_app_brightness().await.unwrap();
        assert_eq!(fake.state().app_brightness, APP_BRIGHTNESS_SYSTEM);
        assert_eq!(audio.app_brightness().await, Ok(Some(AppBrightness::System)));
    }

    #[tokio::test]
    async fn readings_are_clamped_and_cached() {
        let fake = Arc::new(FakeProvider::default());
        fake.state().system_brightness = 512;
        fake.state().global_volume = 4.0;
        let audio = normalizer_with(&fake, false);
        assert_eq!(audio.system_brightness().await, Ok(Some(255)));
        assert_eq!(audio.global_volume().await, Ok(Some(1.0)));
        let snapshot = audio.state.snapshot();
        assert_eq!(snapshot.system_brightness, Some(255));
        assert_eq!(snapshot.global_volume, Some(1.0));
    }

    #[tokio::test]
    async fn silent_ringer_without_dnd_never_calls_provider() {
        let fake = Arc::new(FakeProvider::default());
        fake.state().dnd_access = false;
        let audio = normalizer_with(&fake, false);
        assert_eq!(
            audio.set_ringer_mode(RingerMode::Silent).await,
            Err(KioskError::PreconditionNotMet(Remediation::RequestDndAccess))
        );
        assert_eq!(fake.calls("set_ringer_mode"), 0);
        assert_eq!(fake.calls("request_dnd_access"), 0);
        assert_eq!(fake.state().ringer_mode, RingerMode::Normal);
    }

    #[tokio::test]
    async fn auto_remediation_requests_dnd_access() {
        let fake = Arc::new(FakeProvider::default());
        fake.state().dnd_access = false;
        let audio = normalizer_with(&fake, true);
        assert!(audio.set_ringer_mode(RingerMode::Silent).await.is_err());
        assert_eq!(fake.calls("request_dnd_access"), 1);
        assert_eq!(fake.calls("set_ringer_mode"), 0);
    }

    #[tokio::test]
    async fn non_silent_modes_skip_dnd_check() {
        let fake = Arc::new(FakeProvider::default());
        fake.state().dnd_access = false;
        let audio = normalizer_with(&fake, false);
        assert_eq!(audio.set_ringer_mode(RingerMode::Vibrate).await, Ok(true));
        assert_eq!(fake.calls("has_dnd_access"), 0);
        assert_eq!(audio.ringer_mode().await, Ok(Some(RingerMode::Vibrate)));
    }

    #[tokio::test]
    async fn mute_is_pass_through() {
        let fake = Arc::new(FakeProvider::default());
        let audio = normalizer_with(&fake, false);
        audio.set_stream_muted(AudioStream::Alarm, true).await.unwrap();
        assert_eq!(audio.is_stream_muted(AudioStream::Alarm).await, Ok(true));
        audio.set_global_muted(true).await.unwrap();
        assert_eq!(audio.is_global_muted().await, Ok(true));
    }

    #[tokio::test]
    async fn degraded_mute_reads_keep_the_cached_value() {
        let fake = Arc::new(FakeProvider::default());
        let audio = normalizer_with(&fake, false);
        audio.set_stream_muted(AudioStream::Alarm, true).await.unwrap();
        audio.set_global_muted(true).await.unwrap();

        fake.fail_next("is_stream_muted", ProviderError::Unavailable("adb gone".into()));
        fake.fail_next("is_global_muted", ProviderError::Unavailable("adb gone".into()));
        assert_eq!(audio.is_stream_muted(AudioStream::Alarm).await, Ok(false));
        assert_eq!(audio.is_global_muted().await, Ok(false));

        let snapshot = audio.state.snapshot();
        assert_eq!(snapshot.stream_muted.get(&AudioStream::Alarm), Some(&true));
        assert_eq!(snapshot.global_muted, Some(true));
    }

    #[tokio::test]
    async fn observing_toggles_provider_emission() {
        let fake = Arc::new(FakeProvider::default());
        let audio = normalizer_with(&fake, false);
        audio.start_observing().await.unwrap();
        assert!(fake.state().observing);
        audio.stop_observing().await.unwrap();
        assert!(!fake.state().observing);
    }

    #[tokio::test]
    async fn absent_provider_degrades() {
        let gate = Arc::new(CapabilityGate::new(Arc::new(NullProvider)));
        let audio = AudioNormalizer::new(gate, Arc::new(SharedState::default()), false);
        assert_eq!(audio.system_brightness().await, Ok(None));
        assert_eq!(audio.set_global_volume(0.5).await, Ok(false));
        assert_eq!(audio.is_global_muted().await, Ok(false));
        assert_eq!(audio.is_stream_muted(AudioStream::Ring).await, Ok(false));
        assert_eq!(audio.ringer_mode().await, Ok(None));
        assert_eq!(
            audio.set_ringer_mode(RingerMode::Silent).await,
            Err(KioskError::PreconditionNotMet(Remediation::RequestDndAccess))
        );
        assert_eq!(audio.start_observing().await, Ok(()));
    }
}
