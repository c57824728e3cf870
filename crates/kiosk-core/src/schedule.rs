//! Shutdown and boot timers plus immediate power-off.
//!
//! Every mutating call is followed by a read-back from the provider, and the
//! read-back value is what gets cached and returned. A boot schedule being
//! persisted says nothing about whether the device can actually wake itself
//! at that time; callers should treat it as a stored preference.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{KioskError, Remediation};
use crate::gate::CapabilityGate;
use crate::state::SharedState;
use crate::types::{ScheduleKind, ScheduledPowerSettings};

/// Result of a schedule write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub requested: ScheduledPowerSettings,
    /// Whether the provider reported the write as successful.
    pub accepted: bool,
    /// What the provider holds after the write; may differ from `requested`.
    pub applied: Option<ScheduledPowerSettings>,
}

impl ScheduleOutcome {
    pub fn matches_request(&self) -> bool {
        self.applied == Some(self.requested)
    }
}

/// Checks hour and minute ranges. Takes wide integers so out-of-range input
/// from callers is representable and rejected here.
pub fn validate(hour: i32, minute: i32, repeat: bool) -> Result<ScheduledPowerSettings, KioskError> {
    let hour = u8::try_from(hour)
        .ok()
        .filter(|hour| *hour <= 23)
        .ok_or_else(|| KioskError::validation(format!("hour must be 0..=23, got {hour}")))?;
    let minute = u8::try_from(minute)
        .ok()
        .filter(|minute| *minute <= 59)
        .ok_or_else(|| KioskError::validation(format!("minute must be 0..=59, got {minute}")))?;
    Ok(ScheduledPowerSettings {
        hour,
        minute,
        repeat,
    })
}

pub struct PowerSchedule {
    gate: Arc<CapabilityGate>,
    state: Arc<SharedState>,
}

impl PowerSchedule {
    pub(crate) fn new(gate: Arc<CapabilityGate>, state: Arc<SharedState>) -> Self {
        Self { gate, state }
    }

    pub async fn set_scheduled_shutdown(
        &self,
        hour: i32,
        minute: i32,
        repeat: bool,
    ) -> Result<ScheduleOutcome, KioskError> {
        self.set(ScheduleKind::Shutdown, hour, minute, repeat).await
    }

    /// Stores a boot schedule. The device may not honor it.
    pub async fn set_scheduled_boot(
        &self,
        hour: i32,
        minute: i32,
        repeat: bool,
    ) -> Result<ScheduleOutcome, KioskError> {
        self.set(ScheduleKind::Boot, hour, minute, repeat).await
    }

    pub async fn get_scheduled_shutdown(
        &self,
    ) -> Result<Option<ScheduledPowerSettings>, KioskError> {
        self.get(ScheduleKind::Shutdown).await
    }

    pub async fn get_scheduled_boot(&self) -> Result<Option<ScheduledPowerSettings>, KioskError> {
        self.get(ScheduleKind::Boot).await
    }

    pub async fn cancel_scheduled_shutdown(&self) -> Result<bool, KioskError> {
        self.cancel(ScheduleKind::Shutdown).await
    }

    pub async fn cancel_scheduled_boot(&self) -> Result<bool, KioskError> {
        self.cancel(ScheduleKind::Boot).await
    }

    pub async fn set(
        &self,
        kind: ScheduleKind,
        hour: i32,
        minute: i32,
        repeat: bool,
    ) -> Result<ScheduleOutcome, KioskError> {
        let requested = validate(hour, minute, repeat)?;
        let accepted = self
            .gate
            .invoke("set_schedule", self.gate.provider().set_schedule(kind, requested))
            .await?;
        let applied = self.get(kind).await?;
        if applied != Some(requested) {
            warn!(
                kind = kind.as_str(),
                ?requested,
                ?applied,
                accepted,
                "schedule read-back differs from request"
            );
        } else {
            info!(kind = kind.as_str(), hour, minute, repeat, "schedule stored");
        }
        Ok(ScheduleOutcome {
            requested,
            accepted,
            applied,
        })
    }

    /// Reads the provider's current value and refreshes the cache with it.
    pub async fn get(
        &self,
        kind: ScheduleKind,
    ) -> Result<Option<ScheduledPowerSettings>, KioskError> {
        let value = self
            .gate
            .invoke("schedule", self.gate.provider().schedule(kind))
            .await?;
        self.state.set_schedule(kind, value);
        Ok(value)
    }

    pub async fn cancel(&self, kind: ScheduleKind) -> Result<bool, KioskError> {
        let cancelled = self
            .gate
            .invoke("cancel_schedule", self.gate.provider().cancel_schedule(kind))
            .await?;
        if cancelled {
            self.state.set_schedule(kind, None);
        }
        Ok(cancelled)
    }

    /// Powers the device off now. Without `confirmed` nothing reaches the
    /// provider and the caller is asked to confirm.
    pub async fn perform_immediate_shutdown(&self, confirmed: bool) -> Result<bool, KioskError> {
        if !confirmed {
            return Err(KioskError::PreconditionNotMet(Remediation::ConfirmShutdown));
        }
        warn!("immediate shutdown requested");
        self.gate
            .invoke("shutdown_now", self.gate.provider().shutdown_now())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::NullProvider;
    use crate::testing::FakeProvider;

    fn schedule_with(fake: &Arc<FakeProvider>) -> (PowerSchedule, Arc<SharedState>) {
        let state = Arc::new(SharedState::default());
        let gate = Arc::new(CapabilityGate::new(fake.clone()));
        (PowerSchedule::new(gate, Arc::clone(&state)), state)
    }

    #[test]
    fn validate_accepts_boundaries() {
        assert!(validate(0, 0, false).is_ok());
        assert!(validate(23, 59, true).is_ok());
        for (hour, minute) in [(24, 0), (-1, 0), (0, 60), (0, -1), (300, 0), (0, 256)] {
            assert!(
                matches!(validate(hour, minute, true), Err(KioskError::Validation(_))),
                "{hour}:{minute}"
            );
        }
    }

    #[tokio::test]
    async fn invalid_hour_never_reaches_provider() {
        let fake = Arc::new(FakeProvider::default());
        let (schedule, state) = schedule_with(&fake);
        let result = schedule.set_scheduled_shutdown(25, 0, true).await;
        assert!(matches!(result, Err(KioskError::Validation(_))));
        assert_eq!(fake.calls("set_schedule"), 0);
        assert_eq!(fake.calls("schedule"), 0);
        assert!(fake.state().schedules.is_empty());
        assert_eq!(state.snapshot().shutdown_schedule, None);
    }

    #[tokio::test]
    async fn set_reads_back_and_caches() {
        let fake = Arc::new(FakeProvider::default());
        let (schedule, state) = schedule_with(&fake);
        let outcome = schedule.set_scheduled_shutdown(22, 30, true).await.unwrap();
        let expected = ScheduledPowerSettings {
            hour: 22,
            minute: 30,
            repeat: true,
        };
        assert!(outcome.accepted);
        assert!(outcome.matches_request());
        assert_eq!(outcome.applied, Some(expected));
        assert_eq!(fake.calls("schedule"), 1);
        assert_eq!(state.snapshot().shutdown_schedule, Some(expected));
    }

    #[tokio::test]
    async fn coerced_value_is_what_gets_cached() {
        let fake = Arc::new(FakeProvider::default());
        fake.state().coerce_minute = Some(0);
        let (schedule, state) = schedule_with(&fake);
        let outcome = schedule.set_scheduled_boot(6, 45, false).await.unwrap();
        assert!(!outcome.matches_request());
        let applied = outcome.applied.unwrap();
        assert_eq!((applied.hour, applied.minute), (6, 0));
        assert_eq!(state.snapshot().boot_schedule, Some(applied));
    }

    #[tokio::test]
    async fn failed_cancel_keeps_cache() {
        let fake = Arc::new(FakeProvider::default());
        let (schedule, state) = schedule_with(&fake);
        schedule.set_scheduled_shutdown(1, 2, false).await.unwrap();

        fake.fail_next("cancel_schedule", ProviderError::rejected("io", "write failed"));
        assert!(schedule.cancel_scheduled_shutdown().await.is_err());
        assert!(state.snapshot().shutdown_schedule.is_some());

        assert_eq!(schedule.cancel_scheduled_shutdown().await, Ok(true));
        assert_eq!(state.snapshot().shutdown_schedule, None);
        assert_eq!(schedule.get_scheduled_shutdown().await, Ok(None));
    }

    #[tokio::test]
    async fn unconfirmed_shutdown_is_refused() {
        let fake = Arc::new(FakeProvider::default());
        let (schedule, _) = schedule_with(&fake);
        assert_eq!(
            schedule.perform_immediate_shutdown(false).await,
            Err(KioskError::PreconditionNotMet(Remediation::ConfirmShutdown))
        );
        assert_eq!(fake.calls("shutdown_now"), 0);
        assert_eq!(schedule.perform_immediate_shutdown(true).await, Ok(true));
        assert_eq!(fake.calls("shutdown_now"), 1);
    }

    #[tokio::test]
    async fn absent_provider_reports_nothing_applied() {
        let gate = Arc::new(CapabilityGate::new(Arc::new(NullProvider)));
        let schedule = PowerSchedule::new(gate, Arc::new(SharedState::default()));
        let outcome = schedule.set_scheduled_shutdown(8, 0, true).await.unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.applied, None);
        assert_eq!(schedule.cancel_scheduled_boot().await, Ok(false));
        assert_eq!(schedule.perform_immediate_shutdown(true).await, Ok(false));
    }
}
