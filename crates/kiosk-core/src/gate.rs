use std::{future::Future, sync::Arc};

use kiosk_telemetry as telemetry;
use tracing::warn;

use crate::error::{KioskError, ProviderError, ProviderResult};
use crate::provider::CapabilityProvider;
use crate::types::DownloadedFile;

/// Value an operation resolves to when the capability layer is missing.
pub trait Degrade {
    fn degraded() -> Self;
}

impl Degrade for () {
    fn degraded() -> Self {}
}

impl Degrade for bool {
    fn degraded() -> Self {
        false
    }
}

impl Degrade for u32 {
    fn degraded() -> Self {
        0
    }
}

impl<T> Degrade for Option<T> {
    fn degraded() -> Self {
        None
    }
}

impl Degrade for Vec<DownloadedFile> {
    fn degraded() -> Self {
        Vec::new()
    }
}

/// Single entry point into the provider. Centralizes the platform-presence
/// check so call sites never branch on it.
pub struct CapabilityGate {
    provider: Arc<dyn CapabilityProvider>,
}

impl CapabilityGate {
    pub fn new(provider: Arc<dyn CapabilityProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &dyn CapabilityProvider {
        self.provider.as_ref()
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_available()
    }

    /// Runs `call`, substituting the degraded default when the provider is
    /// absent or reports itself unavailable.
    pub async fn invoke<T, F>(&self, operation: &'static str, call: F) -> Result<T, KioskError>
    where
        T: Degrade,
        F: Future<Output = ProviderResult<T>>,
    {
        if !self.provider.is_available() {
            degraded_diagnostic(operation, "provider not present");
            return Ok(T::degraded());
        }
        match call.await {
            Ok(value) => Ok(value),
            Err(ProviderError::Unavailable(reason)) => {
                degraded_diagnostic(operation, &reason);
                Ok(T::degraded())
            }
            Err(err) => Err(KioskError::from_provider(operation, err)),
        }
    }

    /// Like [`invoke`](Self::invoke) for reads whose degraded form is "no
    /// value".
    pub async fn optional<T, F>(
        &self,
        operation: &'static str,
        call: F,
    ) -> Result<Option<T>, KioskError>
    where
        F: Future<Output = ProviderResult<T>>,
    {
        self.invoke(operation, async { call.await.map(Some) }).await
    }

    /// For operations with no meaningful default, such as a download. The
    /// diagnostic is still emitted; the caller gets `CapabilityUnavailable`.
    pub async fn require<T, F>(&self, operation: &'static str, call: F) -> Result<T, KioskError>
    where
        F: Future<Output = ProviderResult<T>>,
    {
        if !self.provider.is_available() {
            degraded_diagnostic(operation, "provider not present");
            return Err(KioskError::CapabilityUnavailable { operation });
        }
        call.await.map_err(|err| {
            if let ProviderError::Unavailable(reason) = &err {
                degraded_diagnostic(operation, reason);
            }
            KioskError::from_provider(operation, err)
        })
    }

    /// Synchronous fire-and-forget operations become no-ops when absent.
    pub fn fire(&self, operation: &'static str, call: impl FnOnce(&dyn CapabilityProvider)) {
        if !self.provider.is_available() {
            degraded_diagnostic(operation, "provider not present");
            return;
        }
        call(self.provider.as_ref());
    }
}

fn degraded_diagnostic(operation: &'static str, reason: &str) {
    warn!(operation, reason, "capability unavailable; using degraded default");
    telemetry::event(
        "capability.degraded",
        &[("operation", operation), ("reason", reason)],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::NullProvider;
    use crate::testing::FakeProvider;

    #[tokio::test]
    async fn absent_provider_degrades_every_shape() {
        let gate = CapabilityGate::new(Arc::new(NullProvider));
        let owner = gate
            .invoke("is_device_owner", gate.provider().is_device_owner())
            .await;
        assert_eq!(owner, Ok(false));
        let files = gate
            .invoke("list_downloaded_files", gate.provider().list_downloaded_files())
            .await;
        assert_eq!(files, Ok(Vec::new()));
        let cleared = gate
            .invoke("clear_downloaded_files", gate.provider().clear_downloaded_files())
            .await;
        assert_eq!(cleared, Ok(0));
        let unit = gate
            .invoke("request_device_owner", gate.provider().request_device_owner())
            .await;
        assert_eq!(unit, Ok(()));
        let level = gate
            .optional("system_brightness", gate.provider().system_brightness())
            .await;
        assert_eq!(level, Ok(None));
        gate.fire("start_kiosk", |provider| provider.start_kiosk());
    }

    #[tokio::test]
    async fn degraded_calls_leave_a_diagnostic() {
        let gate = CapabilityGate::new(Arc::new(NullProvider));
        let _ = gate
            .invoke("gate_diagnostic_check", gate.provider().has_dnd_access())
            .await;
        let seen = telemetry::recent().into_iter().any(|evt| {
            evt.event_type == "capability.degraded"
                && evt.properties.get("operation").map(String::as_str)
                    == Some("gate_diagnostic_check")
        });
        assert!(seen);
    }

    #[tokio::test]
    async fn payload_operations_report_unavailability() {
        let gate = CapabilityGate::new(Arc::new(NullProvider));
        let result = gate
            .require("download", gate.provider().download("https://example.test/a.apk", None))
            .await;
        assert_eq!(
            result,
            Err(KioskError::CapabilityUnavailable {
                operation: "download"
            })
        );
    }

    #[tokio::test]
    async fn runtime_unavailability_also_degrades() {
        let fake = Arc::new(FakeProvider::default());
        fake.fail_next("has_install_permission", ProviderError::Unavailable("adb gone".into()));
        let gate = CapabilityGate::new(fake.clone());
        let granted = gate
            .invoke("has_install_permission", gate.provider().has_install_permission())
            .await;
        assert_eq!(granted, Ok(false));
    }

    #[tokio::test]
    async fn other_provider_errors_pass_through() {
        let fake = Arc::new(FakeProvider::default());
        fake.fail_next(
            "clear_device_owner",
            ProviderError::rejected("security", "not allowed"),
        );
        let gate = CapabilityGate::new(fake.clone());
        let result = gate
            .invoke("clear_device_owner", gate.provider().clear_device_owner())
            .await;
        assert_eq!(
            result,
            Err(KioskError::Provider {
                code: "security".into(),
                message: "not allowed".into()
            })
        );
    }
}
