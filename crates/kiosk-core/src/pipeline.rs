//! Package acquisition and installation.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use kiosk_telemetry as telemetry;
use tracing::{info, warn};

use crate::error::{KioskError, Remediation};
use crate::gate::CapabilityGate;
use crate::state::{PipelineState, SharedState};
use crate::types::{
    DownloadProgress, DownloadResult, DownloadedFile, InstallRequest, InstallState, InstallStatus,
    InstallStrategy,
};

pub struct Pipeline {
    gate: Arc<CapabilityGate>,
    state: Arc<SharedState>,
    auto_request_remediation: bool,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Pipeline {
    pub(crate) fn new(
        gate: Arc<CapabilityGate>,
        state: Arc<SharedState>,
        auto_request_remediation: bool,
    ) -> Self {
        Self {
            gate,
            state,
            auto_request_remediation,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state.pipeline()
    }

    /// True while a composed download-then-install call is running.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn download(
        &self,
        url: &str,
        file_name: Option<&str>,
    ) -> Result<DownloadResult, KioskError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(KioskError::validation("url is required"));
        }
        let file_name = file_name.map(str::trim).filter(|name| !name.is_empty());
        if let Some(name) = file_name {
            if name.contains('/') || name == ".." {
                return Err(KioskError::validation(format!("invalid file name: {name}")));
            }
        }

        info!(url, "starting package download");
        self.state
            .set_pipeline(PipelineState::Downloading(DownloadProgress::default()));
        let result = self
            .gate
            .require("download", self.gate.provider().download(url, file_name))
            .await;
        match result {
            Ok(result) => {
                info!(
                    file = %result.file_path,
                    size = result.file_size,
                    "package downloaded"
                );
                self.state
                    .set_pipeline(PipelineState::Downloaded(result.clone()));
                Ok(result)
            }
            Err(err) => {
                warn!(url, error = %err, "package download failed");
                self.state.set_pipeline(PipelineState::Idle);
                Err(err)
            }
        }
    }

    pub async fn has_install_permission(&self) -> Result<bool, KioskError> {
        self.gate
            .invoke(
                "has_install_permission",
                self.gate.provider().has_install_permission(),
            )
            .await
    }

    pub async fn request_install_permission(&self) -> Result<(), KioskError> {
        self.gate
            .invoke(
                "request_install_permission",
                self.gate.provider().request_install_permission(),
            )
            .await
    }

    /// Standard install of a downloaded package.
    pub async fn install(&self, file_path: &str) -> Result<(), KioskError> {
        self.install_with(file_path, InstallStrategy::Standard, None)
            .await
    }

    pub async fn silent_install(&self, file_path: &str) -> Result<(), KioskError> {
        self.install_with(file_path, InstallStrategy::Silent, None)
            .await
    }

    /// `package_name` lets the provider skip discovering the package from
    /// the archive before launching it.
    pub async fn silent_install_and_launch(
        &self,
        file_path: &str,
        package_name: Option<&str>,
    ) -> Result<(), KioskError> {
        self.install_with(file_path, InstallStrategy::SilentAndLaunch, package_name)
            .await
    }

    pub async fn system_silent_install(&self, file_path: &str) -> Result<(), KioskError> {
        self.install_with(file_path, InstallStrategy::SystemSilent, None)
            .await
    }

    /// Runs the strategy's precondition check, then dispatches the install.
    /// The outcome arrives on the install status channel.
    pub async fn install_with(
        &self,
        file_path: &str,
        strategy: InstallStrategy,
        package_name: Option<&str>,
    ) -> Result<(), KioskError> {
        let file_path = file_path.trim();
        if file_path.is_empty() {
            return Err(KioskError::validation("file_path is required"));
        }
        self.check_precondition(strategy).await?;

        telemetry::event(
            "install.requested",
            &[("strategy", strategy.as_str()), ("file_path", file_path)],
        );
        info!(file_path, strategy = strategy.as_str(), "dispatching install");

        let package_name = package_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let mut pending = InstallStatus::new(InstallState::Installing);
        pending.package_name = package_name.clone();
        self.state.record_install_status(pending);

        let request = InstallRequest {
            file_path: file_path.to_string(),
            strategy,
            package_name,
        };
        let dispatched = self
            .gate
            .require("install", self.gate.provider().install(request))
            .await;
        if let Err(err) = &dispatched {
            warn!(file_path, error = %err, "install dispatch failed");
            self.state.record_install_status(
                InstallStatus::new(InstallState::Error).with_message(err.to_string()),
            );
        }
        dispatched
    }

    async fn check_precondition(&self, strategy: InstallStrategy) -> Result<(), KioskError> {
        let provider = self.gate.provider();
        let (granted, remediation) = if strategy.requires_device_owner() {
            let owner = self
                .gate
                .invoke("is_device_owner", provider.is_device_owner())
                .await?;
            (owner, Remediation::RequestDeviceOwner)
        } else {
            (
                self.has_install_permission().await?,
                Remediation::RequestInstallPermission,
            )
        };
        if granted {
            return Ok(());
        }

        warn!(
            strategy = strategy.as_str(),
            remediation = remediation.as_str(),
            "install precondition not met"
        );
        telemetry::event(
            "install.short_circuit",
            &[
                ("strategy", strategy.as_str()),
                ("remediation", remediation.as_str()),
            ],
        );
        if self.auto_request_remediation {
            let requested = match remediation {
                Remediation::RequestDeviceOwner => {
                    self.gate
                        .invoke("request_device_owner", provider.request_device_owner())
                        .await
                }
                _ => self.request_install_permission().await,
            };
            if let Err(err) = requested {
                warn!(error = %err, "remediation request failed");
            }
        }
        Err(KioskError::PreconditionNotMet(remediation))
    }

    pub async fn download_and_install(&self, url: &str) -> Result<DownloadResult, KioskError> {
        self.acquire_then_install(url, InstallStrategy::Standard, None)
            .await
    }

    /// `package_name` names the app being installed so the launch variant
    /// can start it even when the install replaces an existing version.
    pub async fn download_and_silent_install(
        &self,
        url: &str,
        launch: bool,
        package_name: Option<&str>,
    ) -> Result<DownloadResult, KioskError> {
        let strategy = if launch {
            InstallStrategy::SilentAndLaunch
        } else {
            InstallStrategy::Silent
        };
        self.acquire_then_install(url, strategy, package_name).await
    }

    async fn acquire_then_install(
        &self,
        url: &str,
        strategy: InstallStrategy,
        package_name: Option<&str>,
    ) -> Result<DownloadResult, KioskError> {
        let _guard = self.begin_in_flight()?;
        // Fail before spending a download on a strategy that cannot run.
        self.check_precondition(strategy).await?;
        let result = self.download(url, None).await?;
        self.install_with(&result.file_path, strategy, package_name)
            .await?;
        Ok(result)
    }

    fn begin_in_flight(&self) -> Result<InFlightGuard<'_>, KioskError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(KioskError::InFlight);
        }
        Ok(InFlightGuard(&self.in_flight))
    }

    /// Waits for the next terminal install status. Returns at once when the
    /// last attempt has already finished. There is no timeout: a provider
    /// that never reports a terminal state keeps this pending until the
    /// agent shuts down, which yields `Closed`.
    pub async fn wait_for_terminal(&self) -> Result<InstallStatus, KioskError> {
        let mut updates = self.state.install_updates().ok_or(KioskError::Closed)?;
        loop {
            if let Some(status) = updates.borrow_and_update().clone() {
                if status.state.is_terminal() {
                    return Ok(status);
                }
            }
            updates.changed().await.map_err(|_| KioskError::Closed)?;
        }
    }

    pub async fn list_downloaded_files(&self) -> Result<Vec<DownloadedFile>, KioskError> {
        self.gate
            .invoke(
                "list_downloaded_files",
                self.gate.provider().list_downloaded_files(),
            )
            .await
    }

    pub async fn delete_downloaded_file(&self, file_path: &str) -> Result<bool, KioskError> {
        let file_path = file_path.trim();
        if file_path.is_empty() {
            return Err(KioskError::validation("file_path is required"));
        }
        self.gate
            .invoke(
                "delete_downloaded_file",
                self.gate.provider().delete_downloaded_file(file_path),
            )
            .await
    }

    pub async fn clear_downloaded_files(&self) -> Result<u32, KioskError> {
        self.gate
            .invoke(
                "clear_downloaded_files",
                self.gate.provider().clear_downloaded_files(),
            )
            .await
    }

    pub async fn is_app_installed(&self, package_name: &str) -> Result<bool, KioskError> {
        let package_name = require_package(package_name)?;
        self.gate
            .invoke(
                "is_app_installed",
                self.gate.provider().is_app_installed(package_name),
            )
            .await
    }

    /// Launches an installed app. A package that is not installed yields
    /// `NotFound` without asking the provider to launch anything. The
    /// presence check does not degrade: an unreachable provider is
    /// `CapabilityUnavailable`, never `NotFound`.
    pub async fn launch_app(&self, package_name: &str) -> Result<(), KioskError> {
        let package_name = require_package(package_name)?;
        let installed = self
            .gate
            .require(
                "is_app_installed",
                self.gate.provider().is_app_installed(package_name),
            )
            .await?;
        if !installed {
            return Err(KioskError::NotFound(format!(
                "package not installed: {package_name}"
            )));
        }
        self.gate
            .require("launch_app", self.gate.provider().launch_app(package_name))
            .await
    }
}

fn require_package(package_name: &str) -> Result<&str, KioskError> {
    let package_name = package_name.trim();
    if package_name.is_empty() {
        return Err(KioskError::validation("package_name is required"));
    }
    if package_name.chars().any(char::is_whitespace) {
        return Err(KioskError::validation(format!(
            "invalid package name: {package_name}"
        )));
    }
    Ok(package_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::{LaunchFailure, ProviderError};
    use crate::provider::NullProvider;
    use crate::testing::FakeProvider;

    fn pipeline_with(fake: &Arc<FakeProvider>, auto_request: bool) -> Pipeline {
        let gate = Arc::new(CapabilityGate::new(fake.clone()));
        Pipeline::new(gate, Arc::new(SharedState::default()), auto_request)
    }

    #[tokio::test]
    async fn missing_install_permission_short_circuits_standard_install() {
        let fake = Arc::new(FakeProvider::default());
        fake.state().install_permission = false;
        let pipeline = pipeline_with(&fake, false);

        let downloaded = pipeline
            .download("https://repo.example.test/apps/lobby.apk", None)
            .await
            .unwrap();
        assert_eq!(downloaded.file_name, "lobby.apk");
        assert_eq!(downloaded.file_path, "/data/downloads/lobby.apk");
        assert_eq!(downloaded.file_size, 4096);

        let result = pipeline.install(&downloaded.file_path).await;
        assert_eq!(
            result,
            Err(KioskError::PreconditionNotMet(
                Remediation::RequestInstallPermission
            ))
        );
        assert_eq!(fake.calls("install"), 0);
        assert_eq!(fake.calls("request_install_permission"), 0);
    }

    #[tokio::test]
    async fn auto_remediation_triggers_permission_request_flow() {
        let fake = Arc::new(FakeProvider::default());
        fake.state().install_permission = false;
        let pipeline = pipeline_with(&fake, true);
        let result = pipeline.install("/data/downloads/a.apk").await;
        assert_eq!(
            result.unwrap_err().remediation(),
            Some(Remediation::RequestInstallPermission)
        );
        assert_eq!(fake.calls("request_install_permission"), 1);
        assert_eq!(fake.calls("install"), 0);
    }

    #[tokio::test]
    async fn silent_strategies_require_device_owner() {
        let fake = Arc::new(FakeProvider::default());
        fake.state().device_owner = false;
        let pipeline = pipeline_with(&fake, false);

        for outcome in [
            pipeline.silent_install("/data/downloads/a.apk").await,
            pipeline
                .silent_install_and_launch("/data/downloads/a.apk", Some("com.example.a"))
                .await,
            pipeline.system_silent_install("/data/downloads/a.apk").await,
        ] {
            assert_eq!(
                outcome,
                Err(KioskError::PreconditionNotMet(Remediation::RequestDeviceOwner))
            );
        }
        assert_eq!(fake.calls("install"), 0);
        assert_eq!(fake.calls("is_device_owner"), 3);
    }

    #[tokio::test]
    async fn granted_install_is_dispatched_and_marks_installing() {
        let fake = Arc::new(FakeProvider::default());
        let pipeline = pipeline_with(&fake, false);
        pipeline
            .silent_install_and_launch(" /data/downloads/a.apk ", Some("com.example.a"))
            .await
            .unwrap();
        let installs = fake.state().installs.clone();
        assert_eq!(installs.len(), 1);
        assert_eq!(installs[0].file_path, "/data/downloads/a.apk");
        assert_eq!(installs[0].strategy, InstallStrategy::SilentAndLaunch);
        assert_eq!(installs[0].package_name.as_deref(), Some("com.example.a"));
        assert!(pipeline.state().is_installing());
    }

    #[tokio::test]
    async fn download_failure_never_reaches_install() {
        let fake = Arc::new(FakeProvider::default());
        fake.fail_next(
            "download",
            ProviderError::rejected("network", "connection reset"),
        );
        let pipeline = pipeline_with(&fake, false);
        let result = pipeline
            .download_and_install("https://repo.example.test/a.apk")
            .await;
        assert_eq!(
            result,
            Err(KioskError::Provider {
                code: "network".into(),
                message: "connection reset".into()
            })
        );
        assert_eq!(fake.calls("install"), 0);
        assert!(!pipeline.is_in_flight());
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn composed_call_checks_privilege_before_downloading() {
        let fake = Arc::new(FakeProvider::default());
        fake.state().device_owner = false;
        let pipeline = pipeline_with(&fake, false);
        let result = pipeline
            .download_and_silent_install("https://repo.example.test/a.apk", true, None)
            .await;
        assert_eq!(result.unwrap_err().remediation(), Some(Remediation::RequestDeviceOwner));
        assert_eq!(fake.calls("download"), 0);
        assert_eq!(fake.calls("install"), 0);
        assert!(!pipeline.is_in_flight());
    }

    #[tokio::test]
    async fn composed_call_downloads_then_installs() {
        let fake = Arc::new(FakeProvider::default());
        let pipeline = pipeline_with(&fake, false);
        let result = pipeline
            .download_and_silent_install("https://repo.example.test/kiosk.apk", false, None)
            .await
            .unwrap();
        assert_eq!(result.file_name, "kiosk.apk");
        let installs = fake.state().installs.clone();
        assert_eq!(installs.len(), 1);
        assert_eq!(installs[0].strategy, InstallStrategy::Silent);
        assert_eq!(installs[0].file_path, result.file_path);
        assert!(!pipeline.is_in_flight());
    }

    #[tokio::test]
    async fn composed_launch_carries_the_package_name() {
        let fake = Arc::new(FakeProvider::default());
        let pipeline = pipeline_with(&fake, false);
        pipeline
            .download_and_silent_install(
                "https://repo.example.test/signage.apk",
                true,
                Some(" com.example.signage "),
            )
            .await
            .unwrap();
        let installs = fake.state().installs.clone();
        assert_eq!(installs.len(), 1);
        assert_eq!(installs[0].strategy, InstallStrategy::SilentAndLaunch);
        assert_eq!(installs[0].package_name.as_deref(), Some("com.example.signage"));
        assert_eq!(
            pipeline.state(),
            PipelineState::Installing(
                InstallStatus::new(InstallState::Installing).with_package("com.example.signage")
            )
        );
    }

    #[tokio::test]
    async fn overlapping_composed_calls_are_rejected() {
        let fake = Arc::new(FakeProvider::default());
        let pipeline = pipeline_with(&fake, false);
        let guard = pipeline.begin_in_flight().unwrap();
        let result = pipeline
            .download_and_install("https://repo.example.test/a.apk")
            .await;
        assert_eq!(result, Err(KioskError::InFlight));
        assert_eq!(fake.calls("download"), 0);
        drop(guard);
        assert!(!pipeline.is_in_flight());
    }

    #[tokio::test]
    async fn launching_missing_package_is_not_found() {
        let fake = Arc::new(FakeProvider::default());
        let pipeline = pipeline_with(&fake, false);
        let result = pipeline.launch_app("com.example.missing").await;
        assert!(matches!(result, Err(KioskError::NotFound(_))));
        assert_eq!(fake.calls("launch_app"), 0);
        assert_eq!(fake.calls("is_app_installed"), 1);
    }

    #[tokio::test]
    async fn launch_failures_keep_their_reason() {
        let fake = Arc::new(FakeProvider::default());
        fake.state().installed.insert("com.example.kiosk".into());
        let pipeline = pipeline_with(&fake, false);

        fake.fail_next(
            "launch_app",
            ProviderError::NoLaunchTarget("com.example.kiosk".into()),
        );
        assert_eq!(
            pipeline.launch_app("com.example.kiosk").await,
            Err(KioskError::Launch(LaunchFailure::NoLaunchTarget))
        );

        fake.fail_next(
            "launch_app",
            ProviderError::LaunchException("SecurityException".into()),
        );
        assert_eq!(
            pipeline.launch_app("com.example.kiosk").await,
            Err(KioskError::Launch(LaunchFailure::Exception(
                "SecurityException".into()
            )))
        );

        assert_eq!(pipeline.launch_app("com.example.kiosk").await, Ok(()));
        assert_eq!(fake.calls("launch_app"), 3);
    }

    #[tokio::test]
    async fn lost_provider_during_launch_is_not_reported_as_missing() {
        let fake = Arc::new(FakeProvider::default());
        fake.state().installed.insert("com.example.kiosk".into());
        let pipeline = pipeline_with(&fake, false);
        fake.fail_next(
            "is_app_installed",
            ProviderError::Unavailable("adb gone".into()),
        );
        assert_eq!(
            pipeline.launch_app("com.example.kiosk").await,
            Err(KioskError::CapabilityUnavailable {
                operation: "is_app_installed"
            })
        );
        assert_eq!(fake.calls("launch_app"), 0);

        assert_eq!(pipeline.launch_app("com.example.kiosk").await, Ok(()));
    }

    #[tokio::test]
    async fn download_validation_happens_locally() {
        let fake = Arc::new(FakeProvider::default());
        let pipeline = pipeline_with(&fake, false);
        assert!(matches!(
            pipeline.download("   ", None).await,
            Err(KioskError::Validation(_))
        ));
        assert!(matches!(
            pipeline
                .download("https://repo.example.test/a.apk", Some("../a.apk"))
                .await,
            Err(KioskError::Validation(_))
        ));
        assert_eq!(fake.calls("download"), 0);
    }

    #[tokio::test]
    async fn wait_for_terminal_resolves_on_terminal_status() {
        let fake = Arc::new(FakeProvider::default());
        let pipeline = Arc::new(pipeline_with(&fake, false));
        pipeline.install("/data/downloads/a.apk").await.unwrap();

        let waiter = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.wait_for_terminal().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pipeline
            .state
            .record_install_status(InstallStatus::new(InstallState::Installed));
        let status = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(status.state, InstallState::Installed);
    }

    #[tokio::test]
    async fn absent_provider_turns_install_into_remediation() {
        let gate = Arc::new(CapabilityGate::new(Arc::new(NullProvider)));
        let pipeline = Pipeline::new(gate, Arc::new(SharedState::default()), false);
        assert_eq!(
            pipeline.install("/tmp/a.apk").await.unwrap_err().remediation(),
            Some(Remediation::RequestInstallPermission)
        );
        assert_eq!(pipeline.list_downloaded_files().await, Ok(Vec::new()));
        assert_eq!(pipeline.clear_downloaded_files().await, Ok(0));
        assert_eq!(pipeline.is_app_installed("com.example.a").await, Ok(false));
        assert_eq!(
            pipeline.launch_app("com.example.a").await,
            Err(KioskError::CapabilityUnavailable {
                operation: "is_app_installed"
            })
        );
    }
}
