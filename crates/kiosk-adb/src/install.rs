use std::collections::{BTreeMap, BTreeSet};

use kiosk_core::{
    InstallRequest, InstallState, InstallStatus, InstallStrategy, ProviderEmitters, ProviderError,
};
use kiosk_telemetry as telemetry;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adb::{adb_failure_message, format_adb_output, AdbDevice, AdbFailure};
use crate::parse::{
    classify_install_output, classify_launch_output, install_failure_reason,
    parse_package_update_times, parse_pm_list_packages,
};

const REMOTE_STAGING_DIR: &str = "/data/local/tmp";

pub(crate) async fn list_packages(device: &AdbDevice) -> Result<BTreeSet<String>, AdbFailure> {
    let output = device.shell(&["pm", "list", "packages"]).await?;
    Ok(parse_pm_list_packages(&output))
}

async fn package_update_times(device: &AdbDevice) -> Result<BTreeMap<String, String>, AdbFailure> {
    let output = device.shell(&["dumpsys", "package", "packages"]).await?;
    Ok(parse_package_update_times(&output))
}

/// Installed packages before an install, used to tell which package the
/// install created or replaced.
struct PackageSnapshot {
    packages: BTreeSet<String>,
    updated: BTreeMap<String, String>,
}

impl PackageSnapshot {
    async fn take(device: &AdbDevice) -> Option<Self> {
        let packages = list_packages(device).await.ok()?;
        let updated = package_update_times(device).await.unwrap_or_default();
        Some(Self { packages, updated })
    }
}

pub(crate) async fn launch(device: &AdbDevice, package_name: &str) -> Result<(), ProviderError> {
    let args = [
        "monkey",
        "-p",
        package_name,
        "-c",
        "android.intent.category.LAUNCHER",
        "1",
    ];
    match device.shell(&args).await {
        Ok(output) => classify_launch_output(package_name, &output),
        Err(err) if err.is_transport() => Err(err.into()),
        Err(err) => {
            classify_launch_output(package_name, &err.output())?;
            Err(ProviderError::LaunchException(adb_failure_message(&err)))
        }
    }
}

/// Drives one install attempt to a terminal status. Every outcome, including
/// transport failures, is reported on the install status channel.
pub(crate) async fn run_install_job(
    device: AdbDevice,
    emit: ProviderEmitters,
    request: InstallRequest,
    installer_package: Option<String>,
) {
    let strategy = request.strategy;
    info!(
        serial = device.serial(),
        file = %request.file_path,
        strategy = strategy.as_str(),
        "install job started"
    );
    emit.install_status(InstallStatus::new(InstallState::Installing).with_progress(0));

    let before = if strategy.launches() && request.package_name.is_none() {
        PackageSnapshot::take(&device).await
    } else {
        None
    };

    let result = match strategy {
        InstallStrategy::Standard => {
            emit.install_status(InstallStatus::new(InstallState::Installing).with_progress(50));
            device
                .output(&["install", "-r", request.file_path.as_str()])
                .await
                .map(|output| {
                    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                    format_adb_output(&stdout, &stderr)
                })
        }
        _ => install_staged(&device, &emit, &request, installer_package.as_deref()).await,
    };

    let state = match &result {
        Ok(output) => classify_install_output(output),
        Err(err) if err.is_transport() => InstallState::Error,
        Err(err) => classify_install_output(&err.output()),
    };
    if state != InstallState::Installed {
        let message = match &result {
            Ok(output) => {
                install_failure_reason(output).unwrap_or_else(|| output.trim().to_string())
            }
            Err(err) => install_failure_reason(&err.output())
                .unwrap_or_else(|| adb_failure_message(err)),
        };
        warn!(status = state.as_str(), %message, "install failed");
        telemetry::event("install.failed", &[("status", state.as_str())]);
        emit.install_status(InstallStatus::new(state).with_message(message));
        return;
    }

    let package_name = match request.package_name.clone() {
        Some(name) => Some(name),
        None => match before {
            Some(before) => discover_installed_package(&device, &before).await,
            None => None,
        },
    };
    let mut installed = InstallStatus::new(InstallState::Installed).with_progress(100);
    if let Some(name) = &package_name {
        installed = installed.with_package(name.clone());
    }
    info!(package = ?package_name, "package installed");

    if !strategy.launches() {
        emit.install_status(installed);
        return;
    }
    let Some(package_name) = package_name else {
        emit.install_status(
            InstallStatus::new(InstallState::LaunchFailed)
                .with_message("installed package name could not be determined"),
        );
        return;
    };

    emit.install_status(InstallStatus::new(InstallState::Launching).with_package(&package_name));
    match launch(&device, &package_name).await {
        Ok(()) => {
            info!(package = %package_name, "package launched");
            emit.install_status(
                InstallStatus::new(InstallState::Launched).with_package(package_name),
            );
        }
        Err(err) => {
            warn!(package = %package_name, error = %err, "launch after install failed");
            emit.install_status(
                InstallStatus::new(InstallState::LaunchFailed)
                    .with_package(package_name)
                    .with_message(err.to_string()),
            );
        }
    }
}

/// Pushes the archive to the device and installs it with the package
/// manager, so the install does not prompt.
async fn install_staged(
    device: &AdbDevice,
    emit: &ProviderEmitters,
    request: &InstallRequest,
    installer_package: Option<&str>,
) -> Result<String, AdbFailure> {
    let remote = format!("{REMOTE_STAGING_DIR}/kiosk-{}.apk", Uuid::new_v4());
    device
        .output(&["push", request.file_path.as_str(), remote.as_str()])
        .await?;
    emit.install_status(InstallStatus::new(InstallState::Installing).with_progress(50));

    let mut args = vec!["pm", "install", "-r"];
    match request.strategy {
        InstallStrategy::SystemSilent => args.extend(["--user", "0", "-g"]),
        _ => {
            if let Some(installer) = installer_package {
                args.extend(["-i", installer]);
            }
        }
    }
    args.push(remote.as_str());
    let result = device.shell(&args).await;

    if let Err(err) = device.shell(&["rm", "-f", remote.as_str()]).await {
        warn!("failed to remove staged package {remote}: {err}");
    }
    result
}

async fn discover_installed_package(
    device: &AdbDevice,
    before: &PackageSnapshot,
) -> Option<String> {
    let after = list_packages(device).await.ok()?;
    if let Some(added) = single(after.difference(&before.packages)) {
        return Some(added);
    }
    // An update adds nothing new; the replaced package has a fresh update time.
    let updated = package_update_times(device).await.ok()?;
    single(
        updated
            .iter()
            .filter(|(name, time)| before.updated.get(*name) != Some(*time))
            .map(|(name, _)| name),
    )
}

fn single<'a>(mut names: impl Iterator<Item = &'a String>) -> Option<String> {
    match (names.next(), names.next()) {
        (Some(only), None) => Some(only.clone()),
        _ => None,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;

    use tokio::sync::broadcast::error::TryRecvError;

    use crate::testing::stub_adb;

    const SUCCESS: &str = "echo Success";
    const INSTALLED_PACKAGES: &str =
        "printf 'package:com.android.settings\\npackage:com.example.kiosk\\n'";
    /// The kiosk package's update time moves once `pm install` has run.
    const DUMPSYS_PACKAGES: &str = "stamp='2026-10-01 08:00:00'; \
        [ -f \"$DIR/updated\" ] && stamp='2026-10-18 09:15:02'; \
        printf 'Packages:\\nPackage [com.android.settings] (1):\\n\
        lastUpdateTime=2008-12-31 16:00:00\\nPackage [com.example.kiosk] (2):\\n\
        lastUpdateTime=%s\\n' \"$stamp\"";

    fn request(dir: &Path, strategy: InstallStrategy, package: Option<&str>) -> InstallRequest {
        let file = dir.join("signage.apk");
        std::fs::write(&file, b"apk").unwrap();
        InstallRequest {
            file_path: file.display().to_string(),
            strategy,
            package_name: package.map(str::to_string),
        }
    }

    async fn run(device: AdbDevice, request: InstallRequest) -> Vec<InstallStatus> {
        let emit = ProviderEmitters::default();
        let mut channels = emit.subscribe();
        run_install_job(device, emit.clone(), request, Some("com.example.agent".into())).await;
        let mut statuses = Vec::new();
        loop {
            match channels.install_status.try_recv() {
                Ok(status) => statuses.push(status),
                Err(TryRecvError::Empty) => return statuses,
                Err(err) => panic!("install status channel: {err}"),
            }
        }
    }

    fn installing(progress: u8) -> InstallStatus {
        InstallStatus::new(InstallState::Installing).with_progress(progress)
    }

    #[tokio::test]
    async fn standard_install_walks_progress_to_installed() {
        let dir = tempfile::tempdir().unwrap();
        let device = stub_adb(dir.path(), &[("'install -r '*", SUCCESS)]);
        let statuses = run(device, request(dir.path(), InstallStrategy::Standard, None)).await;
        assert_eq!(
            statuses,
            vec![
                installing(0),
                installing(50),
                InstallStatus::new(InstallState::Installed).with_progress(100),
            ]
        );
    }

    #[tokio::test]
    async fn package_manager_failure_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let device = stub_adb(
            dir.path(),
            &[(
                "'install -r '*",
                "echo 'Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]'; exit 1",
            )],
        );
        let statuses = run(device, request(dir.path(), InstallStrategy::Standard, None)).await;
        assert_eq!(statuses.len(), 3);
        assert_eq!(
            statuses[2],
            InstallStatus::new(InstallState::StorageError)
                .with_message("Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]")
        );
    }

    #[tokio::test]
    async fn unreachable_adb_ends_in_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = AdbDevice::new(dir.path().join("missing-adb"), "kiosk-test");
        let statuses = run(device, request(dir.path(), InstallStrategy::Standard, None)).await;
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[..2], [installing(0), installing(50)]);
        assert_eq!(statuses[2].state, InstallState::Error);
        assert!(!statuses[2].is_installing());
    }

    #[tokio::test]
    async fn launch_variant_finds_an_updated_package() {
        let dir = tempfile::tempdir().unwrap();
        // Same package list before and after: the install replaced an app.
        let device = stub_adb(
            dir.path(),
            &[
                ("'shell pm list packages'", INSTALLED_PACKAGES),
                ("'shell dumpsys package packages'", DUMPSYS_PACKAGES),
                ("'push '*", "echo '1 file pushed'"),
                ("'shell pm install '*", "touch \"$DIR/updated\"; echo Success"),
                ("'shell rm '*", "true"),
                ("'shell monkey -p com.example.kiosk '*", "echo 'Events injected: 1'"),
            ],
        );
        let statuses = run(
            device,
            request(dir.path(), InstallStrategy::SilentAndLaunch, None),
        )
        .await;
        assert_eq!(
            statuses,
            vec![
                installing(0),
                installing(50),
                InstallStatus::new(InstallState::Launching).with_package("com.example.kiosk"),
                InstallStatus::new(InstallState::Launched).with_package("com.example.kiosk"),
            ]
        );
    }

    #[tokio::test]
    async fn launch_without_entry_point_fails_after_install() {
        let dir = tempfile::tempdir().unwrap();
        let device = stub_adb(
            dir.path(),
            &[
                ("'push '*", "echo '1 file pushed'"),
                ("'shell pm install '*", SUCCESS),
                ("'shell rm '*", "true"),
                (
                    "'shell monkey '*",
                    "echo '** No activities found to run, monkey aborted.'",
                ),
            ],
        );
        let statuses = run(
            device,
            request(
                dir.path(),
                InstallStrategy::SilentAndLaunch,
                Some("com.example.kiosk"),
            ),
        )
        .await;
        assert_eq!(statuses.len(), 4);
        assert_eq!(
            statuses[2],
            InstallStatus::new(InstallState::Launching).with_package("com.example.kiosk")
        );
        assert_eq!(statuses[3].state, InstallState::LaunchFailed);
        assert_eq!(statuses[3].package_name.as_deref(), Some("com.example.kiosk"));
    }
}
