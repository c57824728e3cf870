use std::{
    io,
    path::{Path, PathBuf},
    process::Output,
    time::Duration,
};

use kiosk_core::ProviderError;
use thiserror::Error;
use tokio::process::Command;

use crate::ids::canonicalize_adb_serial;

#[derive(Debug, Error)]
pub enum AdbFailure {
    #[error("adb not found (set KIOSK_ADB_PATH or ANDROID_SDK_ROOT)")]
    NotFound,
    #[error("adb failed: {0}")]
    Io(String),
    #[error("{}", format_adb_failure_message(.status, .stdout, .stderr))]
    Exit {
        status: i32,
        stdout: String,
        stderr: String,
    },
    #[error("adb timed out after {0:?}")]
    Timeout(Duration),
}

impl AdbFailure {
    /// Output of a failed command, stdout first.
    pub fn output(&self) -> String {
        match self {
            AdbFailure::Exit { stdout, stderr, .. } => format!("{stdout}\n{stderr}"),
            _ => String::new(),
        }
    }

    /// Transport-level problems mean the device cannot be reached at all.
    pub fn is_transport(&self) -> bool {
        match self {
            AdbFailure::NotFound | AdbFailure::Io(_) | AdbFailure::Timeout(_) => true,
            AdbFailure::Exit { stderr, .. } => {
                let stderr = stderr.to_ascii_lowercase();
                stderr.contains("device offline")
                    || stderr.contains("no devices")
                    || stderr.contains("device unauthorized")
                    || (stderr.contains("device '") && stderr.contains("not found"))
            }
        }
    }
}

impl From<AdbFailure> for ProviderError {
    fn from(err: AdbFailure) -> Self {
        if err.is_transport() {
            ProviderError::Unavailable(adb_failure_message(&err))
        } else {
            ProviderError::rejected("adb", adb_failure_message(&err))
        }
    }
}

pub fn adb_path() -> PathBuf {
    for key in ["KIOSK_ADB_PATH", "ADB_PATH"] {
        if let Ok(path) = std::env::var(key) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }
    }
    if let Ok(sdk_root) =
        std::env::var("ANDROID_SDK_ROOT").or_else(|_| std::env::var("ANDROID_HOME"))
    {
        for name in ["adb", "adb.exe"] {
            let candidate = PathBuf::from(&sdk_root).join("platform-tools").join(name);
            if candidate.exists() {
                return candidate;
            }
        }
    }
    PathBuf::from("adb")
}

pub fn format_adb_output(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim();
    let stderr = stderr.trim();
    let mut out = String::new();

    if !stdout.is_empty() {
        out.push_str("stdout:\n");
        out.push_str(stdout);
        out.push('\n');
    }
    if !stderr.is_empty() {
        out.push_str("stderr:\n");
        out.push_str(stderr);
        out.push('\n');
    }

    out
}

fn format_adb_failure_message(status: &i32, stdout: &str, stderr: &str) -> String {
    let detail = format_adb_output(stdout, stderr);
    if detail.trim().is_empty() {
        format!("adb command failed with exit {status}")
    } else {
        format!("adb command failed with exit {status}: {}", detail.trim())
    }
}

pub fn adb_failure_message(err: &AdbFailure) -> String {
    err.to_string()
}

/// One adb-reachable device. Every command is scoped to its serial.
#[derive(Clone, Debug)]
pub struct AdbDevice {
    program: PathBuf,
    serial: String,
    timeout: Duration,
}

impl AdbDevice {
    pub fn new(program: PathBuf, serial: &str) -> Self {
        Self {
            program,
            serial: canonicalize_adb_serial(serial),
            timeout: Duration::from_secs(180),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn output(&self, args: &[&str]) -> Result<Output, AdbFailure> {
        let mut full = Vec::with_capacity(args.len() + 2);
        full.push("-s");
        full.push(self.serial.as_str());
        full.extend_from_slice(args);
        adb_output_with(&self.program, &full, self.timeout).await
    }

    /// Runs `adb shell` and returns trimmed stdout.
    pub async fn shell(&self, args: &[&str]) -> Result<String, AdbFailure> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("shell");
        full.extend_from_slice(args);
        let output = self.output(&full).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

pub async fn adb_output(args: &[&str]) -> Result<Output, AdbFailure> {
    adb_output_with(&adb_path(), args, Duration::from_secs(30)).await
}

async fn adb_output_with(
    program: &Path,
    args: &[&str],
    timeout: Duration,
) -> Result<Output, AdbFailure> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                AdbFailure::NotFound
            } else {
                AdbFailure::Io(e.to_string())
            }
        })?,
        Err(_) => return Err(AdbFailure::Timeout(timeout)),
    };

    if output.status.success() {
        Ok(output)
    } else {
        Err(AdbFailure::Exit {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdbDeviceEntry {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
}

pub fn parse_adb_devices(output: &str, include_offline: bool) -> Vec<AdbDeviceEntry> {
    let mut devices = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("List of devices attached") || line.starts_with('*')
        {
            continue;
        }

        let mut parts = line.split_whitespace();
        let (Some(serial), Some(state)) = (parts.next(), parts.next()) else {
            continue;
        };
        if !include_offline && state != "device" {
            continue;
        }
        let model = parts
            .filter_map(|part| part.split_once(':'))
            .find(|(key, _)| *key == "model")
            .map(|(_, value)| value.to_string());

        devices.push(AdbDeviceEntry {
            serial: serial.to_string(),
            state: state.to_string(),
            model,
        });
    }

    devices
}

pub async fn adb_list_devices(include_offline: bool) -> Result<Vec<AdbDeviceEntry>, AdbFailure> {
    let output = adb_output(&["devices", "-l"]).await?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_adb_devices(&stdout, include_offline))
}

/// First online device, or the preferred serial when it is online.
pub async fn adb_find_device_serial(preferred: Option<&str>) -> Option<String> {
    let devices = adb_list_devices(false).await.ok()?;
    if let Some(preferred) = preferred {
        let preferred = canonicalize_adb_serial(preferred);
        return devices
            .into_iter()
            .find(|device| canonicalize_adb_serial(&device.serial) == preferred)
            .map(|device| device.serial);
    }
    devices.into_iter().next().map(|device| device.serial)
}

pub async fn wait_for_adb_device(
    preferred: Option<&str>,
    max_attempts: usize,
    delay: Duration,
) -> Option<String> {
    for _ in 0..max_attempts {
        if let Some(serial) = adb_find_device_serial(preferred).await {
            return Some(serial);
        }
        tokio::time::sleep(delay).await;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_listing() {
        let output = "List of devices attached\n\
            * daemon started successfully\n\
            R58N12ABCDE    device usb:1-1 product:beyond1 model:SM_G973F transport_id:3\n\
            emulator-5554  offline\n\
            192.168.1.20:5555 unauthorized\n";
        let online = parse_adb_devices(output, false);
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].serial, "R58N12ABCDE");
        assert_eq!(online[0].model.as_deref(), Some("SM_G973F"));

        let all = parse_adb_devices(output, true);
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].state, "unauthorized");
    }

    #[test]
    fn failure_messages_include_output() {
        let err = AdbFailure::Exit {
            status: 1,
            stdout: "".into(),
            stderr: "error: closed\n".into(),
        };
        assert_eq!(
            adb_failure_message(&err),
            "adb command failed with exit 1: stderr:\nerror: closed"
        );
        assert!(adb_failure_message(&AdbFailure::NotFound).contains("KIOSK_ADB_PATH"));
    }

    #[test]
    fn offline_device_maps_to_unavailable() {
        let offline = AdbFailure::Exit {
            status: 1,
            stdout: String::new(),
            stderr: "error: device offline".into(),
        };
        assert!(matches!(
            ProviderError::from(offline),
            ProviderError::Unavailable(_)
        ));
        let rejected = AdbFailure::Exit {
            status: 255,
            stdout: String::new(),
            stderr: "java.lang.SecurityException: denied".into(),
        };
        assert!(matches!(
            ProviderError::from(rejected),
            ProviderError::Rejected { .. }
        ));
    }
}
