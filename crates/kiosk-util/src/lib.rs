use std::{
    fs,
    future::Future,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use kiosk_telemetry as telemetry;
use serde::{de::DeserializeOwned, Serialize};
use tonic::transport::{server::Router, Server};
use tracing::{info, warn};

pub const DEFAULT_AGENT_ADDR: &str = "127.0.0.1:50061";

pub fn env_addr(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn agent_addr() -> String {
    env_addr("KIOSK_AGENT_ADDR", DEFAULT_AGENT_ADDR)
}

pub fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

pub fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("KIOSK_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local/share/kiosk-agent")
    } else {
        PathBuf::from("/tmp/kiosk-agent")
    }
}

pub fn state_dir() -> PathBuf {
    data_dir().join("state")
}

pub fn state_file_path(file_name: &str) -> PathBuf {
    state_dir().join(file_name)
}

pub fn downloads_dir() -> PathBuf {
    data_dir().join("downloads")
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a JSON state file, falling back to `T::default()` when the file is
/// missing or unreadable. Parse and read errors are logged, never returned.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str::<T>(&data) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("Failed to parse {}: {}", path.display(), err);
                T::default()
            }
        },
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), err);
            }
            T::default()
        }
    }
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();
    Ok(())
}

pub fn init_service_telemetry(app_name: &'static str, app_version: &'static str, service_name: &str) {
    telemetry::init_with_env(app_name, app_version);
    telemetry::event("service.start", &[("service", service_name)]);
}

pub async fn serve_grpc<F, S>(
    app_name: &str,
    addr_env: &str,
    default_addr: &str,
    add_service: F,
    shutdown: S,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(&mut Server) -> Router,
    S: Future<Output = ()>,
{
    let addr_str = env_addr(addr_env, default_addr);
    let addr: SocketAddr = addr_str.parse()?;
    info!("{app_name} listening on {addr}");

    let mut server = Server::builder();
    add_service(&mut server)
        .serve_with_shutdown(addr, shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
    #[serde(default)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn json_state_round_trips_through_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sample.json");
        let value = Sample {
            name: "lobby".into(),
            count: 3,
        };
        write_json_atomic(&path, &value).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        let loaded: Sample = read_json_or_default(&path);
        assert_eq!(loaded, value);
    }

    #[test]
    fn missing_or_corrupt_state_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let missing: Sample = read_json_or_default(&dir.path().join("absent.json"));
        assert_eq!(missing, Sample::default());

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, b"{not json").unwrap();
        let loaded: Sample = read_json_or_default(&corrupt);
        assert_eq!(loaded, Sample::default());
    }
}
