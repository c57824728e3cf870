use std::{io, path::Path, time::Duration};

use kiosk_adb::AdbProviderConfig;
use kiosk_core::AgentOptions;
use serde::{Deserialize, Serialize};

pub(crate) const CONFIG_FILE_NAME: &str = "agent-config.json";

/// Daemon settings from `agent-config.json`. Environment variables override
/// file values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AgentConfig {
    pub(crate) serial: Option<String>,
    pub(crate) agent_package: Option<String>,
    pub(crate) admin_component: Option<String>,
    pub(crate) poll_millis: u64,
    pub(crate) auto_request_remediation: bool,
    /// How many times to look for an adb device before settling for the
    /// null provider.
    pub(crate) device_wait_attempts: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            serial: None,
            agent_package: None,
            admin_component: None,
            poll_millis: 2000,
            auto_request_remediation: false,
            device_wait_attempts: 3,
        }
    }
}

impl AgentConfig {
    pub(crate) fn load(path: &Path) -> Self {
        let mut config: AgentConfig = kiosk_util::read_json_or_default(path);
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    pub(crate) fn save(&self, path: &Path) -> io::Result<()> {
        kiosk_util::write_json_atomic(path, self)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(serial) = text("KIOSK_ADB_SERIAL") {
            self.serial = Some(serial);
        }
        if let Some(package) = text("KIOSK_AGENT_PACKAGE") {
            self.agent_package = Some(package);
        }
        if let Some(component) = text("KIOSK_ADMIN_COMPONENT") {
            self.admin_component = Some(component);
        }
        if let Some(millis) = text("KIOSK_POLL_MILLIS").and_then(|v| v.parse().ok()) {
            self.poll_millis = millis;
        }
        if let Some(flag) = text("KIOSK_AUTO_REMEDIATION") {
            self.auto_request_remediation =
                matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
    }

    pub(crate) fn agent_options(&self) -> AgentOptions {
        AgentOptions {
            auto_request_remediation: self.auto_request_remediation,
        }
    }

    pub(crate) fn provider_config(&self) -> AdbProviderConfig {
        AdbProviderConfig {
            serial: self.serial.clone(),
            agent_package: self.agent_package.clone(),
            admin_component: self.admin_component.clone(),
            poll_interval: Duration::from_millis(self.poll_millis.max(250)),
            ..AdbProviderConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_file_values() {
        let mut config = AgentConfig {
            serial: Some("from-file".into()),
            poll_millis: 5000,
            ..AgentConfig::default()
        };
        let env: HashMap<&str, &str> = [
            ("KIOSK_ADB_SERIAL", "emulator-5554"),
            ("KIOSK_POLL_MILLIS", "750"),
            ("KIOSK_AUTO_REMEDIATION", "yes"),
            ("KIOSK_AGENT_PACKAGE", "  "),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(config.poll_millis, 750);
        assert!(config.auto_request_remediation);
        assert_eq!(config.agent_package, None);
        assert!(config.agent_options().auto_request_remediation);
    }

    #[test]
    fn config_file_round_trips_and_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"agent_package":"com.example.kiosk"}"#).unwrap();
        let loaded: AgentConfig = kiosk_util::read_json_or_default(&path);
        assert_eq!(loaded.agent_package.as_deref(), Some("com.example.kiosk"));
        assert_eq!(loaded.poll_millis, 2000);

        loaded.save(&path).unwrap();
        let reloaded: AgentConfig = kiosk_util::read_json_or_default(&path);
        assert_eq!(reloaded, loaded);
    }

    #[test]
    fn poll_interval_has_a_floor() {
        let config = AgentConfig {
            poll_millis: 10,
            ..AgentConfig::default()
        };
        assert_eq!(
            config.provider_config().poll_interval,
            Duration::from_millis(250)
        );
    }
}
