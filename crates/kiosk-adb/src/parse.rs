//! Parsers for the text that device-side shell tools print.

use std::collections::{BTreeMap, BTreeSet};

use kiosk_core::{InstallState, ProviderError};

/// `settings get` prints `null` for an unset key.
pub fn parse_settings_int(output: &str) -> Option<i32> {
    let value = output.trim();
    if value.is_empty() || value == "null" {
        return None;
    }
    value
        .parse::<i32>()
        .ok()
        .or_else(|| value.parse::<f32>().ok().map(|v| v.round() as i32))
}

/// Colon-separated package list as stored in secure settings.
pub fn parse_colon_list(output: &str) -> Vec<String> {
    let value = output.trim();
    if value == "null" {
        return Vec::new();
    }
    value
        .split(':')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeReading {
    pub current: i32,
    pub min: i32,
    pub max: i32,
}

impl VolumeReading {
    /// Position of `current` within `min..=max`, in `0.0..=1.0`.
    pub fn level(&self) -> f32 {
        let span = self.max - self.min;
        if span <= 0 {
            return 0.0;
        }
        ((self.current - self.min) as f32 / span as f32).clamp(0.0, 1.0)
    }

    /// Index to write for a normalized level.
    pub fn index_for(&self, level: f32) -> i32 {
        let span = (self.max - self.min).max(0);
        self.min + (level.clamp(0.0, 1.0) * span as f32).round() as i32
    }
}

/// Reads `volume is 7 in range [0..15]` from `cmd media_session volume --get`.
pub fn parse_volume(output: &str) -> Option<VolumeReading> {
    let line = output.lines().find(|line| line.contains("volume is"))?;
    let rest = line.split("volume is").nth(1)?.trim();
    let (current, rest) = rest.split_once(' ')?;
    let range = rest.split('[').nth(1)?.split(']').next()?;
    let (min, max) = range.split_once("..")?;
    Some(VolumeReading {
        current: current.trim().parse().ok()?,
        min: min.trim().parse().ok()?,
        max: max.trim().parse().ok()?,
    })
}

/// Device-owner admin component from `dpm list-owners`, if any.
pub fn parse_device_owner(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let admin = line.split("admin=").nth(1)?;
        let mut fields = admin.split(',');
        let component = fields.next()?.trim();
        fields
            .any(|flag| flag.trim() == "DeviceOwner")
            .then(|| component.to_string())
    })
}

/// First task id from `am stack list`.
pub fn parse_task_id(output: &str) -> Option<i32> {
    output.lines().find_map(|line| {
        let rest = line.split("taskId=").nth(1)?;
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    })
}

pub fn parse_pm_list_packages(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .map(|name| name.split('=').next_back().unwrap_or(name).trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Reads `lastUpdateTime=` per `Package [name]` block of
/// `dumpsys package packages`. The first block for a name wins; later ones
/// describe hidden system copies.
pub fn parse_package_update_times(output: &str) -> BTreeMap<String, String> {
    let mut times = BTreeMap::new();
    let mut current: Option<&str> = None;
    for line in output.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Package [") {
            current = rest.split(']').next().filter(|name| !name.is_empty());
        } else if let (Some(name), Some(time)) = (current, line.strip_prefix("lastUpdateTime=")) {
            times
                .entry(name.to_string())
                .or_insert_with(|| time.trim().to_string());
        }
    }
    times
}

/// `appops get <pkg> <OP>` prints `OP: allow; time=...` when granted.
pub fn parse_appops_allowed(output: &str, op: &str) -> bool {
    output.lines().any(|line| {
        line.trim()
            .strip_prefix(op)
            .and_then(|rest| rest.trim_start().strip_prefix(':'))
            .map(|mode| mode.trim_start().starts_with("allow"))
            .unwrap_or(false)
    })
}

/// Maps package-manager output to an install outcome. `Success` anywhere in
/// the output wins; otherwise the first recognized failure code decides.
pub fn classify_install_output(output: &str) -> InstallState {
    if output.lines().any(|line| line.trim() == "Success") {
        return InstallState::Installed;
    }
    let upper = output.to_ascii_uppercase();
    const RULES: &[(&[&str], InstallState)] = &[
        (&["INSUFFICIENT_STORAGE", "MEDIA_UNAVAILABLE"], InstallState::StorageError),
        (
            &[
                "ALREADY_EXISTS",
                "CONFLICTING_PROVIDER",
                "DUPLICATE_PERMISSION",
                "UPDATE_INCOMPATIBLE",
                "SHARED_USER_INCOMPATIBLE",
                "VERSION_DOWNGRADE",
            ],
            InstallState::Conflict,
        ),
        (
            &[
                "OLDER_SDK",
                "NEWER_SDK",
                "NO_MATCHING_ABIS",
                "CPU_ABI_INCOMPATIBLE",
                "MISSING_FEATURE",
                "MISSING_SHARED_LIBRARY",
            ],
            InstallState::Incompatible,
        ),
        (
            &[
                "INVALID_APK",
                "INVALID_URI",
                "PARSE_FAILED",
                "NO_CERTIFICATES",
                "INCONSISTENT_CERTIFICATES",
                "BAD_DEX_METADATA",
            ],
            InstallState::Invalid,
        ),
        (&["ABORTED", "CANCELLED", "CANCELED"], InstallState::Cancelled),
        (
            &[
                "USER_RESTRICTED",
                "VERIFICATION_FAILURE",
                "VERIFICATION_TIMEOUT",
                "TEST_ONLY",
                "INSTALL_BLOCKED",
            ],
            InstallState::Blocked,
        ),
        (&["TIMEOUT", "TIMED OUT"], InstallState::Timeout),
    ];
    RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| upper.contains(needle)))
        .map(|(_, state)| *state)
        .unwrap_or(InstallState::Failed)
}

/// First `Failure [...]` line, used as the status message.
pub fn install_failure_reason(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("Failure") || line.contains("INSTALL_"))
        .map(str::to_string)
}

/// Interprets `monkey -p <pkg> -c LAUNCHER 1` output.
pub fn classify_launch_output(package_name: &str, output: &str) -> Result<(), ProviderError> {
    if output.contains("No activities found to run") {
        return Err(ProviderError::NoLaunchTarget(package_name.to_string()));
    }
    if let Some(line) = output
        .lines()
        .map(str::trim)
        .find(|line| line.contains("Exception") || line.contains("monkey aborted"))
    {
        return Err(ProviderError::LaunchException(line.to_string()));
    }
    Ok(())
}
