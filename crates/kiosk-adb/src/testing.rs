//! Scripted `adb` stand-in for the unit tests.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use crate::adb::AdbDevice;

/// Writes an `adb` script that answers by matching its arguments (serial
/// flags stripped) against shell `case` patterns. `$DIR` expands to `dir`
/// inside arm bodies. Anything unmatched exits 1.
pub(crate) fn stub_adb(dir: &Path, arms: &[(&str, &str)]) -> AdbDevice {
    let mut script = format!("#!/bin/sh\nDIR='{}'\nshift 2\ncase \"$*\" in\n", dir.display());
    for (pattern, body) in arms {
        script.push_str(&format!("  {pattern}) {body} ;;\n"));
    }
    script.push_str("  *) echo \"unexpected: $*\" >&2; exit 1 ;;\nesac\n");
    let path = dir.join("adb");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    AdbDevice::new(path, "kiosk-test").with_timeout(Duration::from_secs(10))
}
