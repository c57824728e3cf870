//! Capability provider backed by `adb`.
//!
//! Installs, audio and brightness, device ownership and lock-task mode are
//! driven through shell commands on one bound device. State the device has no
//! home for (power schedules, pre-mute volumes, boot auto-start) is kept in a
//! JSON file on the host, keyed by serial.

pub mod adb;
pub mod ids;
pub mod parse;

mod download;
mod install;
mod observer;
mod provider;
mod scheduler;
mod state;
#[cfg(all(test, unix))]
mod testing;

pub use adb::{
    adb_find_device_serial, adb_list_devices, adb_path, wait_for_adb_device, AdbDevice,
    AdbDeviceEntry, AdbFailure,
};
pub use provider::{AdbProvider, AdbProviderConfig};
