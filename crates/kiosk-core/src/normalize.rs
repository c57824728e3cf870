//! Domain clamps applied to every brightness and volume value, outbound to
//! the provider and inbound from its push channels alike.

use crate::types::{AppBrightness, VolumeChange};

pub const MAX_SYSTEM_BRIGHTNESS: u8 = 255;

pub fn clamp_brightness(value: i64) -> u8 {
    value.clamp(0, i64::from(MAX_SYSTEM_BRIGHTNESS)) as u8
}

/// Clamps to `0.0..=1.0`. NaN has no meaningful position in the range and
/// maps to silence/darkness.
pub fn clamp_level(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Interprets a raw app-brightness reading; any negative value is the
/// "defer to system" sentinel.
pub fn app_brightness_from_raw(raw: f32) -> AppBrightness {
    if raw < 0.0 {
        AppBrightness::System
    } else {
        AppBrightness::Level(clamp_level(raw))
    }
}

pub fn normalize_volume_change(change: VolumeChange) -> VolumeChange {
    let max = change.max.max(0);
    VolumeChange {
        stream: change.stream,
        current: change.current.clamp(0, max),
        max,
        level: clamp_level(change.level),
    }
}
