//! Host-side power timer.
//!
//! Fires `reboot -p` at the stored shutdown time. Boot schedules are only
//! stored: a powered-off device cannot be woken from here. The same loop
//! notices reboots by boot id and relaunches the kiosk app when boot
//! auto-start is enabled.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone};
use kiosk_core::{ScheduleKind, ScheduledPowerSettings};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::install::launch;
use crate::provider::Shared;

const HEARTBEAT: Duration = Duration::from_secs(60);

/// Next wall-clock instant matching `settings`, strictly after `now`.
pub(crate) fn next_fire<Tz: TimeZone>(
    now: &DateTime<Tz>,
    settings: ScheduledPowerSettings,
) -> Option<DateTime<Tz>> {
    let time = NaiveTime::from_hms_opt(u32::from(settings.hour), u32::from(settings.minute), 0)?;
    let tz = now.timezone();
    let today = now.date_naive();
    for offset in 0..=2 {
        let date = today + ChronoDuration::days(offset);
        // Skipped local times (DST gaps) have no mapping; try the next day.
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() {
            if candidate > *now {
                return Some(candidate);
            }
        }
    }
    None
}

pub(crate) async fn run_scheduler(shared: Arc<Shared>, cancel: CancellationToken) {
    info!(serial = shared.device.serial(), "power scheduler started");
    loop {
        let schedule = shared.read_state(|state| state.schedule(ScheduleKind::Shutdown));
        let now = Local::now();
        let due_in = schedule
            .and_then(|settings| next_fire(&now, settings))
            .and_then(|at| (at - now).to_std().ok());
        let wait = due_in.map_or(HEARTBEAT, |due| due.min(HEARTBEAT));

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("power scheduler stopped");
                return;
            }
            _ = shared.reschedule.notified() => continue,
            _ = tokio::time::sleep(wait) => {}
        }

        if matches!(due_in, Some(due) if due <= wait) {
            if let Some(settings) = schedule {
                fire_shutdown(&shared, settings).await;
            }
        } else {
            check_boot(&shared).await;
        }
    }
}

async fn fire_shutdown(shared: &Shared, settings: ScheduledPowerSettings) {
    info!(
        hour = settings.hour,
        minute = settings.minute,
        repeat = settings.repeat,
        "scheduled shutdown firing"
    );
    if !settings.repeat {
        shared.update_state(|state| *state.schedule_mut(ScheduleKind::Shutdown) = None);
    }
    if let Err(err) = shared.device.shell(&["reboot", "-p"]).await {
        warn!("scheduled shutdown failed: {err}");
    }
}

async fn check_boot(shared: &Shared) {
    let Ok(boot_id) = shared
        .device
        .shell(&["cat", "/proc/sys/kernel/random/boot_id"])
        .await
    else {
        return;
    };
    if boot_id.is_empty() {
        return;
    }
    let (previous, autostart, target) = shared.read_state(|state| {
        (
            state.last_boot_id.clone(),
            state.boot_autostart,
            state.lock_task_packages.first().cloned(),
        )
    });
    if previous.as_deref() == Some(boot_id.as_str()) {
        return;
    }
    shared.update_state(|state| state.last_boot_id = Some(boot_id.clone()));
    let Some(previous) = previous else {
        return;
    };
    info!(%previous, current = %boot_id, "device rebooted");
    if !autostart {
        return;
    }
    let Some(package) = target.or_else(|| shared.config.agent_package.clone()) else {
        warn!("boot auto-start enabled but no package to launch");
        return;
    };
    if let Err(err) = launch(&shared.device, &package).await {
        warn!(package = %package, "boot auto-start launch failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(hour: u8, minute: u8) -> ScheduledPowerSettings {
        ScheduledPowerSettings {
            hour,
            minute,
            repeat: true,
        }
    }

    #[test]
    fn later_today_fires_today() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap();
        let next = next_fire(&now, at(22, 0)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 14, 22, 0, 0).unwrap());
    }

    #[test]
    fn earlier_or_equal_time_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2026, 12, 31, 22, 0, 0).unwrap();
        assert_eq!(
            next_fire(&now, at(22, 0)).unwrap(),
            Utc.with_ymd_and_hms(2027, 1, 1, 22, 0, 0).unwrap()
        );
        assert_eq!(
            next_fire(&now, at(6, 15)).unwrap(),
            Utc.with_ymd_and_hms(2027, 1, 1, 6, 15, 0).unwrap()
        );
    }

    #[test]
    fn invalid_time_never_fires() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(next_fire(&now, at(24, 0)), None);
    }
}
