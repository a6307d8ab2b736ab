//! Sleep and wake notifications.
//!
//! systemd-logind's `PrepareForSleep` signal is preferred. Without it, a
//! wake is inferred when `CLOCK_BOOTTIME` (which counts suspend) pulls away
//! from `CLOCK_MONOTONIC` (which does not).

use std::time::Duration;

use crate::emit_or_return;
use crate::events::{ControlEvent, EventSender};

/// Boottime/monotonic divergence that counts as a suspend.
pub const SUSPEND_GAP: Duration = Duration::from_secs(2);
const CLOCK_POLL: Duration = Duration::from_secs(1);

/// Start whichever sleep source is available. Must run inside a tokio runtime.
pub fn spawn_power_monitor(events: EventSender) {
    if spawn_logind(&events) {
        return;
    }
    log::info!("Detecting wake-ups from clock divergence");
    tokio::spawn(watch_clock_gap(events));
}

#[cfg(feature = "logind")]
fn spawn_logind(events: &EventSender) -> bool {
    let conn = match zbus::blocking::Connection::system() {
        Ok(conn) => conn,
        Err(e) => {
            log::warn!("Cannot reach the system bus: {}", e);
            return false;
        }
    };

    let events = events.clone();
    let spawned = std::thread::Builder::new()
        .name("backdrop-logind".to_string())
        .spawn(move || {
            if let Err(e) = logind::watch(&conn, &events) {
                log::warn!("logind sleep watcher stopped: {:#}", e);
            }
        });

    match spawned {
        Ok(_) => {
            log::info!("Watching logind for sleep notifications");
            true
        }
        Err(e) => {
            log::warn!("Failed to spawn logind watcher: {}", e);
            false
        }
    }
}

#[cfg(not(feature = "logind"))]
fn spawn_logind(_events: &EventSender) -> bool {
    false
}

#[cfg(feature = "logind")]
mod logind {
    use anyhow::Result;

    use crate::events::{ControlEvent, EventSender};

    pub fn watch(conn: &zbus::blocking::Connection, events: &EventSender) -> Result<()> {
        let proxy = zbus::blocking::Proxy::new(
            conn,
            "org.freedesktop.login1",
            "/org/freedesktop/login1",
            "org.freedesktop.login1.Manager",
        )?;

        for message in proxy.receive_signal("PrepareForSleep")? {
            let going_down: bool = match message.body().deserialize() {
                Ok(flag) => flag,
                Err(e) => {
                    log::debug!("Malformed PrepareForSleep signal: {}", e);
                    continue;
                }
            };

            let event = if going_down {
                ControlEvent::WillSleep
            } else {
                ControlEvent::DidWake
            };
            if events.send(event).is_err() {
                break;
            }
        }
        Ok(())
    }
}

fn clock_now(clock: libc::clockid_t) -> Option<Duration> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec.
    if unsafe { libc::clock_gettime(clock, &mut ts) } != 0 {
        return None;
    }
    Some(Duration::new(
        u64::try_from(ts.tv_sec).ok()?,
        u32::try_from(ts.tv_nsec).ok()?,
    ))
}

/// Tracks how far `CLOCK_BOOTTIME` has run ahead of `CLOCK_MONOTONIC`.
#[derive(Debug, Clone, Copy)]
pub struct ClockGapDetector {
    offset: Duration,
}

impl ClockGapDetector {
    pub fn new(boottime: Duration, monotonic: Duration) -> Self {
        Self {
            offset: boottime.saturating_sub(monotonic),
        }
    }

    /// Feed a fresh reading; true when a suspend happened since the last one.
    pub fn observe(&mut self, boottime: Duration, monotonic: Duration) -> bool {
        let offset = boottime.saturating_sub(monotonic);
        let grew = offset.saturating_sub(self.offset);
        self.offset = offset;
        grew > SUSPEND_GAP
    }
}

fn read_clocks() -> Option<(Duration, Duration)> {
    Some((
        clock_now(libc::CLOCK_BOOTTIME)?,
        clock_now(libc::CLOCK_MONOTONIC)?,
    ))
}

async fn watch_clock_gap(events: EventSender) {
    let Some((boottime, monotonic)) = read_clocks() else {
        log::warn!("CLOCK_BOOTTIME unavailable, wake detection disabled");
        return;
    };
    let mut detector = ClockGapDetector::new(boottime, monotonic);

    let mut ticker = tokio::time::interval(CLOCK_POLL);
    loop {
        ticker.tick().await;
        let Some((boottime, monotonic)) = read_clocks() else {
            continue;
        };
        if detector.observe(boottime, monotonic) {
            emit_or_return!(events, ControlEvent::DidWake);
        }
    }
}
