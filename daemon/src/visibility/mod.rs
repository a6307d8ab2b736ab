//! Pausing playback while the desktop is covered.
//!
//! The [`Orchestrator`] re-evaluates visibility from scratch on every input
//! and drives the lifecycle manager's pause state. Sleep and wake arrive
//! through the same path; see [`crate::power`] for their sources.

pub mod hyprland;

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::display::{Display, Rect};
use crate::lifecycle::LifecycleManager;
use crate::surface::SurfaceBackend;

/// What the compositor reports about the desktop at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesktopSnapshot {
    /// The desktop itself has focus (no application window is active).
    pub desktop_focused: bool,
    /// Frames of on-screen windows above the desktop level.
    pub windows: Vec<Rect>,
}

/// Source of [`DesktopSnapshot`]s.
pub trait DesktopProbe: Send {
    fn snapshot(&mut self) -> Result<DesktopSnapshot>;

    fn name(&self) -> &'static str;
}

/// Probe for compositors we cannot query. Always reports a visible desktop.
pub struct NullProbe;

impl DesktopProbe for NullProbe {
    fn snapshot(&mut self) -> Result<DesktopSnapshot> {
        Ok(DesktopSnapshot {
            desktop_focused: true,
            windows: Vec::new(),
        })
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Displays that some single window covers by more than `threshold`.
pub fn hidden_displays<'a>(
    snapshot: &DesktopSnapshot,
    displays: &'a [Display],
    threshold: f64,
) -> Vec<&'a Display> {
    displays
        .iter()
        .filter(|display| {
            snapshot
                .windows
                .iter()
                .any(|window| display.geometry.coverage_by(window) > threshold)
        })
        .collect()
}

/// The desktop counts as visible unless a window hides some display.
pub fn desktop_visible(snapshot: &DesktopSnapshot, displays: &[Display], threshold: f64) -> bool {
    snapshot.desktop_focused || hidden_displays(snapshot, displays, threshold).is_empty()
}

/// Turns visibility, user and power inputs into pause/resume transitions.
pub struct Orchestrator {
    probe: Box<dyn DesktopProbe>,
    threshold: f64,
    settle: Duration,
    user_hold: bool,
    sleeping: bool,
    wake_deadline: Option<Instant>,
}

impl Orchestrator {
    pub fn new(probe: Box<dyn DesktopProbe>, threshold: f64, settle: Duration) -> Self {
        log::info!("Visibility probe: {}", probe.name());
        Self {
            probe,
            threshold,
            settle,
            user_hold: false,
            sleeping: false,
            wake_deadline: None,
        }
    }

    /// Re-evaluate visibility and pause or resume accordingly.
    pub fn evaluate<B: SurfaceBackend>(&mut self, manager: &mut LifecycleManager<B>) {
        if self.sleeping || self.wake_deadline.is_some() {
            return;
        }

        let state = manager.state();
        if state.always_on {
            if state.paused && !self.user_hold {
                manager.resume_all();
            }
            return;
        }
        if self.user_hold {
            return;
        }

        let snapshot = match self.probe.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::debug!("Visibility probe failed: {:#}", e);
                return;
            }
        };

        let displays = manager.connected_displays();
        let visible = desktop_visible(&snapshot, &displays, self.threshold);
        if visible && state.paused {
            log::debug!("Desktop visible again");
            manager.resume_all();
        } else if !visible && !state.paused {
            log::debug!("Desktop covered");
            manager.pause_all();
        }
    }

    /// A user `pause`: stop playback and keep it stopped until [`Self::release`].
    pub fn hold<B: SurfaceBackend>(&mut self, manager: &mut LifecycleManager<B>) {
        self.user_hold = true;
        manager.pause_all();
    }

    /// A user `resume`: drop the hold, play, and let visibility decide again
    /// right away.
    pub fn release<B: SurfaceBackend>(&mut self, manager: &mut LifecycleManager<B>) {
        self.user_hold = false;
        manager.resume_all();
        self.evaluate(manager);
    }

    pub fn will_sleep<B: SurfaceBackend>(&mut self, manager: &mut LifecycleManager<B>) {
        log::info!("System going to sleep");
        self.sleeping = true;
        self.wake_deadline = None;
        manager.pause_all();
    }

    /// Schedule the post-wake recovery `settle` after `now`.
    pub fn did_wake(&mut self, now: Instant) {
        log::info!(
            "System woke up, recovering in {}ms",
            self.settle.as_millis()
        );
        self.sleeping = false;
        self.wake_deadline = Some(now + self.settle);
    }

    /// Run the wake recovery once its deadline passed.
    pub fn poll_wake<B: SurfaceBackend>(
        &mut self,
        now: Instant,
        manager: &mut LifecycleManager<B>,
    ) {
        match self.wake_deadline {
            Some(deadline) if now >= deadline => {}
            _ => return,
        }
        self.wake_deadline = None;

        manager.force_resume_all();
        if self.user_hold {
            manager.pause_all();
        } else if !manager.state().always_on {
            self.evaluate(manager);
        }
    }

    /// Time left until the wake recovery runs, if one is pending.
    pub fn wake_pending(&self, now: Instant) -> Option<Duration> {
        self.wake_deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn is_held(&self) -> bool {
        self.user_hold
    }
}
