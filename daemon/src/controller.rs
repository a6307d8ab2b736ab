//! The control thread: sole owner of catalog, surfaces and orchestration.

use anyhow::{Context, Result};
use common::{Catalog, Command, DisplayTarget};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;

use crate::display::DisplayId;
use crate::events::{ControlEvent, EventReceiver};
use crate::lifecycle::LifecycleManager;
use crate::log_and_continue;
use crate::surface::SurfaceBackend;
use crate::visibility::Orchestrator;

const IDLE_DELAY: Duration = Duration::from_millis(100);
const MIN_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct Controller<B: SurfaceBackend> {
    catalog: Catalog,
    manager: LifecycleManager<B>,
    orchestrator: Orchestrator,
    events: EventReceiver,
    tick_interval: Duration,
    stopped: bool,
}

impl<B: SurfaceBackend> Controller<B> {
    pub fn new(
        catalog: Catalog,
        manager: LifecycleManager<B>,
        orchestrator: Orchestrator,
        events: EventReceiver,
        tick_interval: Duration,
    ) -> Self {
        Self {
            catalog,
            manager,
            orchestrator,
            events,
            tick_interval,
            stopped: false,
        }
    }

    /// Bring back the persisted assignments on displays that are connected.
    pub fn restore(&mut self) {
        let displays = self.manager.connected_displays();
        for assignment in self.catalog.list_assignments() {
            let Some(wallpaper) = self.catalog.resolve(&assignment.wallpaper_id).cloned() else {
                log::warn!(
                    "Assignment for {} names unknown wallpaper {}",
                    assignment.display,
                    assignment.wallpaper_id
                );
                continue;
            };
            let Some(display) = displays
                .iter()
                .find(|d| d.id.as_str() == assignment.display)
            else {
                log::debug!("Display {} not connected, skipping", assignment.display);
                continue;
            };
            log_and_continue!(
                self.manager.assign(&wallpaper, display),
                format!("restore {} on {}", wallpaper.name, display.id)
            );
        }
    }

    /// Drive the loop until `Quit`, a signal, or a fatal backend error.
    pub fn run(&mut self) -> Result<()> {
        self.restore();
        self.orchestrator.evaluate(&mut self.manager);

        loop {
            match self.step(Instant::now()) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => {
                    self.teardown();
                    return Err(e);
                }
            }
            std::thread::sleep(self.next_delay(Instant::now()));
        }

        self.teardown();
        Ok(())
    }

    /// One loop iteration without sleeping.
    pub fn step(&mut self, now: Instant) -> Result<Flow> {
        if self.stopped {
            return Ok(Flow::Stop);
        }

        let mut frames = BTreeSet::new();
        loop {
            match self.events.try_recv() {
                // Several announcements for one display collapse into one present.
                Ok(ControlEvent::FrameReady(display)) => {
                    frames.insert(display);
                }
                Ok(event) => {
                    if self.handle_event(event, now) == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::info!("All event sources closed");
                    return Ok(Flow::Stop);
                }
            }
        }

        for display in &frames {
            self.manager.present_frame(display);
        }

        if self.manager.pump_backend().context("Display connection lost")? {
            self.handle_event(ControlEvent::DisplaysChanged, now);
        }

        self.orchestrator.poll_wake(now, &mut self.manager);
        self.manager.service();
        Ok(Flow::Continue)
    }

    fn next_delay(&self, now: Instant) -> Duration {
        let mut delay = if self.manager.has_surfaces() && !self.manager.is_paused() {
            self.tick_interval
        } else {
            IDLE_DELAY
        };
        if let Some(pending) = self.orchestrator.wake_pending(now) {
            delay = delay.min(pending);
        }
        delay.clamp(MIN_DELAY, IDLE_DELAY)
    }

    pub fn handle_event(&mut self, event: ControlEvent, now: Instant) -> Flow {
        match event {
            ControlEvent::Command(command) => match self.handle_command(command) {
                Ok(flow) => return flow,
                Err(e) => log::error!("Command failed: {:#}", e),
            },
            ControlEvent::Shutdown(signal) => {
                log::info!("Received {}, shutting down", signal);
                return Flow::Stop;
            }
            ControlEvent::VisibilityPoll
            | ControlEvent::WorkspaceSwitched
            | ControlEvent::ForegroundChanged => {
                self.orchestrator.evaluate(&mut self.manager);
            }
            ControlEvent::DisplaysChanged => {
                let current = self.manager.connected_displays();
                log::info!("Display topology changed ({} connected)", current.len());
                self.manager.reconcile_display_topology(&current);
                self.orchestrator.evaluate(&mut self.manager);
            }
            ControlEvent::WillSleep => self.orchestrator.will_sleep(&mut self.manager),
            ControlEvent::DidWake => self.orchestrator.did_wake(now),
            ControlEvent::FrameReady(display) => self.manager.present_frame(&display),
        }
        Flow::Continue
    }

    pub fn handle_command(&mut self, command: Command) -> Result<Flow> {
        log::debug!("Handling command: {:?}", command);

        match command {
            Command::SetWallpaper { path, display } => {
                let wallpaper = self.catalog.register(&path)?;
                let assigned = match display {
                    DisplayTarget::All => self.manager.assign_all(&wallpaper),
                    DisplayTarget::Index(_) => {
                        let mut assigned = Vec::new();
                        for target in self.manager.resolve_target(display)? {
                            self.manager.assign(&wallpaper, &target)?;
                            assigned.push(target.id);
                        }
                        assigned
                    }
                };
                for target in assigned {
                    log_and_continue!(
                        self.catalog
                            .persist_assignment(target.as_str(), Some(&wallpaper.id)),
                        "persist assignment"
                    );
                }
            }
            Command::UnsetWallpaper {
                display: DisplayTarget::All,
            } => {
                self.manager.unassign_all();
                self.catalog.clear_assignments()?;
            }
            Command::UnsetWallpaper { display } => {
                for target in self.manager.resolve_target(display)? {
                    self.manager.unassign(&target.id);
                    self.catalog.persist_assignment(target.id.as_str(), None)?;
                }
            }
            Command::SetAlwaysOn { enabled } => {
                self.manager.set_always_on(enabled);
                self.catalog.persist_settings(self.manager.state().settings())?;
                self.orchestrator.evaluate(&mut self.manager);
            }
            Command::SetAutoResize { enabled } => {
                self.manager.set_auto_resize(enabled);
                self.catalog.persist_settings(self.manager.state().settings())?;
            }
            Command::Pause => self.orchestrator.hold(&mut self.manager),
            Command::Resume => self.orchestrator.release(&mut self.manager),
            Command::Quit => {
                log::info!("Quit requested");
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// Tear down every surface. Assignments stay persisted. Idempotent.
    pub fn teardown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.manager.shutdown();
        log::info!("Control loop stopped");
    }

    pub fn manager(&self) -> &LifecycleManager<B> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut LifecycleManager<B> {
        &mut self.manager
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn is_assigned(&self, display: &str) -> bool {
        self.manager.surface(&DisplayId::from(display)).is_some()
    }
}
