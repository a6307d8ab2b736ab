//! Which wallpaper is shown on which display, and in what state.

use anyhow::{Context, Result};
use common::{DisplayTarget, FitMode, Settings, WallpaperRef};
use std::collections::BTreeMap;

use crate::display::{self, Display, DisplayId, Rect};
use crate::playback::{Playback, PlaybackFactory};
use crate::surface::{BackendEvent, SurfaceBackend, SurfaceId};

/// Process-wide playback flags shared by every surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackState {
    pub paused: bool,
    pub always_on: bool,
    pub auto_resize: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            paused: false,
            always_on: false,
            auto_resize: true,
        }
    }
}

impl PlaybackState {
    /// Startup state: persisted flags, playing.
    pub fn from_settings(settings: Settings) -> Self {
        Self {
            paused: false,
            always_on: settings.always_on,
            auto_resize: settings.auto_resize,
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            always_on: self.always_on,
            auto_resize: self.auto_resize,
        }
    }

    pub fn fit_mode(&self) -> FitMode {
        FitMode::from_auto_resize(self.auto_resize)
    }
}

/// One display's surface and the playback feeding it.
pub struct RenderSurface {
    pub wallpaper: WallpaperRef,
    pub playback: Box<dyn Playback>,
    pub surface: SurfaceId,
    pub geometry: Rect,
}

pub struct LifecycleManager<B: SurfaceBackend> {
    backend: B,
    factory: Box<dyn PlaybackFactory>,
    surfaces: BTreeMap<DisplayId, RenderSurface>,
    state: PlaybackState,
}

impl<B: SurfaceBackend> LifecycleManager<B> {
    pub fn new(backend: B, factory: Box<dyn PlaybackFactory>, state: PlaybackState) -> Self {
        Self {
            backend,
            factory,
            surfaces: BTreeMap::new(),
            state,
        }
    }

    /// Connected displays in index order.
    pub fn connected_displays(&self) -> Vec<Display> {
        let mut displays = self.backend.displays();
        display::sort_by_position(&mut displays);
        displays
    }

    /// Displays addressed by `target`. An out-of-range index is an error.
    pub fn resolve_target(&self, target: DisplayTarget) -> Result<Vec<Display>> {
        let displays = self.connected_displays();
        match target {
            DisplayTarget::All => Ok(displays),
            DisplayTarget::Index(index) => {
                let position = usize::try_from(index)?
                    .checked_sub(1)
                    .context("Display indices start at 1")?;
                displays
                    .get(position)
                    .cloned()
                    .map(|d| vec![d])
                    .with_context(|| {
                        format!(
                            "No display {} ({} connected)",
                            index,
                            self.backend.displays().len()
                        )
                    })
            }
        }
    }

    /// Show `wallpaper` on `display`, replacing whatever was there.
    ///
    /// The new playback is opened before the old surface goes away, so a
    /// wallpaper that fails to open leaves the display untouched.
    pub fn assign(&mut self, wallpaper: &WallpaperRef, display: &Display) -> Result<()> {
        let mut playback = self
            .factory
            .open(wallpaper, &display.id, self.state.paused)
            .with_context(|| format!("open {} for {}", wallpaper.name, display.id))?;

        self.unassign(&display.id);

        let surface = match self.create_surface(display, wallpaper) {
            Ok(surface) => surface,
            Err(e) => {
                playback.stop();
                return Err(e);
            }
        };

        if let Some(frame) = playback.current_frame() {
            if let Err(e) = self.backend.present(surface, &frame) {
                log::warn!("Failed to present first frame on {}: {:#}", display.id, e);
            }
        }

        log::info!("Showing {} on {}", wallpaper.name, display.id);
        self.surfaces.insert(
            display.id.clone(),
            RenderSurface {
                wallpaper: wallpaper.clone(),
                playback,
                surface,
                geometry: display.geometry,
            },
        );
        Ok(())
    }

    fn create_surface(&mut self, display: &Display, wallpaper: &WallpaperRef) -> Result<SurfaceId> {
        let surface = self.backend.create(display)?;
        let configured = self
            .backend
            .bind(surface, wallpaper)
            .and_then(|_| self.backend.set_fit_mode(surface, self.state.fit_mode()));
        if let Err(e) = configured {
            self.backend.destroy(surface);
            return Err(e);
        }
        self.backend.set_paused(surface, self.state.paused);
        Ok(surface)
    }

    /// Assign to every connected display. Returns the displays that took it.
    pub fn assign_all(&mut self, wallpaper: &WallpaperRef) -> Vec<DisplayId> {
        let mut assigned = Vec::new();
        for display in self.connected_displays() {
            match self.assign(wallpaper, &display) {
                Ok(()) => assigned.push(display.id),
                Err(e) => log::error!("Failed to assign {}: {:#}", display.id, e),
            }
        }
        assigned
    }

    /// Tear down the surface on `display`. Returns whether one existed.
    pub fn unassign(&mut self, display: &DisplayId) -> bool {
        let Some(mut render) = self.surfaces.remove(display) else {
            return false;
        };
        render.playback.stop();
        self.backend.destroy(render.surface);
        log::info!("Cleared {}", display);
        true
    }

    pub fn unassign_all(&mut self) {
        let displays: Vec<DisplayId> = self.surfaces.keys().cloned().collect();
        for display in displays {
            self.unassign(&display);
        }
    }

    pub fn pause_all(&mut self) {
        if !self.state.paused {
            log::info!("Pausing playback");
        }
        self.state.paused = true;
        self.fan_out_pause(true);
    }

    pub fn resume_all(&mut self) {
        if self.state.paused {
            log::info!("Resuming playback");
        }
        self.state.paused = false;
        self.fan_out_pause(false);
    }

    fn fan_out_pause(&mut self, paused: bool) {
        for render in self.surfaces.values_mut() {
            render.playback.set_paused(paused);
            self.backend.set_paused(render.surface, paused);
        }
    }

    pub fn set_auto_resize(&mut self, enabled: bool) {
        self.state.auto_resize = enabled;
        self.apply_resize_mode();
    }

    /// Push the current fit mode to every surface.
    pub fn apply_resize_mode(&mut self) {
        let mode = self.state.fit_mode();
        for (display, render) in &self.surfaces {
            if let Err(e) = self.backend.set_fit_mode(render.surface, mode) {
                log::warn!("Failed to apply {:?} on {}: {:#}", mode, display, e);
            }
        }
    }

    pub fn set_always_on(&mut self, enabled: bool) {
        self.state.always_on = enabled;
    }

    /// Drop surfaces whose display vanished and move the ones that changed.
    /// Never creates surfaces.
    pub fn reconcile_display_topology(&mut self, current: &[Display]) {
        let vanished: Vec<DisplayId> = self
            .surfaces
            .keys()
            .filter(|id| !current.iter().any(|d| &d.id == *id))
            .cloned()
            .collect();
        for display in vanished {
            log::info!("Display {} disconnected", display);
            self.unassign(&display);
        }

        for display in current {
            let Some(render) = self.surfaces.get_mut(&display.id) else {
                continue;
            };
            if render.geometry == display.geometry {
                continue;
            }
            match self.backend.reposition(render.surface, display.geometry) {
                Ok(()) => render.geometry = display.geometry,
                Err(e) => log::warn!("Failed to reposition {}: {:#}", display.id, e),
            }
        }
    }

    /// Unstick every playback after a wake and leave everything playing.
    pub fn force_resume_all(&mut self) {
        for render in self.surfaces.values_mut() {
            render.playback.force_resume();
            self.backend.set_paused(render.surface, false);
        }
        self.state.paused = false;
    }

    /// Show the current frame of the playback on `display`.
    pub fn present_frame(&mut self, display: &DisplayId) {
        let Some(render) = self.surfaces.get(display) else {
            return;
        };
        let Some(frame) = render.playback.current_frame() else {
            return;
        };
        if let Err(e) = self.backend.present(render.surface, &frame) {
            log::debug!("Failed to present frame on {}: {:#}", display, e);
        }
    }

    /// Per-iteration playback housekeeping. A failing playback is torn down.
    pub fn service(&mut self) {
        let failed: Vec<DisplayId> = self
            .surfaces
            .iter_mut()
            .filter_map(|(display, render)| match render.playback.service() {
                Ok(()) => None,
                Err(e) => {
                    log::error!("Playback on {} failed: {:#}", display, e);
                    Some(display.clone())
                }
            })
            .collect();
        for display in failed {
            self.unassign(&display);
        }
    }

    /// Pump the backend; returns whether the display topology changed.
    pub fn pump_backend(&mut self) -> Result<bool> {
        let events = self.backend.pump()?;
        Ok(events.contains(&BackendEvent::DisplaysChanged))
    }

    /// Tear everything down. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if !self.surfaces.is_empty() {
            log::info!("Tearing down {} surface(s)", self.surfaces.len());
        }
        self.unassign_all();
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    pub fn has_surfaces(&self) -> bool {
        !self.surfaces.is_empty()
    }

    pub fn surface(&self, display: &DisplayId) -> Option<&RenderSurface> {
        self.surfaces.get(display)
    }

    pub fn assigned_displays(&self) -> Vec<DisplayId> {
        self.surfaces.keys().cloned().collect()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: SurfaceBackend> Drop for LifecycleManager<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
