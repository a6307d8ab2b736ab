//! In-memory backend with configurable displays.

use anyhow::Result;
use common::{FitMode, WallpaperRef};
use std::collections::BTreeMap;

use super::{BackendEvent, SurfaceBackend, SurfaceId, compose};
use crate::display::{Display, DisplayId, Rect};
use crate::playback::Frame;

/// What the headless backend remembers about one surface.
#[derive(Debug, Clone)]
pub struct HeadlessSurface {
    pub display: DisplayId,
    pub geometry: Rect,
    pub content: Option<String>,
    pub paused: bool,
    pub fit_mode: FitMode,
    pub presented: usize,
    pub last_size: Option<(u32, u32)>,
}

/// Composes frames like a real backend but never shows them.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    displays: Vec<Display>,
    surfaces: BTreeMap<SurfaceId, HeadlessSurface>,
    next_id: u64,
    pending: Vec<BackendEvent>,
}

impl HeadlessBackend {
    pub fn new(displays: Vec<Display>) -> Self {
        Self {
            displays,
            ..Self::default()
        }
    }

    /// Replace the display set, as a hotplug would.
    pub fn set_displays(&mut self, displays: Vec<Display>) {
        self.displays = displays;
        self.pending.push(BackendEvent::DisplaysChanged);
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&HeadlessSurface> {
        self.surfaces.get(&id)
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    fn surface_mut(&mut self, id: SurfaceId) -> Result<&mut HeadlessSurface> {
        self.surfaces
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("Unknown {}", id))
    }
}

impl SurfaceBackend for HeadlessBackend {
    fn displays(&self) -> Vec<Display> {
        self.displays.clone()
    }

    fn create(&mut self, display: &Display) -> Result<SurfaceId> {
        if !self.displays.iter().any(|d| d.id == display.id) {
            anyhow::bail!("Display {} is not connected", display.id);
        }

        self.next_id += 1;
        let id = SurfaceId(self.next_id);
        self.surfaces.insert(
            id,
            HeadlessSurface {
                display: display.id.clone(),
                geometry: display.geometry,
                content: None,
                paused: false,
                fit_mode: FitMode::default(),
                presented: 0,
                last_size: None,
            },
        );
        log::debug!("Created headless {} on {}", id, display.id);
        Ok(id)
    }

    fn bind(&mut self, id: SurfaceId, wallpaper: &WallpaperRef) -> Result<()> {
        self.surface_mut(id)?.content = Some(wallpaper.id.clone());
        Ok(())
    }

    fn set_paused(&mut self, id: SurfaceId, paused: bool) {
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.paused = paused;
        }
    }

    fn set_fit_mode(&mut self, id: SurfaceId, mode: FitMode) -> Result<()> {
        self.surface_mut(id)?.fit_mode = mode;
        Ok(())
    }

    fn reposition(&mut self, id: SurfaceId, geometry: Rect) -> Result<()> {
        self.surface_mut(id)?.geometry = geometry;
        Ok(())
    }

    fn present(&mut self, id: SurfaceId, frame: &Frame) -> Result<()> {
        let surface = self.surface_mut(id)?;
        let width = surface.geometry.width.round().max(1.0) as u32;
        let height = surface.geometry.height.round().max(1.0) as u32;
        let composed = compose::compose(frame, width, height, surface.fit_mode)?;

        surface.presented += 1;
        surface.last_size = Some(composed.dimensions());
        Ok(())
    }

    fn destroy(&mut self, id: SurfaceId) {
        if self.surfaces.remove(&id).is_some() {
            log::debug!("Destroyed headless {}", id);
        }
    }

    fn pump(&mut self) -> Result<Vec<BackendEvent>> {
        Ok(std::mem::take(&mut self.pending))
    }
}
