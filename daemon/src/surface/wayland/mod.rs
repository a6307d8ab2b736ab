//! Layer-shell backend for wlroots-style compositors.

mod buffer;
mod handlers;

use anyhow::{Context, Result};
use common::{FitMode, WallpaperRef};
use smithay_client_toolkit::{
    compositor::CompositorState,
    output::OutputState,
    registry::RegistryState,
    shell::{
        WaylandSurface,
        wlr_layer::{Anchor, KeyboardInteractivity, Layer, LayerShell, LayerSurface},
    },
    shm::Shm,
};
use std::collections::BTreeMap;
use wayland_client::{
    Connection, EventQueue, QueueHandle, backend::WaylandError, globals::registry_queue_init,
    protocol::{wl_output, wl_shm},
};

use self::buffer::ShmBuffer;
use super::{BackendEvent, SurfaceBackend, SurfaceId, compose};
use crate::display::{Display, DisplayId, Rect};
use crate::playback::Frame;

/// Buffers kept per surface; one on screen, one being written.
const MAX_BUFFERS: usize = 2;

pub(crate) struct LayerOutput {
    display: DisplayId,
    output: wl_output::WlOutput,
    layer: LayerSurface,
    width: u32,
    height: u32,
    configured: bool,
    fit_mode: FitMode,
    paused: bool,
    content: Option<String>,
    last_frame: Option<Frame>,
    buffers: Vec<ShmBuffer>,
}

impl LayerOutput {
    /// Draw the last frame, or black before any content arrived.
    fn draw(&mut self, shm: &wl_shm::WlShm, qh: &QueueHandle<WaylandState>) -> Result<()> {
        if !self.configured || self.width == 0 || self.height == 0 {
            return Ok(());
        }

        let composed = match &self.last_frame {
            Some(frame) => compose::compose(frame, self.width, self.height, self.fit_mode)?,
            None => image::RgbaImage::from_pixel(
                self.width,
                self.height,
                image::Rgba([0, 0, 0, 255]),
            ),
        };

        let (width, height) = (self.width, self.height);
        self.buffers.retain(|b| b.fits(width, height) || b.is_busy());

        let index = match self
            .buffers
            .iter()
            .position(|b| b.fits(width, height) && !b.is_busy())
        {
            Some(index) => index,
            None => {
                if self.buffers.len() >= MAX_BUFFERS {
                    log::trace!("All buffers of {} busy, skipping frame", self.display);
                    return Ok(());
                }
                self.buffers.push(ShmBuffer::new(shm, width, height, qh)?);
                self.buffers.len() - 1
            }
        };

        let buffer = &mut self.buffers[index];
        compose::rgba_to_argb8888(&composed, buffer.data_mut())?;

        let surface = self.layer.wl_surface();
        surface.attach(Some(buffer.buffer()), 0, 0);
        surface.damage_buffer(0, 0, i32::try_from(width)?, i32::try_from(height)?);
        surface.commit();
        buffer.mark_busy();
        Ok(())
    }

    /// Drop every buffer the compositor is not holding.
    fn trim_idle_buffers(&mut self) {
        self.buffers.retain(|b| b.is_busy());
    }
}

pub(crate) struct WaylandState {
    registry_state: RegistryState,
    compositor_state: CompositorState,
    layer_shell: LayerShell,
    output_state: OutputState,
    shm: Shm,
    surfaces: BTreeMap<SurfaceId, LayerOutput>,
    topology_dirty: bool,
}

/// Background layer surfaces on a live Wayland connection.
pub struct WaylandBackend {
    _conn: Connection,
    queue: EventQueue<WaylandState>,
    qh: QueueHandle<WaylandState>,
    state: WaylandState,
    next_id: u64,
}

impl WaylandBackend {
    pub fn connect() -> Result<Self> {
        log::info!("Connecting to Wayland compositor...");

        let conn = Connection::connect_to_env().context("Failed to connect to Wayland")?;
        let (globals, mut queue) = registry_queue_init(&conn)?;
        let qh = queue.handle();

        let mut state = WaylandState {
            registry_state: RegistryState::new(&globals),
            compositor_state: CompositorState::bind(&globals, &qh)?,
            layer_shell: LayerShell::bind(&globals, &qh)
                .context("Compositor does not support wlr-layer-shell")?,
            output_state: OutputState::new(&globals, &qh),
            shm: Shm::bind(&globals, &qh)?,
            surfaces: BTreeMap::new(),
            topology_dirty: false,
        };

        // One roundtrip for the outputs, one for their names and geometry.
        queue.roundtrip(&mut state)?;
        queue.roundtrip(&mut state)?;
        state.topology_dirty = false;

        log::info!(
            "Connected to Wayland compositor, {} output(s)",
            state.output_state.outputs().count()
        );

        Ok(Self {
            _conn: conn,
            queue,
            qh,
            state,
            next_id: 0,
        })
    }

    fn find_output(&self, id: &DisplayId) -> Option<wl_output::WlOutput> {
        self.state.output_state.outputs().find(|output| {
            self.state
                .output_state
                .info(output)
                .and_then(|info| info.name)
                .is_some_and(|name| name == id.as_str())
        })
    }

    fn surface_mut(&mut self, id: SurfaceId) -> Result<&mut LayerOutput> {
        self.state
            .surfaces
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("Unknown {}", id))
    }
}

impl SurfaceBackend for WaylandBackend {
    fn displays(&self) -> Vec<Display> {
        self.state
            .output_state
            .outputs()
            .filter_map(|output| {
                let info = self.state.output_state.info(&output)?;
                let name = info.name?;
                let (x, y) = info.logical_position.unwrap_or((0, 0));
                let (width, height) = info.logical_size?;
                Some(Display::new(
                    name.as_str(),
                    Rect::new(
                        f64::from(x),
                        f64::from(y),
                        f64::from(width),
                        f64::from(height),
                    ),
                ))
            })
            .collect()
    }

    fn create(&mut self, display: &Display) -> Result<SurfaceId> {
        let output = self
            .find_output(&display.id)
            .with_context(|| format!("Display {} is not connected", display.id))?;

        let surface = self.state.compositor_state.create_surface(&self.qh);
        let layer = self.state.layer_shell.create_layer_surface(
            &self.qh,
            surface,
            Layer::Background,
            Some("backdrop"),
            Some(&output),
        );
        layer.set_anchor(Anchor::all());
        layer.set_exclusive_zone(-1);
        layer.set_keyboard_interactivity(KeyboardInteractivity::None);
        layer.commit();

        self.next_id += 1;
        let id = SurfaceId(self.next_id);
        self.state.surfaces.insert(
            id,
            LayerOutput {
                display: display.id.clone(),
                output,
                layer,
                width: display.geometry.width.round() as u32,
                height: display.geometry.height.round() as u32,
                configured: false,
                fit_mode: FitMode::default(),
                paused: false,
                content: None,
                last_frame: None,
                buffers: Vec::new(),
            },
        );
        log::info!("Created layer surface for {}", display.id);
        Ok(id)
    }

    fn bind(&mut self, id: SurfaceId, wallpaper: &WallpaperRef) -> Result<()> {
        let surface = self.surface_mut(id)?;
        log::debug!("Binding {} to {}", wallpaper.name, surface.display);
        surface.content = Some(wallpaper.id.clone());
        Ok(())
    }

    fn set_paused(&mut self, id: SurfaceId, paused: bool) {
        if let Some(surface) = self.state.surfaces.get_mut(&id) {
            if paused && !surface.paused {
                surface.trim_idle_buffers();
            }
            surface.paused = paused;
        }
    }

    fn set_fit_mode(&mut self, id: SurfaceId, mode: FitMode) -> Result<()> {
        let shm = self.state.shm.wl_shm().clone();
        let qh = self.qh.clone();
        let surface = self.surface_mut(id)?;
        if surface.fit_mode != mode {
            surface.fit_mode = mode;
            surface.draw(&shm, &qh)?;
        }
        Ok(())
    }

    fn reposition(&mut self, id: SurfaceId, geometry: Rect) -> Result<()> {
        let surface = self.surface_mut(id)?;
        let (width, height) = (
            geometry.width.round() as u32,
            geometry.height.round() as u32,
        );
        if (width, height) != (surface.width, surface.height) {
            // Ask for a fresh configure; the redraw happens there.
            surface.configured = false;
            surface.layer.set_size(0, 0);
            surface.layer.commit();
        }
        Ok(())
    }

    fn present(&mut self, id: SurfaceId, frame: &Frame) -> Result<()> {
        let shm = self.state.shm.wl_shm().clone();
        let qh = self.qh.clone();
        let surface = self.surface_mut(id)?;
        surface.last_frame = Some(frame.clone());
        surface.draw(&shm, &qh)
    }

    fn destroy(&mut self, id: SurfaceId) {
        if let Some(surface) = self.state.surfaces.remove(&id) {
            log::info!("Destroyed layer surface on {}", surface.display);
        }
    }

    fn pump(&mut self) -> Result<Vec<BackendEvent>> {
        self.queue.flush().context("Failed to flush Wayland connection")?;

        if let Some(guard) = self.queue.prepare_read() {
            match guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e).context("Failed to read Wayland events"),
            }
        }

        self.queue
            .dispatch_pending(&mut self.state)
            .context("Failed to dispatch Wayland events")?;

        if std::mem::take(&mut self.state.topology_dirty) {
            Ok(vec![BackendEvent::DisplaysChanged])
        } else {
            Ok(Vec::new())
        }
    }
}
