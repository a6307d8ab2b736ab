//! Render surfaces: one background layer per display.
//!
//! The lifecycle manager only talks to [`SurfaceBackend`]. The Wayland
//! backend maps it onto layer-shell surfaces, the headless backend keeps
//! everything in memory for tests and for machines without a compositor.

pub mod compose;
pub mod headless;
#[cfg(feature = "wayland")]
pub mod wayland;

use anyhow::Result;
use common::{FitMode, WallpaperRef};
use std::fmt;

use crate::display::{Display, Rect};
use crate::playback::Frame;

pub use headless::HeadlessBackend;

/// Handle of one live surface inside a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Notifications a backend raises while being pumped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// A display appeared, disappeared or changed geometry.
    DisplaysChanged,
}

/// The display-server side of wallpaper rendering.
///
/// A surface sits below every application window, never takes input and
/// never reserves screen space.
pub trait SurfaceBackend {
    /// Currently connected displays, in no particular order.
    fn displays(&self) -> Vec<Display>;

    /// Create a borderless background surface covering `display`.
    fn create(&mut self, display: &Display) -> Result<SurfaceId>;

    /// Associate content with a surface, for bookkeeping and logging.
    fn bind(&mut self, id: SurfaceId, wallpaper: &WallpaperRef) -> Result<()>;

    fn set_paused(&mut self, id: SurfaceId, paused: bool);

    fn set_fit_mode(&mut self, id: SurfaceId, mode: FitMode) -> Result<()>;

    /// Move and resize a surface to new display geometry.
    fn reposition(&mut self, id: SurfaceId, geometry: Rect) -> Result<()>;

    /// Compose `frame` onto the surface and show it.
    fn present(&mut self, id: SurfaceId, frame: &Frame) -> Result<()>;

    /// Remove a surface. Unknown handles are ignored.
    fn destroy(&mut self, id: SurfaceId);

    /// Exchange pending protocol traffic without blocking.
    fn pump(&mut self) -> Result<Vec<BackendEvent>>;
}
