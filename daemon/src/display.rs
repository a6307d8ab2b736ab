//! Display identity and geometry.

use std::fmt;

/// Platform-assigned display name, e.g. `DP-1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DisplayId(String);

impl DisplayId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DisplayId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Axis-aligned rectangle in the compositor's logical coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        if right > left && bottom > top {
            Some(Rect::new(left, top, right - left, bottom - top))
        } else {
            None
        }
    }

    /// Fraction of `self` covered by `other`, in `[0, 1]`.
    pub fn coverage_by(&self, other: &Rect) -> f64 {
        let area = self.area();
        if area <= 0.0 {
            return 0.0;
        }
        self.intersection(other)
            .map(|overlap| overlap.area() / area)
            .unwrap_or(0.0)
    }
}

/// A connected display.
#[derive(Debug, Clone, PartialEq)]
pub struct Display {
    pub id: DisplayId,
    pub geometry: Rect,
}

impl Display {
    pub fn new(id: impl Into<DisplayId>, geometry: Rect) -> Self {
        Self {
            id: id.into(),
            geometry,
        }
    }
}

/// Order used for 1-based display indices: left to right, then top to bottom.
pub fn sort_by_position(displays: &mut [Display]) {
    displays.sort_by(|a, b| {
        a.geometry
            .x
            .total_cmp(&b.geometry.x)
            .then(a.geometry.y.total_cmp(&b.geometry.y))
            .then_with(|| a.id.cmp(&b.id))
    });
}
