//! Math types and glam re-exports.
//!
//! We re-export the [glam](https://docs.rs/glam) types the public API uses so
//! callers don't need a direct glam dependency. [`Rect`] is an x/y/width/height
//! rectangle used for texel-space source regions in draw calls.

pub use glam::{Mat4, Vec2};

/// An axis-aligned rectangle: origin corner plus extent.
///
/// For texture source rectangles the coordinates are in texels, with (0, 0)
/// at the top-left of the image and `y` growing downward (image convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// True if every component is a finite float.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}
