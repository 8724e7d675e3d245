//! # Color — Per-Channel Floats with Packed Interop
//!
//! The batch stores its draw color as four unpacked floats (R, G, B, A in
//! `0.0..=1.0`) because that is what ends up in vertex memory — each quad
//! corner carries the full four-channel color. Some tooling and file formats
//! instead encode a color as a single 32-bit integer, so [`Color`] also
//! converts to and from the ABGR8888 packing:
//!
//! ```text
//! bit 31..24   23..16   15..8    7..0
//!     alpha    blue     green    red
//! ```
//!
//! Packing quantizes each channel to 8 bits (`channel × 255`, clamped to
//! `0..=255`). Unpacking is the inverse, so a round trip is exact to within
//! 1/255 per channel.
//!
//! ## Non-Finite Inputs
//!
//! A NaN or infinite channel must never reach a GPU vertex buffer — a single
//! NaN vertex can black out an entire triangle on some drivers. Anywhere a
//! caller-supplied color enters the renderer it passes through
//! [`Color::sanitized`], which replaces a color containing any non-finite
//! channel with opaque white.

/// An RGBA color with unpacked `f32` channels in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    /// Create a color from four channels. Values are stored as given; callers
    /// that accept untrusted floats should follow up with [`sanitized`](Self::sanitized).
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Returns `self` unless any channel is NaN or infinite, in which case
    /// returns opaque white.
    pub fn sanitized(self) -> Self {
        let finite = self.r.is_finite()
            && self.g.is_finite()
            && self.b.is_finite()
            && self.a.is_finite();
        if finite { self } else { Self::WHITE }
    }

    /// Pack into a single ABGR8888 integer.
    ///
    /// Each channel is quantized to `0..=255` (clamped first, so out-of-range
    /// floats saturate instead of wrapping). Non-finite colors pack as opaque
    /// white via [`sanitized`](Self::sanitized).
    pub fn to_abgr8888(self) -> u32 {
        let c = self.sanitized();
        let r = (c.r.clamp(0.0, 1.0) * 255.0).round() as u32;
        let g = (c.g.clamp(0.0, 1.0) * 255.0).round() as u32;
        let b = (c.b.clamp(0.0, 1.0) * 255.0).round() as u32;
        let a = (c.a.clamp(0.0, 1.0) * 255.0).round() as u32;
        (a << 24) | (b << 16) | (g << 8) | r
    }

    /// Unpack an ABGR8888 integer into four float channels.
    pub fn from_abgr8888(packed: u32) -> Self {
        Self {
            r: (packed & 0xff) as f32 / 255.0,
            g: ((packed >> 8) & 0xff) as f32 / 255.0,
            b: ((packed >> 16) & 0xff) as f32 / 255.0,
            a: ((packed >> 24) & 0xff) as f32 / 255.0,
        }
    }

    /// The four channels as an array, in RGBA order.
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}
