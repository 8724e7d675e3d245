//! # Texture and TextureRegion Value Types
//!
//! [`Texture`] pairs a device handle with the image's pixel dimensions. The
//! batch needs the dimensions on the CPU side — texel-space source rectangles
//! are normalized to UVs with `1 / width` and `1 / height` — so they ride
//! along with the handle instead of requiring a store lookup per draw call.
//! Both types are `Copy`: they are handles plus plain numbers, never owners
//! of GPU memory. The device that created the texture owns the GPU object.
//!
//! [`TextureRegion`] selects a sub-rectangle of a texture in normalized UV
//! space — one frame of a sprite sheet, one glyph of an atlas. Regions are
//! cheap values; make as many as you like over one texture.
//!
//! UV convention: (0, 0) is the top-left of the image, `v` grows downward.
//! `u < u2` and `v < v2` for an unflipped region; [`flip`](TextureRegion::flip)
//! swaps the pairs in place.

use crate::render::device::TextureId;

/// A device texture handle plus its pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Texture {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
}

impl Texture {
    pub fn width_f(&self) -> f32 {
        self.width as f32
    }

    pub fn height_f(&self) -> f32 {
        self.height as f32
    }
}

/// A sub-rectangle of a [`Texture`] in normalized UV coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureRegion {
    pub texture: Texture,
    pub u: f32,
    pub v: f32,
    pub u2: f32,
    pub v2: f32,
}

impl TextureRegion {
    /// A region covering the whole texture.
    pub fn new(texture: Texture) -> Self {
        Self {
            texture,
            u: 0.0,
            v: 0.0,
            u2: 1.0,
            v2: 1.0,
        }
    }

    /// A region from a texel-space rectangle (top-left origin).
    pub fn from_pixels(texture: Texture, x: f32, y: f32, width: f32, height: f32) -> Self {
        let inv_w = 1.0 / texture.width_f();
        let inv_h = 1.0 / texture.height_f();
        Self {
            texture,
            u: x * inv_w,
            v: y * inv_h,
            u2: (x + width) * inv_w,
            v2: (y + height) * inv_h,
        }
    }

    /// Region width in texels (negative if horizontally flipped).
    pub fn region_width(&self) -> f32 {
        (self.u2 - self.u) * self.texture.width_f()
    }

    /// Region height in texels (negative if vertically flipped).
    pub fn region_height(&self) -> f32 {
        (self.v2 - self.v) * self.texture.height_f()
    }

    /// Swap the U and/or V coordinate pairs in place.
    pub fn flip(&mut self, x: bool, y: bool) {
        if x {
            std::mem::swap(&mut self.u, &mut self.u2);
        }
        if y {
            std::mem::swap(&mut self.v, &mut self.v2);
        }
    }

    /// True if horizontally flipped (u pair swapped).
    pub fn is_flip_x(&self) -> bool {
        self.u > self.u2
    }

    /// True if vertically flipped (v pair swapped).
    pub fn is_flip_y(&self) -> bool {
        self.v > self.v2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tex() -> Texture {
        Texture {
            id: TextureId(7),
            width: 256,
            height: 128,
        }
    }

    #[test]
    fn full_region_covers_unit_square() {
        let r = TextureRegion::new(tex());
        assert_eq!((r.u, r.v, r.u2, r.v2), (0.0, 0.0, 1.0, 1.0));
        assert_eq!(r.region_width(), 256.0);
        assert_eq!(r.region_height(), 128.0);
    }

    #[test]
    fn from_pixels_normalizes() {
        let r = TextureRegion::from_pixels(tex(), 64.0, 32.0, 64.0, 64.0);
        assert!((r.u - 0.25).abs() < 1e-6);
        assert!((r.v - 0.25).abs() < 1e-6);
        assert!((r.u2 - 0.5).abs() < 1e-6);
        assert!((r.v2 - 0.75).abs() < 1e-6);
        assert!((r.region_width() - 64.0).abs() < 1e-4);
        assert!((r.region_height() - 64.0).abs() < 1e-4);
    }

    #[test]
    fn flip_swaps_pairs_and_round_trips() {
        let mut r = TextureRegion::from_pixels(tex(), 0.0, 0.0, 128.0, 64.0);
        let orig = r;
        r.flip(true, true);
        assert!(r.is_flip_x());
        assert!(r.is_flip_y());
        r.flip(true, true);
        assert_eq!(r, orig); // double flip is identity
    }
}
