//! Convenience re-exports for the common path.

pub use crate::color::Color;
pub use crate::math::{Mat4, Rect, Vec2};
pub use crate::render::{
    BlendFactor, BlendState, HeadlessDevice, RenderDevice, RenderError, WgpuDevice,
};
pub use crate::render2d::{BatchError, DrawParams, SpriteBatch, Texture, TextureRegion};
pub use crate::window::{run, WindowConfig};
