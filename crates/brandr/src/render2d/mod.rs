//! The 2D sprite rendering core: the batched quad renderer and the texture
//! value types it consumes. See [`batch::SpriteBatch`] for the protocol.

pub mod batch;
pub mod texture;

pub use batch::{BatchError, DrawParams, SpriteBatch, MAX_SPRITES, SPRITE_SIZE, VERTEX_SIZE};
pub use texture::{Texture, TextureRegion};
