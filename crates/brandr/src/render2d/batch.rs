//! # SpriteBatch — Coalesce Draw Calls into Minimal GPU Submissions
//!
//! Each frame a game wants to draw hundreds or thousands of textured quads.
//! Issuing one GPU draw per quad drowns in per-call driver overhead, so the
//! batch accumulates quads into one preallocated vertex array and submits
//! them in as few indexed draws as possible. A scene of 500 sprites over 3
//! textures renders in 3 draw calls, not 500.
//!
//! ## Protocol
//!
//! ```text
//! begin()                         Ready → Drawing, reset per-frame counters
//!   draw(...) × N                 append 4 vertices (32 floats) per quad
//!     └─ implicit flush when:     · the bound texture changes
//!                                 · the vertex array is full
//!                                 · blend/shader/matrix state mutates
//! end()                           final flush, Drawing → Ready
//! ```
//!
//! `flush` uploads the used float range to the device's vertex buffer and
//! issues exactly one indexed draw covering every sprite appended since the
//! previous flush. The index buffer is built once at construction — six
//! indices per quad slot in the pattern `{0,1,2,2,1,3}` — and never touched
//! again, so index submission order always mirrors vertex append order.
//!
//! ## Memory Discipline
//!
//! The vertex array is allocated once (`max_sprites × 32` floats) and reused
//! for the lifetime of the batch. Nothing on the draw path allocates; the hot
//! loop is float writes into a slice at a cursor.
//!
//! ## Vertex Order and Winding
//!
//! Corners are appended bottom-left, bottom-right, top-left, top-right. With
//! the `{0,1,2,2,1,3}` index pattern that yields two counter-clockwise
//! triangles in a Y-up coordinate system. UV flips swap coordinate pairs
//! instead of reordering vertices, so winding is preserved.
//!
//! ## Error Model
//!
//! Sequencing misuse (`draw` before `begin`, `begin` twice, `end` while idle)
//! and non-finite geometry are caller bugs and fail fast with a
//! [`BatchError`], leaving the batch untouched. A flush that finds vertices
//! queued but no texture bound is a recoverable anomaly: the content is
//! dropped, a warning is logged, and the batch stays usable.

use glam::{Mat4, Vec2};

use crate::color::Color;
use crate::math::Rect;
use crate::render::device::{
    BlendFactor, BlendState, BufferId, DrawCommand, RenderDevice, ShaderId,
};
use crate::render2d::texture::{Texture, TextureRegion};

use std::fmt;

/// Floats per vertex: x, y, r, g, b, a, u, v.
pub const VERTEX_SIZE: usize = 8;
/// Floats per sprite: four vertices.
pub const SPRITE_SIZE: usize = 4 * VERTEX_SIZE;
/// Hard capacity ceiling: 4 vertices per sprite must stay addressable by u16
/// indices, so at most 65536 / 4 sprites per batch.
pub const MAX_SPRITES: usize = (u16::MAX as usize + 1) / 4;

/// Default WGSL shader: combined-matrix transform, texture × vertex color.
const DEFAULT_SHADER: &str = include_str!("shader.wgsl");

/// Errors raised by batch misuse. See the module docs for the error model.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchError {
    /// `begin` was called while the batch was already drawing.
    AlreadyDrawing,
    /// `draw`/`end`/`flush`-dependent call made while the batch was idle.
    NotDrawing,
    /// A geometry argument was NaN or infinite.
    NonFinite,
    /// Requested capacity is zero or exceeds [`MAX_SPRITES`].
    InvalidCapacity(usize),
    /// `draw_vertices` input length is not a multiple of [`SPRITE_SIZE`].
    InvalidVertexCount(usize),
    /// The GPU context is gone; the batch cannot touch the device.
    ContextLost,
    /// The default shader failed to compile at construction.
    Shader(String),
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchError::AlreadyDrawing => write!(f, "begin() called while already drawing"),
            BatchError::NotDrawing => write!(f, "operation requires begin() first"),
            BatchError::NonFinite => write!(f, "geometry argument is NaN or infinite"),
            BatchError::InvalidCapacity(n) => {
                write!(f, "capacity {n} outside 1..={MAX_SPRITES} sprites")
            }
            BatchError::InvalidVertexCount(n) => {
                write!(f, "vertex data length {n} is not a multiple of {SPRITE_SIZE}")
            }
            BatchError::ContextLost => write!(f, "gpu context is no longer alive"),
            BatchError::Shader(e) => write!(f, "default shader failed: {e}"),
        }
    }
}

impl std::error::Error for BatchError {}

/// Whether the batch is accepting draw calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    Ready,
    Drawing,
}

/// Optional per-draw transform parameters for the slow path.
///
/// `origin` is the pivot for scaling and rotation, relative to the sprite's
/// bottom-left corner. `rotation` is counter-clockwise degrees. `src` selects
/// a texel-space source rectangle (full texture when `None`). Flips swap UV
/// pairs without changing geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawParams {
    pub origin: Vec2,
    pub scale: Vec2,
    pub rotation: f32,
    pub src: Option<Rect>,
    pub flip_x: bool,
    pub flip_y: bool,
}

impl Default for DrawParams {
    fn default() -> Self {
        Self {
            origin: Vec2::ZERO,
            scale: Vec2::ONE,
            rotation: 0.0,
            src: None,
            flip_x: false,
            flip_y: false,
        }
    }
}

impl DrawParams {
    fn is_finite(&self) -> bool {
        self.origin.is_finite()
            && self.scale.is_finite()
            && self.rotation.is_finite()
            && self.src.map_or(true, |s| s.is_finite())
    }
}

/// A batched 2D quad renderer over an injected [`RenderDevice`].
///
/// The batch exclusively owns its device instance, its vertex/index buffers,
/// and the default shader; all three are released when the batch drops.
pub struct SpriteBatch<D: RenderDevice> {
    device: D,

    /// Interleaved vertex storage, fixed length `max_sprites × SPRITE_SIZE`.
    vertices: Vec<f32>,
    /// Next free float slot; resets to 0 on every flush.
    idx: usize,

    vertex_buffer: BufferId,
    index_buffer: BufferId,
    default_shader: ShaderId,
    custom_shader: Option<ShaderId>,

    state: BatchState,
    last_texture: Option<Texture>,
    inv_tex_width: f32,
    inv_tex_height: f32,

    color: Color,
    blending: bool,
    blend: BlendState,

    projection: Mat4,
    transform: Mat4,
    combined: Mat4,

    depth_write_restore: bool,

    /// Draw calls issued between the last `begin` and `end`.
    pub render_calls: u32,
    /// Draw calls issued over the lifetime of this batch.
    pub total_render_calls: u64,
    /// Largest sprite count submitted in a single flush.
    pub max_sprites_in_batch: u32,
}

impl<D: RenderDevice> SpriteBatch<D> {
    /// Create a batch with the default capacity of 1000 sprites.
    pub fn new(device: D) -> Result<Self, BatchError> {
        Self::with_capacity(device, 1000)
    }

    /// Create a batch holding up to `max_sprites` quads between flushes.
    ///
    /// Allocates the vertex array, generates and uploads the static index
    /// buffer, and compiles the default shader. `max_sprites` must be in
    /// `1..=`[`MAX_SPRITES`].
    pub fn with_capacity(mut device: D, max_sprites: usize) -> Result<Self, BatchError> {
        if max_sprites == 0 || max_sprites > MAX_SPRITES {
            return Err(BatchError::InvalidCapacity(max_sprites));
        }

        // Two triangles per quad slot: {0,1,2, 2,1,3} offset by 4 × slot.
        let mut indices = Vec::with_capacity(max_sprites * 6);
        for sprite in 0..max_sprites {
            let base = (sprite * 4) as u16;
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 1, base + 3]);
        }

        let capacity_floats = max_sprites * SPRITE_SIZE;
        let vertex_buffer =
            device.create_vertex_buffer((capacity_floats * std::mem::size_of::<f32>()) as u64);
        let index_buffer = device.create_index_buffer(&indices);
        let default_shader = device
            .create_shader(DEFAULT_SHADER)
            .map_err(|e| BatchError::Shader(e.to_string()))?;

        Ok(Self {
            device,
            vertices: vec![0.0; capacity_floats],
            idx: 0,
            vertex_buffer,
            index_buffer,
            default_shader,
            custom_shader: None,
            state: BatchState::Ready,
            last_texture: None,
            inv_tex_width: 0.0,
            inv_tex_height: 0.0,
            color: Color::WHITE,
            blending: true,
            blend: BlendState::ALPHA,
            projection: Mat4::IDENTITY,
            transform: Mat4::IDENTITY,
            combined: Mat4::IDENTITY,
            depth_write_restore: true,
            render_calls: 0,
            total_render_calls: 0,
            max_sprites_in_batch: 0,
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Start accepting draw calls.
    ///
    /// Resets the per-frame render-call counter, disables depth writes
    /// (sprite rendering is order-dependent, not depth-dependent), and
    /// recomputes the combined matrix from any values staged while idle.
    pub fn begin(&mut self) -> Result<(), BatchError> {
        if self.state == BatchState::Drawing {
            return Err(BatchError::AlreadyDrawing);
        }
        if !self.device.context_alive() {
            return Err(BatchError::ContextLost);
        }
        self.render_calls = 0;
        self.depth_write_restore = self.device.depth_write();
        self.device.set_depth_write(false);
        self.combined = self.projection * self.transform;
        self.state = BatchState::Drawing;
        Ok(())
    }

    /// Stop accepting draw calls, flushing anything still pending.
    ///
    /// Restores the depth-write flag captured at `begin`.
    pub fn end(&mut self) -> Result<(), BatchError> {
        if self.state == BatchState::Ready {
            return Err(BatchError::NotDrawing);
        }
        if self.idx > 0 {
            self.flush();
        }
        self.last_texture = None;
        self.device.set_depth_write(self.depth_write_restore);
        self.state = BatchState::Ready;
        Ok(())
    }

    /// Submit all pending vertices as one indexed draw. No-op when empty.
    ///
    /// A flush with vertices queued but no texture bound indicates an
    /// upstream bug; the content is dropped (with a warning) rather than
    /// submitted, and the batch remains usable.
    pub fn flush(&mut self) {
        if self.idx == 0 {
            return;
        }
        let Some(texture) = self.last_texture else {
            log::warn!(
                "flush with {} queued floats but no texture bound; dropping content",
                self.idx
            );
            self.vertices[..self.idx].fill(0.0);
            self.idx = 0;
            return;
        };

        let sprites = self.idx / SPRITE_SIZE;
        if sprites as u32 > self.max_sprites_in_batch {
            self.max_sprites_in_batch = sprites as u32;
        }

        let used = &self.vertices[..self.idx];
        self.device
            .upload_vertices(self.vertex_buffer, bytemuck::cast_slice(used));
        self.device.draw_indexed(&DrawCommand {
            vertex_buffer: self.vertex_buffer,
            index_buffer: self.index_buffer,
            index_count: (sprites * 6) as u32,
            texture: texture.id,
            shader: self.shader(),
            combined: self.combined,
            blend: self.blending.then_some(self.blend),
        });

        self.render_calls += 1;
        self.total_render_calls += 1;

        // Stale data in the unused tail is harmless but confusing in a
        // debugger; clear what we used.
        self.vertices[..self.idx].fill(0.0);
        self.idx = 0;
    }

    // ── Draw API ─────────────────────────────────────────────────────────

    /// Draw the full texture at its natural size.
    pub fn draw(&mut self, texture: &Texture, x: f32, y: f32) -> Result<(), BatchError> {
        self.draw_sized(texture, x, y, texture.width_f(), texture.height_f())
    }

    /// Draw the full texture stretched to `width × height`. The fast path:
    /// two corners computed directly, no rotation or origin math.
    pub fn draw_sized(
        &mut self,
        texture: &Texture,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    ) -> Result<(), BatchError> {
        ensure_finite(&[x, y, width, height])?;
        self.prepare(*texture)?;

        let x2 = x + width;
        let y2 = y + height;
        self.push_quad(
            [[x, y], [x2, y], [x, y2], [x2, y2]],
            [[0.0, 1.0], [1.0, 1.0], [0.0, 0.0], [1.0, 0.0]],
        );
        Ok(())
    }

    /// Draw a texel-space source rectangle at its natural size.
    pub fn draw_src(
        &mut self,
        texture: &Texture,
        x: f32,
        y: f32,
        src: Rect,
    ) -> Result<(), BatchError> {
        self.draw_src_sized(texture, x, y, src.width, src.height, src, false, false)
    }

    /// Draw a texel-space source rectangle stretched to `width × height`,
    /// with optional UV flips.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_src_sized(
        &mut self,
        texture: &Texture,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        src: Rect,
        flip_x: bool,
        flip_y: bool,
    ) -> Result<(), BatchError> {
        ensure_finite(&[x, y, width, height])?;
        if !src.is_finite() {
            return Err(BatchError::NonFinite);
        }
        self.prepare(*texture)?;

        let (u, v, u2, v2) = self.src_uv(src, flip_x, flip_y);
        let x2 = x + width;
        let y2 = y + height;
        self.push_quad(
            [[x, y], [x2, y], [x, y2], [x2, y2]],
            [[u, v2], [u2, v2], [u, v], [u2, v]],
        );
        Ok(())
    }

    /// Draw with origin, scale, and rotation.
    ///
    /// Corners are expressed relative to `params.origin`, scaled, rotated by
    /// `params.rotation` degrees, then translated to `(x, y) + origin`. Only
    /// three corners go through the rotation; the fourth is completed as
    /// `p4 = p1 + (p3 − p2)`, which is exact because the unrotated shape is
    /// an axis-aligned rectangle (a rotation preserves the parallelogram).
    pub fn draw_transformed(
        &mut self,
        texture: &Texture,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        params: &DrawParams,
    ) -> Result<(), BatchError> {
        ensure_finite(&[x, y, width, height])?;
        if !params.is_finite() {
            return Err(BatchError::NonFinite);
        }
        self.prepare(*texture)?;

        let src = params
            .src
            .unwrap_or(Rect::new(0.0, 0.0, texture.width_f(), texture.height_f()));
        let (u, v, u2, v2) = self.src_uv(src, params.flip_x, params.flip_y);
        let corners = transform_corners(x, y, width, height, params);
        self.push_quad(corners, [[u, v2], [u2, v2], [u, v], [u2, v]]);
        Ok(())
    }

    /// Draw a texture region stretched to `width × height`.
    pub fn draw_region(
        &mut self,
        region: &TextureRegion,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    ) -> Result<(), BatchError> {
        ensure_finite(&[x, y, width, height])?;
        self.prepare(region.texture)?;

        let (u, v, u2, v2) = (region.u, region.v, region.u2, region.v2);
        let x2 = x + width;
        let y2 = y + height;
        self.push_quad(
            [[x, y], [x2, y], [x, y2], [x2, y2]],
            [[u, v2], [u2, v2], [u, v], [u2, v]],
        );
        Ok(())
    }

    /// Draw a texture region with origin, scale, and rotation. The region's
    /// own UVs are used; `params.src` is ignored, `params` flips still apply.
    pub fn draw_region_transformed(
        &mut self,
        region: &TextureRegion,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        params: &DrawParams,
    ) -> Result<(), BatchError> {
        ensure_finite(&[x, y, width, height])?;
        if !params.is_finite() {
            return Err(BatchError::NonFinite);
        }
        self.prepare(region.texture)?;

        let (mut u, mut v, mut u2, mut v2) = (region.u, region.v, region.u2, region.v2);
        if params.flip_x {
            std::mem::swap(&mut u, &mut u2);
        }
        if params.flip_y {
            std::mem::swap(&mut v, &mut v2);
        }
        let corners = transform_corners(x, y, width, height, params);
        self.push_quad(corners, [[u, v2], [u2, v2], [u, v], [u2, v]]);
        Ok(())
    }

    /// Like [`draw_region_transformed`](Self::draw_region_transformed), with
    /// the region's UVs rotated 90° around the quad. `clockwise` picks the
    /// rotation direction. Vertex positions and triangle winding are
    /// unchanged — only the corner-to-UV assignment rotates.
    pub fn draw_region_rotated(
        &mut self,
        region: &TextureRegion,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        params: &DrawParams,
        clockwise: bool,
    ) -> Result<(), BatchError> {
        ensure_finite(&[x, y, width, height])?;
        if !params.is_finite() {
            return Err(BatchError::NonFinite);
        }
        self.prepare(region.texture)?;

        let (u, v, u2, v2) = (region.u, region.v, region.u2, region.v2);
        // Corner order is [BL, BR, TL, TR]. Unrotated assignment is
        // BL=(u,v2) BR=(u2,v2) TL=(u,v) TR=(u2,v); rotate one step around
        // the quad perimeter in either direction.
        let uv = if clockwise {
            [[u, v], [u, v2], [u2, v], [u2, v2]]
        } else {
            [[u2, v2], [u2, v], [u, v2], [u, v]]
        };
        let corners = transform_corners(x, y, width, height, params);
        self.push_quad(corners, uv);
        Ok(())
    }

    /// Copy pre-built vertex floats directly into the batch.
    ///
    /// `vertices` must be whole sprites (`len % `[`SPRITE_SIZE`]` == 0`) in
    /// the batch's interleaved layout. Copies are split on sprite boundaries
    /// whenever the remaining capacity runs out, with a flush between chunks.
    /// This path performs no geometry or UV computation.
    pub fn draw_vertices(
        &mut self,
        texture: &Texture,
        vertices: &[f32],
    ) -> Result<(), BatchError> {
        if self.state != BatchState::Drawing {
            return Err(BatchError::NotDrawing);
        }
        if vertices.len() % SPRITE_SIZE != 0 {
            return Err(BatchError::InvalidVertexCount(vertices.len()));
        }
        match self.last_texture {
            Some(t) if t.id == texture.id => {}
            _ => self.switch_texture(*texture),
        }

        let mut offset = 0;
        while offset < vertices.len() {
            let mut remaining = self.vertices.len() - self.idx;
            if remaining == 0 {
                self.flush();
                remaining = self.vertices.len();
            }
            let copy = remaining.min(vertices.len() - offset);
            self.vertices[self.idx..self.idx + copy]
                .copy_from_slice(&vertices[offset..offset + copy]);
            self.idx += copy;
            offset += copy;
        }
        Ok(())
    }

    // ── State mutators ───────────────────────────────────────────────────

    /// Set the projection matrix. Flushes pending vertices first so one draw
    /// call never mixes two projections; while idle the value is staged and
    /// applied at the next `begin`.
    pub fn set_projection_matrix(&mut self, projection: Mat4) {
        if self.state == BatchState::Drawing {
            self.flush();
        }
        self.projection = projection;
        if self.state == BatchState::Drawing {
            self.combined = self.projection * self.transform;
        }
    }

    /// Set the model/world transform matrix. Same staging rules as
    /// [`set_projection_matrix`](Self::set_projection_matrix).
    pub fn set_transform_matrix(&mut self, transform: Mat4) {
        if self.state == BatchState::Drawing {
            self.flush();
        }
        self.transform = transform;
        if self.state == BatchState::Drawing {
            self.combined = self.projection * self.transform;
        }
    }

    /// Replace the shader. `None` restores the built-in default. The batch
    /// never destroys a caller-supplied shader.
    pub fn set_shader(&mut self, shader: Option<ShaderId>) {
        if self.state == BatchState::Drawing {
            self.flush();
        }
        self.custom_shader = shader;
    }

    /// The shader draws are currently submitted with.
    pub fn shader(&self) -> ShaderId {
        self.custom_shader.unwrap_or(self.default_shader)
    }

    /// Set one blend factor pair for both color and alpha.
    pub fn set_blend_function(&mut self, src: BlendFactor, dst: BlendFactor) {
        self.set_blend_state(BlendState::uniform(src, dst));
    }

    /// Set separate RGB and alpha blend factor pairs.
    pub fn set_blend_function_separate(
        &mut self,
        src_color: BlendFactor,
        dst_color: BlendFactor,
        src_alpha: BlendFactor,
        dst_alpha: BlendFactor,
    ) {
        self.set_blend_state(BlendState {
            src_color,
            dst_color,
            src_alpha,
            dst_alpha,
        });
    }

    fn set_blend_state(&mut self, blend: BlendState) {
        if self.blend == blend {
            return;
        }
        if self.state == BatchState::Drawing {
            self.flush();
        }
        self.blend = blend;
    }

    /// Current blend configuration.
    pub fn blend_function(&self) -> BlendState {
        self.blend
    }

    /// Turn blending on. Flushes pending vertices if this is a change.
    pub fn enable_blending(&mut self) {
        self.set_blending(true);
    }

    /// Turn blending off (opaque writes). Flushes pending vertices if this
    /// is a change.
    pub fn disable_blending(&mut self) {
        self.set_blending(false);
    }

    fn set_blending(&mut self, enabled: bool) {
        if self.blending == enabled {
            return;
        }
        if self.state == BatchState::Drawing {
            self.flush();
        }
        self.blending = enabled;
    }

    /// Whether blending is currently enabled.
    pub fn is_blending_enabled(&self) -> bool {
        self.blending
    }

    /// Set the tint applied to every subsequent quad. Non-finite colors are
    /// replaced with opaque white before they can reach vertex memory.
    pub fn set_color(&mut self, color: Color) {
        self.color = color.sanitized();
    }

    /// Set the tint from a packed ABGR8888 value.
    pub fn set_packed_color(&mut self, abgr: u32) {
        self.color = Color::from_abgr8888(abgr);
    }

    /// The current tint color.
    pub fn color(&self) -> Color {
        self.color
    }

    /// The current projection matrix.
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    /// The current transform matrix.
    pub fn transform_matrix(&self) -> Mat4 {
        self.transform
    }

    /// True between `begin` and `end`.
    pub fn is_drawing(&self) -> bool {
        self.state == BatchState::Drawing
    }

    /// Borrow the underlying device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutably borrow the underlying device (texture creation, frame
    /// presentation, backend-specific configuration).
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Common draw-call prologue: state check, texture switch, capacity
    /// flush. After this returns `Ok`, exactly one quad slot is free.
    fn prepare(&mut self, texture: Texture) -> Result<(), BatchError> {
        if self.state != BatchState::Drawing {
            return Err(BatchError::NotDrawing);
        }
        match self.last_texture {
            Some(t) if t.id == texture.id => {}
            _ => self.switch_texture(texture),
        }
        if self.idx == self.vertices.len() {
            self.flush();
        }
        Ok(())
    }

    /// Flush anything queued under the old texture, then bind the new one.
    fn switch_texture(&mut self, texture: Texture) {
        self.flush();
        self.last_texture = Some(texture);
        self.inv_tex_width = 1.0 / texture.width_f();
        self.inv_tex_height = 1.0 / texture.height_f();
    }

    /// Normalize a texel-space source rect against the bound texture, with
    /// optional pair swaps for flipping.
    fn src_uv(&self, src: Rect, flip_x: bool, flip_y: bool) -> (f32, f32, f32, f32) {
        let mut u = src.x * self.inv_tex_width;
        let mut u2 = (src.x + src.width) * self.inv_tex_width;
        let mut v = src.y * self.inv_tex_height;
        let mut v2 = (src.y + src.height) * self.inv_tex_height;
        if flip_x {
            std::mem::swap(&mut u, &mut u2);
        }
        if flip_y {
            std::mem::swap(&mut v, &mut v2);
        }
        (u, v, u2, v2)
    }

    /// Append one quad: corners and UVs in [BL, BR, TL, TR] order, tinted
    /// with the current color. The caller has guaranteed a free slot.
    fn push_quad(&mut self, corners: [[f32; 2]; 4], uv: [[f32; 2]; 4]) {
        let Color { r, g, b, a } = self.color;
        for i in 0..4 {
            let base = self.idx + i * VERTEX_SIZE;
            self.vertices[base] = corners[i][0];
            self.vertices[base + 1] = corners[i][1];
            self.vertices[base + 2] = r;
            self.vertices[base + 3] = g;
            self.vertices[base + 4] = b;
            self.vertices[base + 5] = a;
            self.vertices[base + 6] = uv[i][0];
            self.vertices[base + 7] = uv[i][1];
        }
        self.idx += SPRITE_SIZE;
    }
}

impl<D: RenderDevice> Drop for SpriteBatch<D> {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.vertex_buffer);
        self.device.destroy_buffer(self.index_buffer);
        // Only the default shader is batch-owned.
        self.device.destroy_shader(self.default_shader);
    }
}

fn ensure_finite(values: &[f32]) -> Result<(), BatchError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(BatchError::NonFinite)
    }
}

/// Origin/scale/rotation corner computation shared by the transformed draw
/// paths. Returns corners in [BL, BR, TL, TR] order, already translated into
/// destination space.
fn transform_corners(
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    params: &DrawParams,
) -> [[f32; 2]; 4] {
    let world_x = x + params.origin.x;
    let world_y = y + params.origin.y;

    // Corners relative to the origin point, scaled.
    let mut fx = -params.origin.x;
    let mut fy = -params.origin.y;
    let mut fx2 = width - params.origin.x;
    let mut fy2 = height - params.origin.y;
    if params.scale != Vec2::ONE {
        fx *= params.scale.x;
        fy *= params.scale.y;
        fx2 *= params.scale.x;
        fy2 *= params.scale.y;
    }

    // Rotate bottom-left, top-left, and top-right; complete bottom-right as
    // p4 = p1 + (p3 − p2). Valid because the unrotated quad is an
    // axis-aligned rectangle, so opposite sides stay parallel under rotation.
    let (x1, y1, x2t, y2t, x3, y3, x4, y4);
    if params.rotation != 0.0 {
        let rad = params.rotation.to_radians();
        let (sin, cos) = rad.sin_cos();

        x1 = cos * fx - sin * fy; // bottom-left
        y1 = sin * fx + cos * fy;

        x2t = cos * fx - sin * fy2; // top-left
        y2t = sin * fx + cos * fy2;

        x3 = cos * fx2 - sin * fy2; // top-right
        y3 = sin * fx2 + cos * fy2;

        x4 = x1 + (x3 - x2t); // bottom-right
        y4 = y1 + (y3 - y2t);
    } else {
        x1 = fx;
        y1 = fy;
        x2t = fx;
        y2t = fy2;
        x3 = fx2;
        y3 = fy2;
        x4 = fx2;
        y4 = fy;
    }

    [
        [x1 + world_x, y1 + world_y], // bottom-left
        [x4 + world_x, y4 + world_y], // bottom-right
        [x2t + world_x, y2t + world_y], // top-left
        [x3 + world_x, y3 + world_y], // top-right
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::headless::{DeviceCall, HeadlessDevice};

    fn batch(max_sprites: usize) -> SpriteBatch<HeadlessDevice> {
        SpriteBatch::with_capacity(HeadlessDevice::new(), max_sprites).unwrap()
    }

    #[test]
    fn construction_creates_buffers_and_shader() {
        let b = batch(2);
        let calls = &b.device().calls;
        assert!(matches!(
            calls[0],
            DeviceCall::CreateVertexBuffer { capacity, .. }
                if capacity == (2 * SPRITE_SIZE * 4) as u64
        ));
        match &calls[1] {
            DeviceCall::CreateIndexBuffer { indices, .. } => {
                assert_eq!(indices.len(), 12); // 6 per sprite slot
                assert_eq!(&indices[..6], &[0, 1, 2, 2, 1, 3]);
                assert_eq!(&indices[6..], &[4, 5, 6, 6, 5, 7]); // offset by 4
            }
            other => panic!("expected index buffer creation, got {other:?}"),
        }
        assert!(matches!(calls[2], DeviceCall::CreateShader(_)));
    }

    #[test]
    fn capacity_bounds_rejected() {
        assert_eq!(
            SpriteBatch::with_capacity(HeadlessDevice::new(), 0).err(),
            Some(BatchError::InvalidCapacity(0))
        );
        assert!(matches!(
            SpriteBatch::with_capacity(HeadlessDevice::new(), MAX_SPRITES + 1).err(),
            Some(BatchError::InvalidCapacity(_))
        ));
        assert!(SpriteBatch::with_capacity(HeadlessDevice::new(), MAX_SPRITES).is_ok());
    }

    #[test]
    fn draw_before_begin_fails_without_mutation() {
        let mut b = batch(4);
        let tex = b.device_mut().texture(16, 16);
        assert_eq!(b.draw(&tex, 0.0, 0.0).err(), Some(BatchError::NotDrawing));
        assert_eq!(b.idx, 0); // write cursor untouched
        assert_eq!(b.device().draw_count(), 0);
    }

    #[test]
    fn begin_twice_and_end_idle_fail() {
        let mut b = batch(4);
        b.begin().unwrap();
        assert_eq!(b.begin().err(), Some(BatchError::AlreadyDrawing));
        b.end().unwrap();
        assert_eq!(b.end().err(), Some(BatchError::NotDrawing));
    }

    #[test]
    fn begin_with_dead_context_fails() {
        let mut b = batch(4);
        b.device_mut().alive = false;
        assert_eq!(b.begin().err(), Some(BatchError::ContextLost));
        assert!(!b.is_drawing());
    }

    #[test]
    fn end_to_end_single_texture_one_flush() {
        let mut b = batch(8);
        let tex = b.device_mut().texture(32, 32);

        b.begin().unwrap();
        b.draw_sized(&tex, 0.0, 0.0, 10.0, 10.0).unwrap();
        b.draw_sized(&tex, 20.0, 0.0, 10.0, 10.0).unwrap();
        b.end().unwrap();

        let dev = b.device();
        assert_eq!(dev.draw_count(), 1);
        assert_eq!(b.render_calls, 1);
        assert_eq!(b.total_render_calls, 1);
        assert_eq!(b.max_sprites_in_batch, 2);

        let draw = dev.draws()[0];
        assert_eq!(draw.index_count, 12); // 2 sprites × 6 indices

        // 8 vertices (2 sprites × 4), 8 floats each.
        let uploaded = dev.last_upload_floats();
        assert_eq!(uploaded.len(), 2 * SPRITE_SIZE);
    }

    #[test]
    fn texture_switch_forces_flush() {
        let mut b = batch(8);
        let tex_a = b.device_mut().texture(32, 32);
        let tex_b = b.device_mut().texture(64, 64);

        b.begin().unwrap();
        b.draw_sized(&tex_a, 0.0, 0.0, 10.0, 10.0).unwrap();
        b.draw_sized(&tex_b, 0.0, 0.0, 10.0, 10.0).unwrap();
        b.end().unwrap();

        let draws = b.device().draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].texture, tex_a.id);
        assert_eq!(draws[0].index_count, 6); // only A's sprite
        assert_eq!(draws[1].texture, tex_b.id);
        assert_eq!(draws[1].index_count, 6);
        assert_eq!(b.render_calls, 2);
    }

    #[test]
    fn flush_threshold_property() {
        // ceil(N / capacity) draw calls for constant-texture input.
        let capacity = 3;
        for n in 1..=10usize {
            let mut b = batch(capacity);
            let tex = b.device_mut().texture(16, 16);
            b.begin().unwrap();
            for i in 0..n {
                b.draw_sized(&tex, i as f32, 0.0, 1.0, 1.0).unwrap();
            }
            b.end().unwrap();

            let expected = n.div_ceil(capacity);
            assert_eq!(b.device().draw_count(), expected, "n = {n}");

            // Each call covers exactly the sprites appended since the last flush.
            let total: u32 = b.device().draws().iter().map(|d| d.index_count).sum();
            assert_eq!(total as usize, n * 6);
        }
    }

    #[test]
    fn capacity_wrap_never_overflows() {
        let mut b = batch(2);
        let tex = b.device_mut().texture(16, 16);
        b.begin().unwrap();
        b.draw_sized(&tex, 0.0, 0.0, 1.0, 1.0).unwrap();
        b.draw_sized(&tex, 1.0, 0.0, 1.0, 1.0).unwrap();
        // Buffer is exactly full; nothing has flushed yet.
        assert_eq!(b.device().draw_count(), 0);
        assert_eq!(b.idx, 2 * SPRITE_SIZE);

        // The next draw must flush first, then append.
        b.draw_sized(&tex, 2.0, 0.0, 1.0, 1.0).unwrap();
        assert_eq!(b.device().draw_count(), 1);
        assert_eq!(b.idx, SPRITE_SIZE);
        b.end().unwrap();
        assert_eq!(b.device().draw_count(), 2);
    }

    #[test]
    fn vertex_layout_and_color() {
        let mut b = batch(4);
        let tex = b.device_mut().texture(16, 16);
        b.set_color(Color::new(0.25, 0.5, 0.75, 1.0));
        b.begin().unwrap();
        b.draw_sized(&tex, 2.0, 3.0, 10.0, 20.0).unwrap();
        b.end().unwrap();

        let v = b.device().last_upload_floats();
        assert_eq!(v.len(), SPRITE_SIZE);
        // Bottom-left vertex: position, color, uv.
        assert_eq!(&v[0..2], &[2.0, 3.0]);
        assert_eq!(&v[2..6], &[0.25, 0.5, 0.75, 1.0]);
        assert_eq!(&v[6..8], &[0.0, 1.0]);
        // Top-right vertex is the last one.
        assert_eq!(&v[24..26], &[12.0, 23.0]);
        assert_eq!(&v[30..32], &[1.0, 0.0]);
    }

    #[test]
    fn src_rect_normalizes_uv() {
        let mut b = batch(4);
        let tex = b.device_mut().texture(64, 32);
        b.begin().unwrap();
        b.draw_src(&tex, 0.0, 0.0, Rect::new(16.0, 8.0, 32.0, 16.0))
            .unwrap();
        b.end().unwrap();

        let v = b.device().last_upload_floats();
        // Bottom-left samples (u, v2) = (16/64, 24/32).
        assert!((v[6] - 0.25).abs() < 1e-6);
        assert!((v[7] - 0.75).abs() < 1e-6);
        // Top-right samples (u2, v) = (48/64, 8/32).
        assert!((v[30] - 0.75).abs() < 1e-6);
        assert!((v[31] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn uv_flip_is_its_own_inverse() {
        let src = Rect::new(0.0, 0.0, 16.0, 16.0);
        let capture = |flip_x: bool, flip_y: bool| {
            let mut b = batch(4);
            let tex = b.device_mut().texture(16, 16);
            b.begin().unwrap();
            b.draw_src_sized(&tex, 0.0, 0.0, 16.0, 16.0, src, flip_x, flip_y)
                .unwrap();
            b.end().unwrap();
            let v = b.device().last_upload_floats();
            // UV pairs of the four vertices.
            [v[6], v[7], v[14], v[15], v[22], v[23], v[30], v[31]]
        };

        // A flip swaps U values across the left/right corners and V values
        // across the bottom/top corners. Applying that swap to a captured
        // layout models flipping both flags once more.
        fn flip_xy(uv: [f32; 8]) -> [f32; 8] {
            let [blu, blv, bru, brv, tlu, tlv, tru, trv] = uv;
            [bru, tlv, blu, trv, tru, blv, tlu, brv]
        }

        let plain = capture(false, false);
        let flipped = capture(true, true);
        assert_ne!(plain, flipped); // both flips change the assignment
        assert_eq!(flip_xy(plain), flipped);
        assert_eq!(flip_xy(flip_xy(plain)), plain); // its own inverse

        // Single flips swap exactly one pair.
        let fx = capture(true, false);
        assert_eq!(fx[0], plain[2]); // BL.u took BR.u's value
        assert_eq!(fx[1], plain[1]); // v untouched
    }

    #[test]
    fn rotation_matches_full_four_corner_rotation() {
        let mut b = batch(4);
        let tex = b.device_mut().texture(16, 16);
        b.begin().unwrap();
        let params = DrawParams {
            origin: Vec2::new(5.0, 10.0),
            rotation: 90.0,
            ..Default::default()
        };
        b.draw_transformed(&tex, 100.0, 200.0, 10.0, 20.0, &params)
            .unwrap();
        b.end().unwrap();

        let v = b.device().last_upload_floats();
        let got = [
            [v[0], v[1]],   // BL
            [v[8], v[9]],   // BR
            [v[16], v[17]], // TL
            [v[24], v[25]], // TR
        ];

        // Independently rotate all four corners, no shortcut.
        let (wx, wy) = (105.0_f32, 210.0_f32);
        let rad = 90.0_f32.to_radians();
        let (sin, cos) = rad.sin_cos();
        let rot = |px: f32, py: f32| [cos * px - sin * py + wx, sin * px + cos * py + wy];
        let expected = [
            rot(-5.0, -10.0), // BL
            rot(5.0, -10.0),  // BR
            rot(-5.0, 10.0),  // TL
            rot(5.0, 10.0),   // TR
        ];

        for (g, e) in got.iter().zip(expected.iter()) {
            assert!((g[0] - e[0]).abs() < 1e-4, "{got:?} vs {expected:?}");
            assert!((g[1] - e[1]).abs() < 1e-4);
        }
    }

    #[test]
    fn scale_applies_around_origin() {
        let mut b = batch(4);
        let tex = b.device_mut().texture(16, 16);
        b.begin().unwrap();
        let params = DrawParams {
            scale: Vec2::new(2.0, 3.0),
            ..Default::default()
        };
        b.draw_transformed(&tex, 10.0, 10.0, 4.0, 4.0, &params).unwrap();
        b.end().unwrap();

        let v = b.device().last_upload_floats();
        assert_eq!(&v[0..2], &[10.0, 10.0]); // BL pinned at origin
        assert_eq!(&v[24..26], &[18.0, 22.0]); // TR scaled out
    }

    #[test]
    fn region_rotated_uv_cycles() {
        let run = |clockwise: bool| {
            let mut b = batch(4);
            let tex = b.device_mut().texture(16, 16);
            let region = TextureRegion::from_pixels(tex, 0.0, 0.0, 8.0, 8.0);
            b.begin().unwrap();
            b.draw_region_rotated(
                &region,
                0.0,
                0.0,
                8.0,
                8.0,
                &DrawParams::default(),
                clockwise,
            )
            .unwrap();
            b.end().unwrap();
            let v = b.device().last_upload_floats();
            [[v[6], v[7]], [v[14], v[15]], [v[22], v[23]], [v[30], v[31]]]
        };

        let cw = run(true);
        let ccw = run(false);
        // Each assignment is a one-step rotation of the plain layout
        // BL=(u,v2) BR=(u2,v2) TL=(u,v) TR=(u2,v) around the perimeter
        // BL→BR→TR→TL, in opposite directions.
        assert_eq!(cw, [[0.0, 0.0], [0.0, 0.5], [0.5, 0.0], [0.5, 0.5]]);
        assert_eq!(ccw, [[0.5, 0.5], [0.5, 0.0], [0.0, 0.5], [0.0, 0.0]]);
    }

    #[test]
    fn draw_vertices_chunks_on_capacity() {
        let mut b = batch(2);
        let tex = b.device_mut().texture(16, 16);

        // Three quads of pre-baked data (content is arbitrary but distinct).
        let mut data = vec![0.0f32; 3 * SPRITE_SIZE];
        for (i, f) in data.iter_mut().enumerate() {
            *f = i as f32;
        }

        b.begin().unwrap();
        b.draw_vertices(&tex, &data).unwrap();
        // Two sprites filled the buffer; the third forced a flush.
        assert_eq!(b.device().draw_count(), 1);
        assert_eq!(b.idx, SPRITE_SIZE);
        b.end().unwrap();

        let uploads = b.device().uploads();
        assert_eq!(uploads.len(), 2);
        let first = bytemuck::pod_collect_to_vec::<u8, f32>(uploads[0]);
        let second = bytemuck::pod_collect_to_vec::<u8, f32>(uploads[1]);
        assert_eq!(first, &data[..2 * SPRITE_SIZE]);
        assert_eq!(second, &data[2 * SPRITE_SIZE..]);
    }

    #[test]
    fn draw_vertices_rejects_partial_sprites() {
        let mut b = batch(2);
        let tex = b.device_mut().texture(16, 16);
        b.begin().unwrap();
        let err = b.draw_vertices(&tex, &[0.0; 17]).err();
        assert_eq!(err, Some(BatchError::InvalidVertexCount(17)));
        b.end().unwrap();
    }

    #[test]
    fn non_finite_geometry_rejected() {
        let mut b = batch(4);
        let tex = b.device_mut().texture(16, 16);
        b.begin().unwrap();
        assert_eq!(
            b.draw_sized(&tex, f32::NAN, 0.0, 1.0, 1.0).err(),
            Some(BatchError::NonFinite)
        );
        assert_eq!(
            b.draw_transformed(
                &tex,
                0.0,
                0.0,
                1.0,
                1.0,
                &DrawParams {
                    rotation: f32::INFINITY,
                    ..Default::default()
                },
            )
            .err(),
            Some(BatchError::NonFinite)
        );
        assert_eq!(b.idx, 0); // nothing appended
        b.end().unwrap();
        assert_eq!(b.device().draw_count(), 0);
    }

    #[test]
    fn blend_change_flushes_pending() {
        let mut b = batch(8);
        let tex = b.device_mut().texture(16, 16);
        b.begin().unwrap();
        b.draw_sized(&tex, 0.0, 0.0, 1.0, 1.0).unwrap();
        b.set_blend_function(BlendFactor::One, BlendFactor::One);
        assert_eq!(b.device().draw_count(), 1); // flushed before the change
        b.draw_sized(&tex, 1.0, 0.0, 1.0, 1.0).unwrap();
        b.end().unwrap();

        let draws = b.device().draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].blend, Some(BlendState::ALPHA));
        assert_eq!(
            draws[1].blend,
            Some(BlendState::uniform(BlendFactor::One, BlendFactor::One))
        );
    }

    #[test]
    fn redundant_blend_change_does_not_flush() {
        let mut b = batch(8);
        let tex = b.device_mut().texture(16, 16);
        b.begin().unwrap();
        b.draw_sized(&tex, 0.0, 0.0, 1.0, 1.0).unwrap();
        b.set_blend_function(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);
        assert_eq!(b.device().draw_count(), 0); // same state, no flush
        b.end().unwrap();
    }

    #[test]
    fn disable_blending_submits_opaque() {
        let mut b = batch(8);
        let tex = b.device_mut().texture(16, 16);
        b.begin().unwrap();
        b.disable_blending();
        b.draw_sized(&tex, 0.0, 0.0, 1.0, 1.0).unwrap();
        b.end().unwrap();
        assert_eq!(b.device().draws()[0].blend, None);
    }

    #[test]
    fn matrix_change_flushes_and_recombines() {
        let mut b = batch(8);
        let tex = b.device_mut().texture(16, 16);
        let proj = Mat4::orthographic_rh(0.0, 100.0, 0.0, 100.0, -1.0, 1.0);

        b.begin().unwrap();
        b.draw_sized(&tex, 0.0, 0.0, 1.0, 1.0).unwrap();
        b.set_projection_matrix(proj);
        assert_eq!(b.device().draw_count(), 1);
        b.draw_sized(&tex, 1.0, 0.0, 1.0, 1.0).unwrap();
        b.end().unwrap();

        let draws = b.device().draws();
        assert_eq!(draws[0].combined, Mat4::IDENTITY);
        assert_eq!(draws[1].combined, proj);
    }

    #[test]
    fn matrix_staged_while_idle_applies_at_begin() {
        let mut b = batch(8);
        let tex = b.device_mut().texture(16, 16);
        let proj = Mat4::orthographic_rh(0.0, 10.0, 0.0, 10.0, -1.0, 1.0);
        b.set_projection_matrix(proj); // staged, batch is Ready
        b.begin().unwrap();
        b.draw_sized(&tex, 0.0, 0.0, 1.0, 1.0).unwrap();
        b.end().unwrap();
        assert_eq!(b.device().draws()[0].combined, proj);
    }

    #[test]
    fn shader_swap_takes_effect_and_flushes() {
        let mut b = batch(8);
        let tex = b.device_mut().texture(16, 16);
        let custom = b.device_mut().create_shader("@vertex fn v() {}").unwrap();
        let default = b.shader();

        b.begin().unwrap();
        b.draw_sized(&tex, 0.0, 0.0, 1.0, 1.0).unwrap();
        b.set_shader(Some(custom));
        b.draw_sized(&tex, 1.0, 0.0, 1.0, 1.0).unwrap();
        b.end().unwrap();

        let draws = b.device().draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].shader, default);
        assert_eq!(draws[1].shader, custom);

        b.set_shader(None);
        assert_eq!(b.shader(), default);
    }

    #[test]
    fn flush_without_texture_drops_content_and_recovers() {
        let mut b = batch(4);
        let tex = b.device_mut().texture(16, 16);
        b.begin().unwrap();
        b.draw_sized(&tex, 0.0, 0.0, 1.0, 1.0).unwrap();
        b.last_texture = None; // simulate the upstream bug the guard exists for
        b.flush();
        assert_eq!(b.idx, 0); // cursor reset
        assert_eq!(b.device().draw_count(), 0); // nothing submitted

        // The batch stays usable.
        b.draw_sized(&tex, 0.0, 0.0, 1.0, 1.0).unwrap();
        b.end().unwrap();
        assert_eq!(b.device().draw_count(), 1);
    }

    #[test]
    fn depth_write_disabled_during_bracket_and_restored() {
        let mut b = batch(4);
        b.begin().unwrap();
        assert!(!b.device().depth_write());
        b.end().unwrap();
        assert!(b.device().depth_write());
    }

    #[test]
    fn used_range_cleared_after_flush() {
        let mut b = batch(4);
        let tex = b.device_mut().texture(16, 16);
        b.begin().unwrap();
        b.draw_sized(&tex, 5.0, 5.0, 5.0, 5.0).unwrap();
        b.end().unwrap();
        assert!(b.vertices.iter().all(|&f| f == 0.0)); // stale-data guard
    }

    #[test]
    fn counters_accumulate_across_brackets() {
        let mut b = batch(4);
        let tex = b.device_mut().texture(16, 16);
        for _ in 0..3 {
            b.begin().unwrap();
            b.draw_sized(&tex, 0.0, 0.0, 1.0, 1.0).unwrap();
            b.end().unwrap();
            assert_eq!(b.render_calls, 1); // resets each begin
        }
        assert_eq!(b.total_render_calls, 3);
    }

    #[test]
    fn drop_releases_gpu_objects() {
        let mut dev = HeadlessDevice::new();
        let (vb, ib, shader);
        {
            let b = SpriteBatch::with_capacity(&mut dev, 4).unwrap();
            vb = b.vertex_buffer;
            ib = b.index_buffer;
            shader = b.default_shader;
        }
        assert!(dev.calls.contains(&DeviceCall::DestroyBuffer(vb)));
        assert!(dev.calls.contains(&DeviceCall::DestroyBuffer(ib)));
        assert!(dev.calls.contains(&DeviceCall::DestroyShader(shader)));
    }
}
