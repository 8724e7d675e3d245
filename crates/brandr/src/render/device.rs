//! # RenderDevice — The Injected GPU Capability Surface
//!
//! The sprite batch never talks to a graphics API directly. Instead it owns a
//! [`RenderDevice`] implementation and drives it through a narrow contract:
//! create two buffers and a shader up front, then per flush upload one byte
//! range and issue one indexed draw. Everything the draw needs — texture,
//! shader, blend state, the combined projection×transform matrix, index
//! count — travels in a single [`DrawCommand`] value.
//!
//! ## Why a Trait
//!
//! Reaching the GPU through a process-global binding layer makes the
//! submission protocol untestable without a live context. Moving the
//! capability behind a trait buys two things:
//!
//! - The production backend ([`WgpuDevice`](super::wgpu_device::WgpuDevice))
//!   is just one implementation.
//! - Tests substitute [`HeadlessDevice`](super::headless::HeadlessDevice),
//!   which records every call, so properties like "N draws with one texture
//!   produce exactly ceil(N / capacity) draw calls" are plain assertions on
//!   a `Vec`.
//!
//! ## Handle Types
//!
//! [`BufferId`], [`TextureId`], and [`ShaderId`] are opaque `u32` newtypes.
//! The device owns the real GPU objects; the batch only routes handles. This
//! is the same handle-over-resource indirection used for textures throughout
//! the crate.

use std::fmt;

use glam::Mat4;

/// Handle to a device-owned vertex or index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) u32);

/// Handle to a device-owned texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) u32);

/// Handle to a device-owned shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub(crate) u32);

/// One factor of a blend equation, mirroring the classic fixed-function set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

/// A full blend configuration: separate factor pairs for RGB and alpha.
///
/// `source × src_factor + destination × dst_factor`, component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
}

impl BlendState {
    /// Standard non-premultiplied alpha blending.
    pub const ALPHA: Self = Self {
        src_color: BlendFactor::SrcAlpha,
        dst_color: BlendFactor::OneMinusSrcAlpha,
        src_alpha: BlendFactor::SrcAlpha,
        dst_alpha: BlendFactor::OneMinusSrcAlpha,
    };

    /// Same factor pair for color and alpha.
    pub const fn uniform(src: BlendFactor, dst: BlendFactor) -> Self {
        Self {
            src_color: src,
            dst_color: dst,
            src_alpha: src,
            dst_alpha: dst,
        }
    }
}

impl Default for BlendState {
    fn default() -> Self {
        Self::ALPHA
    }
}

/// Everything one indexed draw needs, captured at flush time.
///
/// `blend: None` means blending is disabled for this draw (opaque write).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCommand {
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    /// Number of indices to draw, starting at index 0. Always a multiple of 6.
    pub index_count: u32,
    pub texture: TextureId,
    pub shader: ShaderId,
    /// Combined projection × transform matrix for the shader's uniform.
    pub combined: Mat4,
    pub blend: Option<BlendState>,
}

/// Errors raised by a device backend.
#[derive(Debug)]
pub enum RenderError {
    /// No usable GPU adapter/device/surface could be acquired.
    NoAdapter(String),
    /// A shader failed validation or compilation.
    ShaderCompile(String),
    /// An image file could not be read or decoded.
    TextureLoad(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::NoAdapter(e) => write!(f, "gpu device unavailable: {e}"),
            RenderError::ShaderCompile(e) => write!(f, "shader compilation failed: {e}"),
            RenderError::TextureLoad(e) => write!(f, "texture load failed: {e}"),
        }
    }
}

impl std::error::Error for RenderError {}

/// The GPU capability contract consumed by the sprite batch.
///
/// Object lifecycles: buffers and shaders created through this trait are owned
/// by the device and released with the matching `destroy_*` call. Index
/// buffers are upload-once — their contents are supplied at creation and never
/// rewritten. Vertex buffers are rewritten on every flush via
/// [`upload_vertices`](Self::upload_vertices), which always receives exactly
/// the used byte range, never the full capacity.
pub trait RenderDevice {
    /// Create a vertex buffer with the given byte capacity.
    fn create_vertex_buffer(&mut self, capacity: u64) -> BufferId;

    /// Create an index buffer and upload `indices` into it immediately.
    fn create_index_buffer(&mut self, indices: &[u16]) -> BufferId;

    /// Release a buffer. Ignores handles that were already destroyed.
    fn destroy_buffer(&mut self, buffer: BufferId);

    /// Compile a shader from WGSL source.
    fn create_shader(&mut self, source: &str) -> Result<ShaderId, RenderError>;

    /// Release a shader. Ignores handles that were already destroyed.
    fn destroy_shader(&mut self, shader: ShaderId);

    /// Replace the start of `buffer` with `data`. `data.len()` never exceeds
    /// the capacity the buffer was created with.
    fn upload_vertices(&mut self, buffer: BufferId, data: &[u8]);

    /// Issue one indexed triangle-list draw.
    fn draw_indexed(&mut self, cmd: &DrawCommand);

    /// Current depth-write flag, so callers can save and restore it.
    fn depth_write(&self) -> bool;

    /// Enable or disable depth writes for subsequent draws.
    fn set_depth_write(&mut self, enabled: bool);

    /// Whether the underlying GPU context is still usable from this thread.
    /// Backends that cannot lose their context may keep the default.
    fn context_alive(&self) -> bool {
        true
    }
}
