//! # HeadlessDevice — A Recording Backend for Tests
//!
//! [`HeadlessDevice`] implements [`RenderDevice`] without touching any
//! graphics API. Every call is appended to a public log of [`DeviceCall`]
//! values, so a test can run the full batch protocol and then assert on
//! exactly what reached the "GPU": how many draws, with which textures, how
//! many indices, what bytes were uploaded.
//!
//! It is compiled into the library (not just test builds) because it's also
//! useful for benchmarks and for running engine logic in CI where no adapter
//! exists.

use super::device::{BufferId, DrawCommand, RenderDevice, RenderError, ShaderId, TextureId};
use crate::render2d::texture::Texture;

/// One recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateVertexBuffer { id: BufferId, capacity: u64 },
    CreateIndexBuffer { id: BufferId, indices: Vec<u16> },
    DestroyBuffer(BufferId),
    CreateShader(ShaderId),
    DestroyShader(ShaderId),
    UploadVertices { buffer: BufferId, data: Vec<u8> },
    DrawIndexed(DrawCommand),
    SetDepthWrite(bool),
}

/// A [`RenderDevice`] that records calls instead of executing them.
#[derive(Debug)]
pub struct HeadlessDevice {
    /// Every call made against this device, in order.
    pub calls: Vec<DeviceCall>,
    /// Flip to `false` to simulate a lost GPU context.
    pub alive: bool,
    next_buffer: u32,
    next_shader: u32,
    next_texture: u32,
    depth_write: bool,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            alive: true,
            next_buffer: 0,
            next_shader: 0,
            next_texture: 0,
            depth_write: true,
        }
    }

    /// Fabricate a texture handle with the given dimensions.
    pub fn texture(&mut self, width: u32, height: u32) -> Texture {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        Texture { id, width, height }
    }

    /// All recorded draw commands, in submission order.
    pub fn draws(&self) -> Vec<&DrawCommand> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::DrawIndexed(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    /// All recorded vertex uploads, in submission order.
    pub fn uploads(&self) -> Vec<&[u8]> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::UploadVertices { data, .. } => Some(data.as_slice()),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded draw calls.
    pub fn draw_count(&self) -> usize {
        self.draws().len()
    }

    /// The most recent vertex upload, reinterpreted as floats.
    pub fn last_upload_floats(&self) -> Vec<f32> {
        // pod_collect_to_vec copies, so byte-buffer alignment doesn't matter.
        self.uploads()
            .last()
            .map(|bytes| bytemuck::pod_collect_to_vec::<u8, f32>(bytes))
            .unwrap_or_default()
    }
}

/// Forwarding impl so a test can lend the device to a batch and inspect the
/// call log after the batch is dropped.
impl RenderDevice for &mut HeadlessDevice {
    fn create_vertex_buffer(&mut self, capacity: u64) -> BufferId {
        (**self).create_vertex_buffer(capacity)
    }

    fn create_index_buffer(&mut self, indices: &[u16]) -> BufferId {
        (**self).create_index_buffer(indices)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        (**self).destroy_buffer(buffer)
    }

    fn create_shader(&mut self, source: &str) -> Result<ShaderId, RenderError> {
        (**self).create_shader(source)
    }

    fn destroy_shader(&mut self, shader: ShaderId) {
        (**self).destroy_shader(shader)
    }

    fn upload_vertices(&mut self, buffer: BufferId, data: &[u8]) {
        (**self).upload_vertices(buffer, data)
    }

    fn draw_indexed(&mut self, cmd: &DrawCommand) {
        (**self).draw_indexed(cmd)
    }

    fn depth_write(&self) -> bool {
        (**self).depth_write()
    }

    fn set_depth_write(&mut self, enabled: bool) {
        (**self).set_depth_write(enabled)
    }

    fn context_alive(&self) -> bool {
        (**self).context_alive()
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderDevice for HeadlessDevice {
    fn create_vertex_buffer(&mut self, capacity: u64) -> BufferId {
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.calls.push(DeviceCall::CreateVertexBuffer { id, capacity });
        id
    }

    fn create_index_buffer(&mut self, indices: &[u16]) -> BufferId {
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.calls.push(DeviceCall::CreateIndexBuffer {
            id,
            indices: indices.to_vec(),
        });
        id
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.calls.push(DeviceCall::DestroyBuffer(buffer));
    }

    fn create_shader(&mut self, _source: &str) -> Result<ShaderId, RenderError> {
        let id = ShaderId(self.next_shader);
        self.next_shader += 1;
        self.calls.push(DeviceCall::CreateShader(id));
        Ok(id)
    }

    fn destroy_shader(&mut self, shader: ShaderId) {
        self.calls.push(DeviceCall::DestroyShader(shader));
    }

    fn upload_vertices(&mut self, buffer: BufferId, data: &[u8]) {
        self.calls.push(DeviceCall::UploadVertices {
            buffer,
            data: data.to_vec(),
        });
    }

    fn draw_indexed(&mut self, cmd: &DrawCommand) {
        self.calls.push(DeviceCall::DrawIndexed(*cmd));
    }

    fn depth_write(&self) -> bool {
        self.depth_write
    }

    fn set_depth_write(&mut self, enabled: bool) {
        self.depth_write = enabled;
        self.calls.push(DeviceCall::SetDepthWrite(enabled));
    }

    fn context_alive(&self) -> bool {
        self.alive
    }
}
