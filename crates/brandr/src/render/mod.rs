//! GPU abstraction: the device capability trait, the wgpu backend, the
//! recording headless backend, and wgpu context bring-up.

pub mod device;
pub mod gpu;
pub mod headless;
pub mod wgpu_device;

pub use device::{
    BlendFactor, BlendState, BufferId, DrawCommand, RenderDevice, RenderError, ShaderId, TextureId,
};
pub use gpu::GpuContext;
pub use headless::{DeviceCall, HeadlessDevice};
pub use wgpu_device::WgpuDevice;
