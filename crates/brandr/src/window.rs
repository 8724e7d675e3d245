//! Window management via winit.
//!
//! A thin host loop: create a window, bring up the GPU, hand the caller a
//! [`SpriteBatch`] once per frame, then present. Implements
//! [`winit::application::ApplicationHandler`] to drive the event loop.

use std::sync::Arc;

use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::window::{Window, WindowId};

use crate::render::gpu::GpuContext;
use crate::render::wgpu_device::WgpuDevice;
use crate::render2d::batch::{BatchError, SpriteBatch};

/// Window and renderer configuration for [`run`].
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Background color, linear RGBA.
    pub clear_color: [f64; 4],
    /// Sprite capacity of the batch handed to the frame callback.
    pub max_sprites: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: String::from("brandr"),
            width: 1280,
            height: 720,
            clear_color: [0.1, 0.1, 0.15, 1.0],
            max_sprites: 1000,
        }
    }
}

struct WinitApp<F> {
    config: WindowConfig,
    window: Option<Arc<Window>>,
    batch: Option<SpriteBatch<WgpuDevice>>,
    frame: F,
}

impl<F> ApplicationHandler for WinitApp<F>
where
    F: FnMut(&mut SpriteBatch<WgpuDevice>) -> Result<(), BatchError>,
{
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.config.width as f64,
                self.config.height as f64,
            ));
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .expect("Failed to create window"),
        );

        let gpu = match GpuContext::new(window.clone()) {
            Ok(gpu) => gpu,
            Err(e) => {
                log::error!("GPU initialization failed: {e}");
                event_loop.exit();
                return;
            }
        };
        let device = WgpuDevice::new(gpu);
        match SpriteBatch::with_capacity(device, self.config.max_sprites) {
            Ok(batch) => self.batch = Some(batch),
            Err(e) => {
                log::error!("Sprite batch creation failed: {e}");
                event_loop.exit();
                return;
            }
        }
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Window close requested, exiting.");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                if let Some(batch) = &mut self.batch {
                    batch.device_mut().resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                if let Some(batch) = &mut self.batch {
                    if let Err(e) = (self.frame)(batch) {
                        log::error!("frame callback failed: {e}");
                        event_loop.exit();
                        return;
                    }

                    match batch.device_mut().render_frame(self.config.clear_color) {
                        Ok(()) => {}
                        Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                            let (w, h) = batch.device().surface_size();
                            batch.device_mut().resize(w, h);
                        }
                        Err(wgpu::SurfaceError::OutOfMemory) => {
                            log::error!("Out of GPU memory!");
                            event_loop.exit();
                        }
                        Err(e) => {
                            log::warn!("Surface error: {:?}", e);
                        }
                    }
                }

                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }

            _ => {}
        }
    }
}

/// Open a window and call `frame` once per redraw with the live batch.
///
/// The callback is responsible for the `begin`/`draw`/`end` bracket; the loop
/// presents whatever the batch recorded afterwards.
pub fn run<F>(config: WindowConfig, frame: F) -> Result<(), winit::error::EventLoopError>
where
    F: FnMut(&mut SpriteBatch<WgpuDevice>) -> Result<(), BatchError>,
{
    let event_loop = EventLoop::new()?;
    let mut app = WinitApp {
        config,
        window: None,
        batch: None,
        frame,
    };
    event_loop.run_app(&mut app)
}
