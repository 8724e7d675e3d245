//! # Brandr — Batched 2D Sprite Rendering
//!
//! A small engine core built around one job: turning thousands of per-frame
//! quad draw requests into a handful of GPU draw calls. The public surface is
//! the [`SpriteBatch`](render2d::SpriteBatch) — `begin`, a family of `draw`
//! methods, `end` — over an injected [`RenderDevice`](render::RenderDevice)
//! capability.
//!
//! Two device backends ship with the crate: [`WgpuDevice`](render::WgpuDevice)
//! for real rendering through wgpu, and [`HeadlessDevice`](render::HeadlessDevice),
//! which records every GPU call for tests and CI. The [`window`] module
//! provides a minimal winit host loop for getting pixels on screen quickly.
//!
//! Start with `use brandr::prelude::*` and see `examples/sprites.rs`.

pub mod color;
pub mod math;
pub mod prelude;
pub mod render;
pub mod render2d;
pub mod window;
