//! Draws a handful of sprites through the real wgpu backend: a plain quad, a
//! tinted spinning quad, and a sub-region of a generated checkerboard.

use brandr::prelude::*;

/// Build an 8×8 black/white checkerboard, RGBA8.
fn checkerboard() -> Vec<u8> {
    let mut pixels = Vec::with_capacity(8 * 8 * 4);
    for y in 0..8u32 {
        for x in 0..8u32 {
            let on = (x + y) % 2 == 0;
            let v = if on { 255 } else { 40 };
            pixels.extend_from_slice(&[v, v, v, 255]);
        }
    }
    pixels
}

fn main() -> Result<(), winit::error::EventLoopError> {
    env_logger::init();

    let mut texture: Option<Texture> = None;
    let mut angle = 0.0f32;

    run(
        WindowConfig {
            title: String::from("brandr sprites"),
            ..Default::default()
        },
        move |batch| {
            let tex = *texture.get_or_insert_with(|| {
                batch
                    .device_mut()
                    .create_texture_rgba8("checker", 8, 8, &checkerboard())
            });
            let region = TextureRegion::from_pixels(tex, 0.0, 0.0, 4.0, 4.0);

            let (w, h) = batch.device().surface_size();
            batch.set_projection_matrix(Mat4::orthographic_rh(
                0.0, w as f32, 0.0, h as f32, -1.0, 1.0,
            ));

            angle = (angle + 1.0) % 360.0;

            batch.begin()?;

            batch.set_color(Color::WHITE);
            batch.draw_sized(&tex, 40.0, 40.0, 96.0, 96.0)?;

            batch.set_color(Color::new(1.0, 0.5, 0.2, 1.0));
            batch.draw_transformed(
                &tex,
                220.0,
                40.0,
                96.0,
                96.0,
                &DrawParams {
                    origin: Vec2::splat(48.0),
                    rotation: angle,
                    ..Default::default()
                },
            )?;

            batch.set_color(Color::new(0.4, 0.8, 1.0, 0.8));
            batch.draw_region(&region, 400.0, 40.0, 96.0, 96.0)?;

            batch.end()?;
            Ok(())
        },
    )
}
