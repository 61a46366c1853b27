use signage_display::config::{Configuration, Rotation, RotationMode};
use signage_display::platform::headless::{HeadlessBackend, HeadlessHandle};
use signage_display::render::context::RenderingContext;
use signage_display::render::pixels::Color;

const RED: Color = Color::from_rgb8([255, 0, 0]);

fn context(rotation: Rotation, mode: RotationMode) -> (RenderingContext, HeadlessHandle) {
    let mut config = Configuration::default();
    config.display.rotation = rotation;
    config.display.rotation_mode = mode;
    let (backend, handle) = HeadlessBackend::new(64, 48);
    (RenderingContext::with_text(Box::new(backend), &config, None), handle)
}

/// Paints the canvas's top-left pixel red and returns where it lands physically.
fn top_left_lands_at(rotation: Rotation) -> (u32, u32) {
    let (mut ctx, handle) = context(rotation, RotationMode::Software);
    let compositor = ctx.compositor_mut();
    compositor.clear(Color::BLACK);
    compositor.canvas_mut().set(0, 0, RED.pack());
    ctx.present().unwrap();

    let frame = handle.last_frame().expect("a presented frame");
    assert_eq!(frame.size(), (64, 48));
    let hits: Vec<(u32, u32)> = (0..48)
        .flat_map(|y| (0..64).map(move |x| (x, y)))
        .filter(|&(x, y)| frame.get(x, y) == Some(RED.pack()))
        .collect();
    assert_eq!(hits.len(), 1, "rotation {rotation:?}");
    hits[0]
}

#[test]
fn content_rotates_clockwise_onto_the_panel() {
    assert_eq!(top_left_lands_at(Rotation::Deg0), (0, 0));
    // A clockwise quarter turn takes the top-left corner to the top-right.
    assert_eq!(top_left_lands_at(Rotation::Deg90), (63, 0));
    assert_eq!(top_left_lands_at(Rotation::Deg180), (63, 47));
    assert_eq!(top_left_lands_at(Rotation::Deg270), (0, 47));
}

#[test]
fn portrait_canvas_matches_the_rotated_panel() {
    let (ctx, _handle) = context(Rotation::Deg90, RotationMode::Software);
    assert_eq!(ctx.physical_size(), (64, 48));
    assert_eq!(ctx.canvas_size(), (48, 64));

    let (ctx, _handle) = context(Rotation::Deg90, RotationMode::Hardware);
    assert_eq!(ctx.canvas_size(), (64, 48));
    assert!(ctx.compositor().canvas_is_physical());
}

#[test]
fn reconfigure_follows_reloaded_rotation() {
    let (mut ctx, handle) = context(Rotation::Deg0, RotationMode::Software);
    let mut config = Configuration::default();
    config.display.rotation = Rotation::Deg270;
    config.display.background_color = [0, 0, 255];
    ctx.reconfigure(&config);
    assert_eq!(ctx.canvas_size(), (48, 64));

    ctx.compositor_mut().begin_frame();
    ctx.present().unwrap();
    let frame = handle.last_frame().unwrap();
    assert_eq!(frame.get(32, 24), Some(Color::from_rgb8([0, 0, 255]).pack()));
}
