//! The one rendering handle built at startup and lent to every drawing step.

use anyhow::Result;
use tracing::{info, warn};

use super::compositor::SurfaceCompositor;
use super::pixels::{Color, PixelBuffer};
use super::text::TextRenderer;
use crate::config::Configuration;
use crate::events::InputEvent;
use crate::platform::{BackendKind, DisplayBackend};

/// One centred line of a full-screen message.
#[derive(Debug, Clone)]
pub struct MessageLine {
    pub text: String,
    pub size: f32,
    pub color: Color,
}

impl MessageLine {
    pub fn new(text: impl Into<String>, size: f32, color: Color) -> Self {
        Self {
            text: text.into(),
            size,
            color,
        }
    }
}

pub struct RenderingContext {
    backend: Box<dyn DisplayBackend>,
    compositor: SurfaceCompositor,
    text: Option<TextRenderer>,
}

impl std::fmt::Debug for RenderingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderingContext")
            .field("backend", &self.backend.kind())
            .field("compositor", &self.compositor)
            .field("has_text", &self.text.is_some())
            .finish()
    }
}

impl RenderingContext {
    /// Builds the context around an initialised backend, loading a system font.
    ///
    /// Without a usable font the display still works; only text is skipped.
    pub fn new(backend: Box<dyn DisplayBackend>, config: &Configuration) -> Self {
        let text = match TextRenderer::from_system() {
            Ok(text) => Some(text),
            Err(err) => {
                warn!("text rendering disabled: {err:#}");
                None
            }
        };
        Self::with_text(backend, config, text)
    }

    pub fn with_text(
        backend: Box<dyn DisplayBackend>,
        config: &Configuration,
        text: Option<TextRenderer>,
    ) -> Self {
        let compositor = SurfaceCompositor::new(
            backend.size(),
            config.rotation(),
            Color::from_rgb8(config.display.background_color),
        );
        info!(
            backend = %backend.kind(),
            physical = ?compositor.physical_size(),
            canvas = ?compositor.canvas_size(),
            rotation = compositor.rotation().degrees(),
            "rendering context ready"
        );
        Self {
            backend,
            compositor,
            text,
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn physical_size(&self) -> (u32, u32) {
        self.compositor.physical_size()
    }

    /// Size of the upright drawing surface.
    pub fn canvas_size(&self) -> (u32, u32) {
        self.compositor.canvas_size()
    }

    pub fn compositor(&self) -> &SurfaceCompositor {
        &self.compositor
    }

    pub fn compositor_mut(&mut self) -> &mut SurfaceCompositor {
        &mut self.compositor
    }

    pub fn text(&self) -> Option<&TextRenderer> {
        self.text.as_ref()
    }

    /// Lends the canvas and text renderer to `draw` at the same time.
    pub fn draw_with_text<F>(&mut self, draw: F)
    where
        F: FnOnce(&mut PixelBuffer, Option<&TextRenderer>),
    {
        let text = self.text.as_ref();
        self.compositor.draw_overlay_region(|canvas| draw(canvas, text));
    }

    pub fn poll_input(&mut self) -> Vec<InputEvent> {
        self.backend.poll_input()
    }

    pub fn present(&mut self) -> Result<()> {
        self.compositor.present(self.backend.as_mut())
    }

    /// Applies a reloaded configuration's rotation and background.
    pub fn reconfigure(&mut self, config: &Configuration) {
        self.compositor.reconfigure(
            config.rotation(),
            Color::from_rgb8(config.display.background_color),
        );
    }

    /// Fills the canvas and draws `lines` as a vertically centred block.
    pub fn draw_message_screen(&mut self, background: Color, lines: &[MessageLine]) {
        self.compositor.clear(background);
        let Some(text) = self.text.as_ref() else {
            return;
        };
        self.compositor.draw_overlay_region(|canvas| {
            let heights: Vec<f32> = lines
                .iter()
                .map(|line| text.line_height(line.size) * 1.5)
                .collect();
            let total: f32 = heights.iter().sum();
            let mut top = (canvas.height() as f32 - total) / 2.0;
            for (line, height) in lines.iter().zip(heights) {
                let baseline = top + (height - text.line_height(line.size)) / 2.0
                    + text.ascent(line.size);
                text.draw_centered(canvas, &line.text, baseline, line.size, line.color);
                top += height;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Rotation, RotationMode};
    use crate::platform::headless::HeadlessBackend;

    #[test]
    fn presents_through_the_backend() {
        let (backend, handle) = HeadlessBackend::new(8, 4);
        let mut config = Configuration::default();
        config.display.rotation = Rotation::Deg90;
        config.display.rotation_mode = RotationMode::Software;
        config.display.background_color = [0, 0, 255];
        let mut ctx = RenderingContext::with_text(Box::new(backend), &config, None);
        assert_eq!(ctx.canvas_size(), (4, 8));

        ctx.draw_message_screen(Color::WHITE, &[MessageLine::new("x", 12.0, Color::BLACK)]);
        ctx.present().unwrap();
        assert_eq!(handle.presented(), 1);
        let frame = handle.last_frame().unwrap();
        assert!(frame.pixels().iter().all(|&px| px == Color::WHITE.pack()));

        config.display.rotation = Rotation::Deg0;
        ctx.reconfigure(&config);
        assert_eq!(ctx.canvas_size(), (8, 4));
        assert!(ctx.compositor().canvas_is_physical());
    }
}
