//! Owns the output buffers and applies software rotation on present.
//!
//! Everything upstream draws into the *canvas*, an upright buffer in content
//! coordinates. With software rotation at 90/180/270 degrees the canvas is a separate
//! virtual buffer that `compose` rotates onto the physical one; otherwise the canvas is
//! the physical buffer itself.

use anyhow::Result;

use crate::config::{Rotation, RotationConfig};
use crate::platform::DisplayBackend;
use crate::processing::layout::center_offset;
use crate::render::pixels::{Color, PixelBuffer, rotated_size};

#[derive(Debug)]
enum Canvas {
    /// Drawing goes straight to the physical buffer.
    Physical,
    Virtual(PixelBuffer),
}

#[derive(Debug)]
pub struct SurfaceCompositor {
    physical: PixelBuffer,
    canvas: Canvas,
    rotation: Rotation,
    background: Color,
}

impl SurfaceCompositor {
    pub fn new(physical_size: (u32, u32), rotation: RotationConfig, background: Color) -> Self {
        let physical = PixelBuffer::new(physical_size.0, physical_size.1, background);
        let rotation = rotation.software_rotation();
        let canvas = Self::canvas_for(physical_size, rotation, background);
        Self {
            physical,
            canvas,
            rotation,
            background,
        }
    }

    fn canvas_for(physical: (u32, u32), rotation: Rotation, background: Color) -> Canvas {
        if rotation == Rotation::Deg0 {
            return Canvas::Physical;
        }
        // Rotating the canvas clockwise by `rotation` must land on the physical size.
        let (w, h) = rotated_size(physical, rotation);
        Canvas::Virtual(PixelBuffer::new(w, h, background))
    }

    /// Rebuilds the canvas after a rotation or background change.
    pub fn reconfigure(&mut self, rotation: RotationConfig, background: Color) {
        let rotation = rotation.software_rotation();
        if rotation == self.rotation && background == self.background {
            return;
        }
        self.rotation = rotation;
        self.background = background;
        self.canvas = Self::canvas_for(self.physical.size(), rotation, background);
        self.physical.fill(background);
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn background(&self) -> Color {
        self.background
    }

    /// Size of the drawing surface in content coordinates.
    pub fn canvas_size(&self) -> (u32, u32) {
        self.canvas().size()
    }

    pub fn physical_size(&self) -> (u32, u32) {
        self.physical.size()
    }

    pub fn canvas(&self) -> &PixelBuffer {
        match &self.canvas {
            Canvas::Physical => &self.physical,
            Canvas::Virtual(buffer) => buffer,
        }
    }

    pub fn canvas_mut(&mut self) -> &mut PixelBuffer {
        match &mut self.canvas {
            Canvas::Physical => &mut self.physical,
            Canvas::Virtual(buffer) => buffer,
        }
    }

    pub fn physical(&self) -> &PixelBuffer {
        &self.physical
    }

    /// True when drawing targets the physical buffer directly.
    pub fn canvas_is_physical(&self) -> bool {
        std::ptr::eq(self.canvas(), &self.physical)
    }

    /// Clears the canvas to the background color.
    pub fn begin_frame(&mut self) {
        let background = self.background;
        self.canvas_mut().fill(background);
    }

    /// Clears the canvas to `color`, e.g. black while asleep.
    pub fn clear(&mut self, color: Color) {
        self.canvas_mut().fill(color);
    }

    pub fn draw_image_buffer(&mut self, buffer: &PixelBuffer, x: i32, y: i32) {
        self.canvas_mut().blit(buffer, x, y);
    }

    /// Copies an RGB24 video frame onto the canvas.
    pub fn draw_rgb24(&mut self, rgb: &[u8], width: u32, height: u32, x: i32, y: i32) {
        self.canvas_mut().blit_rgb24(rgb, width, height, x, y);
    }

    /// Runs `draw` against the canvas; overlays and message screens render through this.
    pub fn draw_overlay_region<F>(&mut self, draw: F)
    where
        F: FnOnce(&mut PixelBuffer),
    {
        draw(self.canvas_mut());
    }

    /// Writes the canvas into the physical buffer with the configured rotation.
    pub fn compose(&mut self) {
        let Canvas::Virtual(canvas) = &self.canvas else {
            return;
        };
        self.physical.fill(self.background);
        match self.rotation {
            Rotation::Deg0 => {}
            Rotation::Deg90 | Rotation::Deg270 => {
                let (rw, rh) = rotated_size(canvas.size(), self.rotation);
                let (pw, ph) = self.physical.size();
                let (ox, oy) = center_offset(rw, rh, pw, ph);
                self.physical
                    .blit_rotated(canvas, self.rotation, ox as i32, oy as i32);
            }
            Rotation::Deg180 => {
                self.physical.blit_rotated(canvas, Rotation::Deg180, 0, 0);
            }
        }
    }

    /// Composes and hands the physical buffer to the backend.
    pub fn present(&mut self, backend: &mut dyn DisplayBackend) -> Result<()> {
        self.compose();
        backend.present(&self.physical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RotationMode;

    fn software(degrees: Rotation) -> RotationConfig {
        RotationConfig {
            degrees,
            mode: RotationMode::Software,
        }
    }

    fn paint_numbers(compositor: &mut SurfaceCompositor) {
        let canvas = compositor.canvas_mut();
        let (w, h) = canvas.size();
        for y in 0..h {
            for x in 0..w {
                canvas.set(x, y, y * w + x);
            }
        }
    }

    #[test]
    fn unrotated_and_hardware_modes_alias_physical() {
        let compositor = SurfaceCompositor::new((8, 4), software(Rotation::Deg0), Color::BLACK);
        assert!(compositor.canvas_is_physical());
        let hardware = RotationConfig {
            degrees: Rotation::Deg90,
            mode: RotationMode::Hardware,
        };
        let compositor = SurfaceCompositor::new((8, 4), hardware, Color::BLACK);
        assert!(compositor.canvas_is_physical());
        assert_eq!(compositor.canvas_size(), (8, 4));
    }

    #[test]
    fn portrait_canvas_is_transposed() {
        let compositor = SurfaceCompositor::new((8, 4), software(Rotation::Deg270), Color::BLACK);
        assert!(!compositor.canvas_is_physical());
        assert_eq!(compositor.canvas_size(), (4, 8));
    }

    #[test]
    fn upside_down_uses_separate_same_size_canvas() {
        let compositor = SurfaceCompositor::new((8, 4), software(Rotation::Deg180), Color::BLACK);
        assert!(!compositor.canvas_is_physical());
        assert_eq!(compositor.canvas_size(), (8, 4));
    }

    #[test]
    fn compose_matches_rotated_canvas() {
        for rotation in [Rotation::Deg90, Rotation::Deg180, Rotation::Deg270] {
            let mut compositor = SurfaceCompositor::new((6, 4), software(rotation), Color::BLACK);
            paint_numbers(&mut compositor);
            let expected = compositor.canvas().rotated(rotation);
            compositor.compose();
            assert_eq!(compositor.physical(), &expected, "rotation {rotation:?}");
        }
    }

    #[test]
    fn reconfigure_switches_canvas() {
        let mut compositor = SurfaceCompositor::new((6, 4), software(Rotation::Deg0), Color::BLACK);
        compositor.reconfigure(software(Rotation::Deg90), Color::WHITE);
        assert_eq!(compositor.canvas_size(), (4, 6));
        assert_eq!(compositor.canvas().get(0, 0), Some(Color::WHITE.pack()));
    }
}
