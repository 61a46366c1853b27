// Small drawing helpers pass explicit geometry around to keep allocations out of the hot path.
#![allow(clippy::too_many_arguments)]

use image::RgbaImage;

use crate::config::Rotation;

/// Packed `0xFFRRGGBB` pixels, row-major with no padding.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl PixelBuffer {
    pub const BYTES_PER_PIXEL: usize = 4;

    pub fn new(width: u32, height: u32, fill: Color) -> Self {
        Self {
            width,
            height,
            pixels: vec![fill.pack(); (width as usize) * (height as usize)],
        }
    }

    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u32>) -> Option<Self> {
        ((width as usize) * (height as usize) == pixels.len()).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn from_rgba(image: &RgbaImage) -> Self {
        let pixels = image
            .pixels()
            .map(|p| pack_rgb8(p.0[0], p.0[1], p.0[2]))
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    pub fn bytes_per_pixel(&self) -> usize {
        Self::BYTES_PER_PIXEL
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len() * Self::BYTES_PER_PIXEL
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[(y * self.width + x) as usize])
    }

    pub fn set(&mut self, x: u32, y: u32, value: u32) {
        if x < self.width && y < self.height {
            self.pixels[(y * self.width + x) as usize] = value;
        }
    }

    pub fn fill(&mut self, color: Color) {
        self.pixels.fill(color.pack());
    }

    /// Copies `src` with its top-left corner at (`x`, `y`), clipped to this buffer.
    pub fn blit(&mut self, src: &PixelBuffer, x: i32, y: i32) {
        let Some(clip) = Clip::new(self.size(), src.size(), x, y) else {
            return;
        };
        for row in 0..clip.rows {
            let src_start = ((clip.src_y + row) * src.width + clip.src_x) as usize;
            let dst_start = ((clip.dst_y + row) * self.width + clip.dst_x) as usize;
            let len = clip.cols as usize;
            self.pixels[dst_start..dst_start + len]
                .copy_from_slice(&src.pixels[src_start..src_start + len]);
        }
    }

    /// Copies tightly packed RGB24 pixels, clipped to this buffer.
    pub fn blit_rgb24(&mut self, rgb: &[u8], width: u32, height: u32, x: i32, y: i32) {
        if rgb.len() < (width as usize) * (height as usize) * 3 {
            return;
        }
        let Some(clip) = Clip::new(self.size(), (width, height), x, y) else {
            return;
        };
        for row in 0..clip.rows {
            let src_row = ((clip.src_y + row) * width + clip.src_x) as usize * 3;
            let dst_row = ((clip.dst_y + row) * self.width + clip.dst_x) as usize;
            let src = &rgb[src_row..src_row + clip.cols as usize * 3];
            let dst = &mut self.pixels[dst_row..dst_row + clip.cols as usize];
            for (out, px) in dst.iter_mut().zip(src.chunks_exact(3)) {
                *out = pack_rgb8(px[0], px[1], px[2]);
            }
        }
    }

    /// Writes `src` rotated clockwise by `rotation`, placing the rotated image's
    /// top-left corner at (`x`, `y`). Out-of-bounds pixels are clipped.
    pub fn blit_rotated(&mut self, src: &PixelBuffer, rotation: Rotation, x: i32, y: i32) {
        let (rw, rh) = rotated_size(src.size(), rotation);
        let Some(clip) = Clip::new(self.size(), (rw, rh), x, y) else {
            return;
        };
        let (sw, sh) = (src.width, src.height);
        for row in 0..clip.rows {
            let ry = clip.src_y + row;
            let dst_row = ((clip.dst_y + row) * self.width + clip.dst_x) as usize;
            for col in 0..clip.cols {
                let rx = clip.src_x + col;
                let (sx, sy) = match rotation {
                    Rotation::Deg0 => (rx, ry),
                    Rotation::Deg90 => (ry, sh - 1 - rx),
                    Rotation::Deg180 => (sw - 1 - rx, sh - 1 - ry),
                    Rotation::Deg270 => (sw - 1 - ry, rx),
                };
                self.pixels[dst_row + col as usize] = src.pixels[(sy * sw + sx) as usize];
            }
        }
    }

    /// Returns a copy rotated clockwise by `rotation`.
    pub fn rotated(&self, rotation: Rotation) -> PixelBuffer {
        let (w, h) = rotated_size(self.size(), rotation);
        let mut out = PixelBuffer::new(w, h, Color::BLACK);
        out.blit_rotated(self, rotation, 0, 0);
        out
    }

    /// Alpha-blends `color` over the rectangle, clipped to this buffer.
    pub fn fill_rect(&mut self, left: i32, top: i32, width: u32, height: u32, color: Color) {
        let x0 = left.max(0) as u32;
        let y0 = top.max(0) as u32;
        let x1 = (i64::from(left) + i64::from(width)).clamp(0, i64::from(self.width)) as u32;
        let y1 = (i64::from(top) + i64::from(height)).clamp(0, i64::from(self.height)) as u32;
        if x0 >= x1 || y0 >= y1 {
            return;
        }
        if color.a >= 1.0 {
            let packed = color.pack();
            for y in y0..y1 {
                let start = (y * self.width) as usize;
                self.pixels[start + x0 as usize..start + x1 as usize].fill(packed);
            }
            return;
        }
        for y in y0..y1 {
            for x in x0..x1 {
                self.blend_pixel(x as i32, y as i32, color, color.a);
            }
        }
    }

    pub fn blend_pixel(&mut self, x: i32, y: i32, color: Color, coverage: f32) {
        if coverage <= 0.0 || x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let idx = (y as u32 * self.width + x as u32) as usize;
        let alpha = coverage.clamp(0.0, 1.0);
        let dst = unpack_color(self.pixels[idx]);
        self.pixels[idx] = pack_color(blend(color.rgb(), dst, alpha));
    }
}

/// Dimensions of a `(w, h)` image after a clockwise rotation.
pub fn rotated_size((w, h): (u32, u32), rotation: Rotation) -> (u32, u32) {
    if rotation.is_portrait() {
        (h, w)
    } else {
        (w, h)
    }
}

struct Clip {
    src_x: u32,
    src_y: u32,
    dst_x: u32,
    dst_y: u32,
    cols: u32,
    rows: u32,
}

impl Clip {
    fn new(dst: (u32, u32), src: (u32, u32), x: i32, y: i32) -> Option<Self> {
        let (x, y) = (i64::from(x), i64::from(y));
        let left = x.max(0);
        let top = y.max(0);
        let right = (x + i64::from(src.0)).min(i64::from(dst.0));
        let bottom = (y + i64::from(src.1)).min(i64::from(dst.1));
        if right <= left || bottom <= top {
            return None;
        }
        Some(Self {
            src_x: (left - x) as u32,
            src_y: (top - y) as u32,
            dst_x: left as u32,
            dst_y: top as u32,
            cols: (right - left) as u32,
            rows: (bottom - top) as u32,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color::from_rgb8([0, 0, 0]);
    pub const WHITE: Color = Color::from_rgb8([255, 255, 255]);

    pub const fn from_rgb8(rgb: [u8; 3]) -> Self {
        Self {
            r: rgb[0] as f32 / 255.0,
            g: rgb[1] as f32 / 255.0,
            b: rgb[2] as f32 / 255.0,
            a: 1.0,
        }
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.a = alpha.clamp(0.0, 1.0);
        self
    }

    pub fn rgb(self) -> (f32, f32, f32) {
        (self.r, self.g, self.b)
    }

    pub fn pack(self) -> u32 {
        pack_color(self.rgb())
    }
}

pub fn pack_rgb8(r: u8, g: u8, b: u8) -> u32 {
    0xFF00_0000 | (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

fn blend(src: (f32, f32, f32), dst: (f32, f32, f32), alpha: f32) -> (f32, f32, f32) {
    (
        src.0 * alpha + dst.0 * (1.0 - alpha),
        src.1 * alpha + dst.1 * (1.0 - alpha),
        src.2 * alpha + dst.2 * (1.0 - alpha),
    )
}

fn unpack_color(value: u32) -> (f32, f32, f32) {
    let r = ((value >> 16) & 0xFF) as f32 / 255.0;
    let g = ((value >> 8) & 0xFF) as f32 / 255.0;
    let b = (value & 0xFF) as f32 / 255.0;
    (r, g, b)
}

fn pack_color(color: (f32, f32, f32)) -> u32 {
    let r = (color.0.clamp(0.0, 1.0) * 255.0).round() as u32;
    let g = (color.1.clamp(0.0, 1.0) * 255.0).round() as u32;
    let b = (color.2.clamp(0.0, 1.0) * 255.0).round() as u32;
    0xFF00_0000 | (r << 16) | (g << 8) | b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(width: u32, height: u32) -> PixelBuffer {
        let pixels = (0..width * height).collect();
        PixelBuffer::from_pixels(width, height, pixels).unwrap()
    }

    #[test]
    fn blit_clips_negative_offsets() {
        let mut dst = PixelBuffer::new(4, 4, Color::BLACK);
        let src = PixelBuffer::new(3, 3, Color::WHITE);
        dst.blit(&src, -2, -1);
        let white = Color::WHITE.pack();
        assert_eq!(dst.get(0, 0), Some(white));
        assert_eq!(dst.get(0, 1), Some(white));
        assert_eq!(dst.get(1, 0), Some(Color::BLACK.pack()));
        assert_eq!(dst.get(0, 2), Some(Color::BLACK.pack()));
    }

    #[test]
    fn rotate_90_moves_top_left_to_top_right() {
        // 3 wide, 2 tall:
        // 0 1 2
        // 3 4 5
        let src = numbered(3, 2);
        let out = src.rotated(Rotation::Deg90);
        assert_eq!(out.size(), (2, 3));
        // clockwise:
        // 3 0
        // 4 1
        // 5 2
        assert_eq!(out.pixels(), &[3, 0, 4, 1, 5, 2]);
    }

    #[test]
    fn rotate_270_is_inverse_of_90() {
        let src = numbered(5, 3);
        let back = src.rotated(Rotation::Deg90).rotated(Rotation::Deg270);
        assert_eq!(back, src);
        let twice = src.rotated(Rotation::Deg180).rotated(Rotation::Deg180);
        assert_eq!(twice, src);
    }

    #[test]
    fn rgb24_blit_packs_channels() {
        let mut dst = PixelBuffer::new(2, 1, Color::BLACK);
        dst.blit_rgb24(&[10, 20, 30, 40, 50, 60], 2, 1, 0, 0);
        assert_eq!(dst.get(0, 0), Some(pack_rgb8(10, 20, 30)));
        assert_eq!(dst.get(1, 0), Some(pack_rgb8(40, 50, 60)));
    }

    #[test]
    fn translucent_fill_blends() {
        let mut dst = PixelBuffer::new(1, 1, Color::WHITE);
        dst.fill_rect(0, 0, 1, 1, Color::BLACK.with_alpha(0.5));
        let value = dst.get(0, 0).unwrap();
        let red = (value >> 16) & 0xFF;
        assert!((127..=128).contains(&red), "red={red}");
    }
}
