use anyhow::{Context, Result};
use fast_image_resize as fir;
use image::RgbaImage;

use super::layout::ScalePlan;
use crate::render::pixels::{Color, PixelBuffer};

/// Renders `source` onto a `dst_w × dst_h` canvas following `plan`.
pub fn render_scaled(
    source: &RgbaImage,
    plan: &ScalePlan,
    dst_w: u32,
    dst_h: u32,
    background: Color,
) -> Result<PixelBuffer> {
    let (scaled_w, scaled_h) = plan.scaled_size(dst_w, dst_h);
    let resized = match plan {
        ScalePlan::Fill { crop } => resize_rgba(
            source,
            Some((crop.x, crop.y, crop.width, crop.height)),
            scaled_w,
            scaled_h,
        )?,
        ScalePlan::Fit { .. } | ScalePlan::Stretch => {
            resize_rgba(source, None, scaled_w, scaled_h)?
        }
    };
    let content = PixelBuffer::from_rgba(&resized);
    if !plan.letterboxed(dst_w, dst_h) {
        return Ok(content);
    }
    let mut canvas = PixelBuffer::new(dst_w, dst_h, background);
    let (ox, oy) = plan.offset();
    canvas.blit(&content, ox as i32, oy as i32);
    Ok(canvas)
}

fn resize_rgba(
    source: &RgbaImage,
    crop: Option<(u32, u32, u32, u32)>,
    target_w: u32,
    target_h: u32,
) -> Result<RgbaImage> {
    if target_w == 0 || target_h == 0 {
        anyhow::bail!("resize dimensions must be positive");
    }
    let full_frame = crop.is_none_or(|(x, y, w, h)| {
        x == 0 && y == 0 && w == source.width() && h == source.height()
    });
    if full_frame && source.width() == target_w && source.height() == target_h {
        return Ok(source.clone());
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .context("failed to create source view for resize")?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let mut options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    if let Some((x, y, w, h)) = crop {
        options = options.crop(f64::from(x), f64::from(y), f64::from(w), f64::from(h));
    }
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .context("image resize failed")?;
    let buffer = dst_image.into_vec();
    RgbaImage::from_raw(target_w, target_h, buffer)
        .ok_or_else(|| anyhow::anyhow!("failed to construct resized RGBA image"))
}
