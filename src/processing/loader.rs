use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use image::{ImageFormat, ImageReader, RgbaImage, imageops};
use jpeg_decoder::{Decoder as JpegDecoder, PixelFormat};
use tracing::debug;

use crate::error::DisplayError;

/// Sources at least this many times larger than the target take the scaled JPEG path.
const SCALED_DECODE_FACTOR: u32 = 2;

/// Decodes a still image with EXIF orientation applied.
///
/// `target` is the size the image will be scaled to; large JPEGs are decoded at a
/// reduced scale that still covers it.
pub fn load_still(path: &Path, target: (u32, u32)) -> Result<RgbaImage, DisplayError> {
    decode_oriented(path, target).map_err(|err| DisplayError::media_load(path, err))
}

/// Pixel dimensions from the file header, without decoding.
pub fn image_dimensions(path: &Path) -> Option<(u32, u32)> {
    ImageReader::open(path)
        .ok()?
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn decode_oriented(path: &Path, target: (u32, u32)) -> Result<RgbaImage> {
    let reader = ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()
        .context("failed to sniff image format")?;
    let format = reader.format();

    let mut img = None;
    if matches!(format, Some(ImageFormat::Jpeg)) {
        // EXIF rotations may swap axes, so request a square covering both.
        let side = target.0.max(target.1).max(1);
        match decode_jpeg_scaled(path, side) {
            Ok(Some(scaled)) => img = Some(scaled),
            Ok(None) => {}
            Err(err) => debug!(
                path = %path.display(),
                "scaled JPEG decode failed, using full decode: {err:#}"
            ),
        }
    }
    let img = match img {
        Some(img) => img,
        None => reader
            .decode()
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgba8(),
    };

    Ok(apply_orientation(img, read_orientation(path).unwrap_or(1)))
}

fn apply_orientation(img: RgbaImage, orientation: u16) -> RgbaImage {
    match orientation {
        2 => imageops::flip_horizontal(&img),
        3 => imageops::rotate180(&img),
        4 => imageops::flip_vertical(&img),
        5 => imageops::flip_horizontal(&imageops::rotate90(&img)),
        6 => imageops::rotate90(&img),
        7 => imageops::flip_horizontal(&imageops::rotate270(&img)),
        8 => imageops::rotate270(&img),
        _ => img,
    }
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let orientation = field.value.get_uint(0)? as u16;
    debug!(path = %path.display(), orientation, "exif orientation");
    Some(orientation)
}

/// Returns `Ok(None)` when the source is not large enough to be worth a scaled decode.
fn decode_jpeg_scaled(path: &Path, side: u32) -> Result<Option<RgbaImage>> {
    use jpeg_decoder::Error as JpegError;

    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut decoder = JpegDecoder::new(BufReader::new(file));
    decoder.read_info().map_err(|err| anyhow!(err))?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("missing JPEG header in {}", path.display()))?;
    let smaller_side = u32::from(info.width.min(info.height));
    if smaller_side < side.saturating_mul(SCALED_DECODE_FACTOR) {
        return Ok(None);
    }

    let request = side.clamp(1, u32::from(u16::MAX)) as u16;
    decoder.scale(request, request).map_err(|err| match err {
        JpegError::Unsupported(feature) => anyhow!("unsupported JPEG feature: {feature:?}"),
        other => anyhow!(other),
    })?;
    let pixels = decoder.decode().map_err(|err| match err {
        JpegError::Unsupported(feature) => anyhow!("unsupported JPEG feature: {feature:?}"),
        other => anyhow!(other),
    })?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("missing image info while decoding {}", path.display()))?;

    let rgba = match info.pixel_format {
        PixelFormat::RGB24 => pixels
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 255])
            .collect(),
        PixelFormat::L8 => pixels.iter().flat_map(|&v| [v, v, v, 255]).collect(),
        PixelFormat::CMYK32 => pixels
            .chunks_exact(4)
            .flat_map(|px| {
                let k = f32::from(px[3]) / 255.0;
                let channel = |v: u8| {
                    let c = f32::from(v) / 255.0 * (1.0 - k) + k;
                    ((1.0 - c) * 255.0).round().clamp(0.0, 255.0) as u8
                };
                [channel(px[0]), channel(px[1]), channel(px[2]), 255]
            })
            .collect(),
        PixelFormat::L16 => anyhow::bail!("16-bit grayscale JPEGs use the full decoder"),
    };

    RgbaImage::from_raw(u32::from(info.width), u32::from(info.height), rgba)
        .map(Some)
        .ok_or_else(|| anyhow!("failed to construct RGBA image for {}", path.display()))
}
