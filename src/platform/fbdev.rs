//! Framebuffer-device output (`/dev/fbN`), written with positioned writes.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use tracing::{debug, info};

use super::input::KeyboardInput;
use super::probe::ProbeRequest;
use super::{BackendKind, DisplayBackend};
use crate::events::InputEvent;
use crate::render::pixels::PixelBuffer;

/// Geometry reported by the framebuffer's sysfs node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FbGeometry {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    /// Bytes per scanline.
    pub stride: u32,
}

impl FbGeometry {
    /// Reads `virtual_size`, `bits_per_pixel` and `stride` under `sysfs_dir`.
    pub fn read(sysfs_dir: &Path) -> Result<Self> {
        let read = |name: &str| {
            fs::read_to_string(sysfs_dir.join(name))
                .with_context(|| format!("failed to read {}/{name}", sysfs_dir.display()))
        };
        let (width, height) = parse_pair(&read("virtual_size")?, ',')
            .context("malformed framebuffer virtual_size")?;
        let bits_per_pixel: u32 = read("bits_per_pixel")?
            .trim()
            .parse()
            .context("malformed framebuffer bits_per_pixel")?;
        let stride = match read("stride") {
            Ok(raw) => raw.trim().parse().context("malformed framebuffer stride")?,
            Err(_) => width * bits_per_pixel.div_ceil(8),
        };
        Ok(Self {
            width,
            height,
            bits_per_pixel,
            stride,
        })
    }
}

pub(crate) fn parse_pair(raw: &str, sep: char) -> Option<(u32, u32)> {
    let (w, h) = raw.trim().split_once(sep)?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().split(|c: char| !c.is_ascii_digit()).next()?.parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelLayout {
    Xrgb8888,
    Rgb565,
}

pub struct FbdevBackend {
    kind: BackendKind,
    device: File,
    device_path: PathBuf,
    geometry: FbGeometry,
    layout: PixelLayout,
    size: (u32, u32),
    scanline: Vec<u8>,
    input: Option<KeyboardInput>,
}

impl std::fmt::Debug for FbdevBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FbdevBackend")
            .field("kind", &self.kind)
            .field("device", &self.device_path)
            .field("geometry", &self.geometry)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl FbdevBackend {
    /// Opens the framebuffer of a DRM driver with a connected output.
    pub fn open_kms(request: &ProbeRequest) -> Result<Self> {
        let paths = &request.paths;
        ensure!(
            drm_connector_connected(&paths.sysfs_drm),
            "no connected DRM connector under {}",
            paths.sysfs_drm.display()
        );
        let sysfs = fb_sysfs_dir(&paths.sysfs_graphics, &paths.framebuffer_device);
        let name = fs::read_to_string(sysfs.join("name")).unwrap_or_default();
        ensure!(
            name.to_ascii_lowercase().contains("drm"),
            "{} is not a DRM framebuffer (driver {:?})",
            paths.framebuffer_device.display(),
            name.trim()
        );
        Self::open(BackendKind::Kms, request, request.size)
    }

    /// Opens the configured framebuffer device at the probed resolution.
    pub fn open_legacy(request: &ProbeRequest) -> Result<Self> {
        Self::open(BackendKind::Fbdev, request, request.size)
    }

    /// Opens the framebuffer at whatever geometry it reports.
    pub fn open_best_effort(request: &ProbeRequest) -> Result<Self> {
        let sysfs = fb_sysfs_dir(&request.paths.sysfs_graphics, &request.paths.framebuffer_device);
        let geometry = FbGeometry::read(&sysfs)?;
        Self::open(BackendKind::Auto, request, (geometry.width, geometry.height))
    }

    fn open(kind: BackendKind, request: &ProbeRequest, size: (u32, u32)) -> Result<Self> {
        let device_path = request.paths.framebuffer_device.clone();
        let sysfs = fb_sysfs_dir(&request.paths.sysfs_graphics, &device_path);
        let geometry = FbGeometry::read(&sysfs)?;
        let layout = match geometry.bits_per_pixel {
            32 => PixelLayout::Xrgb8888,
            16 => PixelLayout::Rgb565,
            other => bail!("unsupported framebuffer depth {other} bpp"),
        };
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&device_path)
            .with_context(|| format!("failed to open {}", device_path.display()))?;
        let input = KeyboardInput::discover(&request.paths.input_dir);
        if input.is_none() {
            debug!(dir = %request.paths.input_dir.display(), "no keyboard found; input disabled");
        }
        info!(
            backend = %kind,
            device = %device_path.display(),
            width = size.0,
            height = size.1,
            bpp = geometry.bits_per_pixel,
            "framebuffer output ready"
        );
        // A console cursor cannot be drawn on a raw framebuffer; `hide_cursor` is moot here.
        Ok(Self {
            kind,
            device,
            device_path,
            geometry,
            layout,
            size,
            scanline: Vec::with_capacity(geometry.stride as usize),
            input,
        })
    }
}

impl DisplayBackend for FbdevBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn present(&mut self, frame: &PixelBuffer) -> Result<()> {
        let cols = frame.width().min(self.geometry.width) as usize;
        let rows = frame.height().min(self.geometry.height);
        let stride = self.geometry.stride as u64;
        for y in 0..rows {
            let start = (y * frame.width()) as usize;
            let src = &frame.pixels()[start..start + cols];
            encode_scanline(self.layout, src, &mut self.scanline);
            self.device
                .write_all_at(&self.scanline, u64::from(y) * stride)
                .with_context(|| format!("failed to write {}", self.device_path.display()))?;
        }
        Ok(())
    }

    fn poll_input(&mut self) -> Vec<InputEvent> {
        self.input
            .as_mut()
            .map(KeyboardInput::poll)
            .unwrap_or_default()
    }
}

fn encode_scanline(layout: PixelLayout, src: &[u32], out: &mut Vec<u8>) {
    out.clear();
    match layout {
        // 0xFFRRGGBB little-endian is B,G,R,A in memory, the XRGB8888 byte order.
        PixelLayout::Xrgb8888 => out.extend_from_slice(bytemuck::cast_slice(src)),
        PixelLayout::Rgb565 => {
            for px in src {
                let r = (px >> 19) & 0x1F;
                let g = (px >> 10) & 0x3F;
                let b = (px >> 3) & 0x1F;
                let packed = ((r << 11) | (g << 5) | b) as u16;
                out.extend_from_slice(&packed.to_le_bytes());
            }
        }
    }
}

fn fb_sysfs_dir(sysfs_graphics: &Path, device: &Path) -> PathBuf {
    let name = device
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "fb0".into());
    sysfs_graphics.join(name)
}

/// Whether any `card*-*` connector under `sysfs_drm` reports `connected`.
pub fn drm_connector_connected(sysfs_drm: &Path) -> bool {
    let Ok(entries) = fs::read_dir(sysfs_drm) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        name.starts_with("card")
            && name.contains('-')
            && fs::read_to_string(entry.path().join("status"))
                .is_ok_and(|status| status.trim() == "connected")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::pixels::pack_rgb8;

    #[test]
    fn reads_sysfs_geometry() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("virtual_size"), "1920,1080\n").unwrap();
        fs::write(dir.path().join("bits_per_pixel"), "32\n").unwrap();
        fs::write(dir.path().join("stride"), "7680\n").unwrap();
        let geometry = FbGeometry::read(dir.path()).unwrap();
        assert_eq!(
            geometry,
            FbGeometry {
                width: 1920,
                height: 1080,
                bits_per_pixel: 32,
                stride: 7680
            }
        );
    }

    #[test]
    fn encodes_both_layouts() {
        let mut out = Vec::new();
        encode_scanline(PixelLayout::Xrgb8888, &[pack_rgb8(1, 2, 3)], &mut out);
        assert_eq!(out, vec![3, 2, 1, 0xFF]);
        encode_scanline(PixelLayout::Rgb565, &[pack_rgb8(255, 0, 0)], &mut out);
        assert_eq!(out, 0xF800u16.to_le_bytes().to_vec());
    }

    #[test]
    fn connector_status_is_read_from_sysfs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!drm_connector_connected(dir.path()));
        let connector = dir.path().join("card0-HDMI-A-1");
        fs::create_dir(&connector).unwrap();
        fs::write(connector.join("status"), "disconnected\n").unwrap();
        assert!(!drm_connector_connected(dir.path()));
        fs::write(connector.join("status"), "connected\n").unwrap();
        assert!(drm_connector_connected(dir.path()));
    }

    #[test]
    fn frame_is_written_row_by_row() {
        let dir = tempfile::tempdir().unwrap();
        let sysfs = dir.path().join("graphics");
        fs::create_dir_all(sysfs.join("fb0")).unwrap();
        fs::write(sysfs.join("fb0/virtual_size"), "2,2").unwrap();
        fs::write(sysfs.join("fb0/bits_per_pixel"), "32").unwrap();
        fs::write(sysfs.join("fb0/stride"), "8").unwrap();
        let device = dir.path().join("fb0");
        fs::write(&device, vec![0u8; 16]).unwrap();

        let mut request = ProbeRequest::for_tests((2, 2));
        request.paths.sysfs_graphics = sysfs;
        request.paths.framebuffer_device = device.clone();
        request.paths.input_dir = dir.path().join("no-input");
        let mut backend = FbdevBackend::open_legacy(&request).unwrap();
        let frame = PixelBuffer::from_pixels(2, 2, vec![pack_rgb8(9, 8, 7); 4]).unwrap();
        backend.present(&frame).unwrap();
        let written = fs::read(&device).unwrap();
        assert_eq!(&written[12..16], &[7, 8, 9, 0xFF]);
    }
}
