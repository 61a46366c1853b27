//! Output backends and the platform facts used to pick one.

pub mod fbdev;
pub mod headless;
pub mod input;
pub mod probe;
pub mod wifi;
pub mod windowed;

use anyhow::Result;

use crate::events::InputEvent;
use crate::render::pixels::PixelBuffer;

/// A fullscreen output surface plus the keyboard attached to it.
pub trait DisplayBackend {
    fn kind(&self) -> BackendKind;

    /// Physical output size in pixels.
    fn size(&self) -> (u32, u32);

    /// Shows `frame`, which always has the backend's physical size.
    fn present(&mut self, frame: &PixelBuffer) -> Result<()>;

    /// Drains input received since the last call. Never blocks.
    fn poll_input(&mut self) -> Vec<InputEvent>;
}

impl std::fmt::Debug for dyn DisplayBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayBackend")
            .field("kind", &self.kind())
            .field("size", &self.size())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// DRM/KMS driver scanned out through its framebuffer node.
    Kms,
    /// Legacy framebuffer device.
    Fbdev,
    /// A window on a running X11 or Wayland session.
    Windowed,
    /// Best effort: any writable framebuffer at whatever geometry it reports.
    Auto,
    /// In-memory output for smoke runs and tests.
    Headless,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Kms => "kms",
            Self::Fbdev => "fbdev",
            Self::Windowed => "windowed",
            Self::Auto => "auto",
            Self::Headless => "headless",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
