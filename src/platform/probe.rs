//! Output backend selection.
//!
//! Probing walks an ordered list of `(kind, init)` candidates. Every attempt gets a
//! fresh copy of the same [`ProbeRequest`]; nothing is written to the process
//! environment, and a failed attempt's resources are dropped before the next one runs.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use super::fbdev::{FbdevBackend, parse_pair};
use super::headless::HeadlessBackend;
use super::windowed::WindowedBackend;
use super::{BackendKind, DisplayBackend};
use crate::config::{BackendPreference, Configuration, SystemPaths};
use crate::error::DisplayError;

pub const FALLBACK_RESOLUTION: (u32, u32) = (1920, 1080);

/// Everything an initialiser needs; candidates never see shared mutable state.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    /// Physical resolution to open the output at.
    pub size: (u32, u32),
    pub hide_cursor: bool,
    pub paths: SystemPaths,
}

impl ProbeRequest {
    pub fn from_config(config: &Configuration) -> Self {
        let paths = config.system.paths.clone();
        let size = match config.display.resolution {
            Some([w, h]) => (w, h),
            None => detect_resolution(&paths),
        };
        Self {
            size,
            hide_cursor: config.display.hide_cursor,
            paths,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(size: (u32, u32)) -> Self {
        Self {
            size,
            hide_cursor: true,
            paths: SystemPaths::default(),
        }
    }
}

pub type InitFn = Box<dyn Fn(&ProbeRequest) -> anyhow::Result<Box<dyn DisplayBackend>>>;

pub struct Candidate {
    pub kind: BackendKind,
    pub init: InitFn,
}

impl Candidate {
    pub fn new<F>(kind: BackendKind, init: F) -> Self
    where
        F: Fn(&ProbeRequest) -> anyhow::Result<Box<dyn DisplayBackend>> + 'static,
    {
        Self {
            kind,
            init: Box::new(init),
        }
    }

    /// The real initialiser for `kind`.
    pub fn builtin(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Kms => Self::new(kind, |req| {
                Ok(Box::new(FbdevBackend::open_kms(req)?) as Box<dyn DisplayBackend>)
            }),
            BackendKind::Fbdev => Self::new(kind, |req| {
                Ok(Box::new(FbdevBackend::open_legacy(req)?) as Box<dyn DisplayBackend>)
            }),
            BackendKind::Windowed => Self::new(kind, |req| {
                Ok(Box::new(WindowedBackend::open(req)?) as Box<dyn DisplayBackend>)
            }),
            BackendKind::Auto => Self::new(kind, |req| {
                Ok(Box::new(FbdevBackend::open_best_effort(req)?) as Box<dyn DisplayBackend>)
            }),
            BackendKind::Headless => Self::new(kind, |req| {
                let (backend, _handle) = HeadlessBackend::new(req.size.0, req.size.1);
                Ok(Box::new(backend) as Box<dyn DisplayBackend>)
            }),
        }
    }
}

/// Priority order for `preference`; `Auto` is always the last resort.
pub fn candidate_order(preference: BackendPreference, windowing_session: bool) -> Vec<BackendKind> {
    match preference {
        BackendPreference::Auto if windowing_session => vec![
            BackendKind::Windowed,
            BackendKind::Kms,
            BackendKind::Fbdev,
            BackendKind::Auto,
        ],
        BackendPreference::Auto => vec![
            BackendKind::Kms,
            BackendKind::Fbdev,
            BackendKind::Windowed,
            BackendKind::Auto,
        ],
        BackendPreference::Kms => vec![BackendKind::Kms, BackendKind::Auto],
        BackendPreference::Fbdev => vec![BackendKind::Fbdev, BackendKind::Auto],
        BackendPreference::Windowed => vec![BackendKind::Windowed, BackendKind::Auto],
        BackendPreference::Headless => vec![BackendKind::Headless],
    }
}

/// A successfully opened output.
pub struct Probed {
    pub backend: Box<dyn DisplayBackend>,
    pub size: (u32, u32),
}

impl std::fmt::Debug for Probed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probed")
            .field("backend", &self.backend.kind())
            .field("size", &self.size)
            .finish()
    }
}

/// Returns the first candidate that initialises.
pub fn probe_with(
    candidates: &[Candidate],
    request: &ProbeRequest,
) -> Result<Probed, DisplayError> {
    let mut tried = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        tried.push(candidate.kind.name().to_string());
        let attempt = request.clone();
        info!(
            backend = %candidate.kind,
            width = attempt.size.0,
            height = attempt.size.1,
            "trying display backend"
        );
        match (candidate.init)(&attempt) {
            Ok(backend) => {
                let size = backend.size();
                info!(
                    backend = %candidate.kind,
                    width = size.0,
                    height = size.1,
                    "display backend initialised"
                );
                return Ok(Probed { backend, size });
            }
            Err(err) => warn!(backend = %candidate.kind, "backend unavailable: {err:#}"),
        }
    }
    Err(DisplayError::BackendInit { tried })
}

/// Probes the platform using the configured preference.
pub fn probe(config: &Configuration) -> Result<Probed, DisplayError> {
    let request = ProbeRequest::from_config(config);
    let windowing = windowing_session_detected(&request.paths);
    if windowing {
        info!("window system detected; trying windowed output first");
    }
    let candidates: Vec<Candidate> = candidate_order(config.display.backend, windowing)
        .into_iter()
        .map(Candidate::builtin)
        .collect();
    probe_with(&candidates, &request)
}

/// X11 sockets in the socket dir, or a Wayland/X11 display named in the environment.
pub fn windowing_session_detected(paths: &SystemPaths) -> bool {
    if x11_socket_present(&paths.x11_socket_dir) {
        return true;
    }
    ["WAYLAND_DISPLAY", "DISPLAY"]
        .iter()
        .any(|var| std::env::var_os(var).is_some_and(|v| !v.is_empty()))
}

fn x11_socket_present(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        name.strip_prefix('X')
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    })
}

/// Framebuffer geometry, then the first DRM HDMI mode, then 1920×1080.
pub fn detect_resolution(paths: &SystemPaths) -> (u32, u32) {
    let fb_name = paths
        .framebuffer_device
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "fb0".into());
    let virtual_size = paths.sysfs_graphics.join(fb_name).join("virtual_size");
    if let Some(size) = fs::read_to_string(&virtual_size)
        .ok()
        .and_then(|raw| parse_pair(&raw, ','))
    {
        info!(width = size.0, height = size.1, "resolution from framebuffer");
        return size;
    }
    if let Some(size) = drm_hdmi_mode(&paths.sysfs_drm) {
        info!(width = size.0, height = size.1, "resolution from DRM connector");
        return size;
    }
    warn!(
        width = FALLBACK_RESOLUTION.0,
        height = FALLBACK_RESOLUTION.1,
        "resolution undiscoverable; using fallback"
    );
    FALLBACK_RESOLUTION
}

fn drm_hdmi_mode(sysfs_drm: &Path) -> Option<(u32, u32)> {
    let mut connectors: Vec<_> = fs::read_dir(sysfs_drm)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("card") && n.contains("-HDMI-"))
        })
        .collect();
    connectors.sort();
    for file in ["modes", "mode"] {
        for connector in &connectors {
            let Ok(content) = fs::read_to_string(connector.join(file)) else {
                continue;
            };
            if let Some(size) = content.lines().find_map(|line| parse_pair(line, 'x')) {
                return Some(size);
            }
        }
    }
    None
}
