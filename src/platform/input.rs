//! Keyboard input from evdev devices for outputs without a window system.

use std::fs;
use std::io;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use evdev::{Device, EventSummary, KeyCode};
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use tracing::{debug, info, warn};

use crate::events::InputEvent;

/// Maps a key press to its intent.
pub fn map_key(key: KeyCode) -> Option<InputEvent> {
    match key {
        KeyCode::KEY_ESC | KeyCode::KEY_Q => Some(InputEvent::Quit),
        KeyCode::KEY_SPACE => Some(InputEvent::Skip),
        KeyCode::KEY_R | KeyCode::KEY_ENTER | KeyCode::KEY_KPENTER => Some(InputEvent::Retry),
        _ => None,
    }
}

/// Every keyboard-like device found at startup, read without blocking.
pub struct KeyboardInput {
    devices: Vec<(Device, PathBuf)>,
}

impl std::fmt::Debug for KeyboardInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let paths: Vec<_> = self.devices.iter().map(|(_, p)| p).collect();
        f.debug_struct("KeyboardInput").field("devices", &paths).finish()
    }
}

impl KeyboardInput {
    /// Opens every `event*` device under `dir` that has a space bar.
    pub fn discover(dir: &Path) -> Option<Self> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %dir.display(), error = %err, "input directory unavailable");
                return None;
            }
        };
        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("event"))
            })
            .collect();
        paths.sort();

        let mut devices = Vec::new();
        for path in paths {
            match open_keyboard(&path) {
                Ok(Some(device)) => {
                    info!(
                        device = %path.display(),
                        name = device.name().unwrap_or("?"),
                        "keyboard attached"
                    );
                    devices.push((device, path));
                }
                Ok(None) => {}
                Err(err) => debug!(device = %path.display(), "{err:#}"),
            }
        }
        (!devices.is_empty()).then_some(Self { devices })
    }

    /// Drains pending key presses from every device.
    pub fn poll(&mut self) -> Vec<InputEvent> {
        let mut out = Vec::new();
        let mut lost = Vec::new();
        for (idx, (device, path)) in self.devices.iter_mut().enumerate() {
            match device.fetch_events() {
                Ok(events) => {
                    for event in events {
                        // value 1 = press; ignore release (0) and autorepeat (2).
                        if let EventSummary::Key(_, key, 1) = event.destructure()
                            && let Some(intent) = map_key(key)
                        {
                            out.push(intent);
                        }
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    warn!(device = %path.display(), error = %err, "input device lost");
                    lost.push(idx);
                }
            }
        }
        for idx in lost.into_iter().rev() {
            self.devices.remove(idx);
        }
        out
    }
}

fn open_keyboard(path: &Path) -> Result<Option<Device>> {
    let device = match Device::open(path) {
        Ok(device) => device,
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            warn!(device = %path.display(), "no permission to read device");
            return Ok(None);
        }
        Err(err) => return Err(err).with_context(|| format!("failed to open {}", path.display())),
    };
    let is_keyboard = device
        .supported_keys()
        .is_some_and(|keys| keys.contains(KeyCode::KEY_SPACE));
    if !is_keyboard {
        return Ok(None);
    }
    set_nonblocking(&device)
        .with_context(|| format!("failed to set {} non-blocking", path.display()))?;
    Ok(Some(device))
}

fn set_nonblocking(device: &Device) -> Result<()> {
    let current = fcntl(device.as_fd(), FcntlArg::F_GETFL).context("F_GETFL failed")?;
    let mut flags = OFlag::from_bits_retain(current);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(device.as_fd(), FcntlArg::F_SETFL(flags)).context("F_SETFL failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_mapping() {
        assert_eq!(map_key(KeyCode::KEY_ESC), Some(InputEvent::Quit));
        assert_eq!(map_key(KeyCode::KEY_Q), Some(InputEvent::Quit));
        assert_eq!(map_key(KeyCode::KEY_SPACE), Some(InputEvent::Skip));
        assert_eq!(map_key(KeyCode::KEY_R), Some(InputEvent::Retry));
        assert_eq!(map_key(KeyCode::KEY_A), None);
    }

    #[test]
    fn missing_directory_means_no_input() {
        assert!(KeyboardInput::discover(Path::new("/nonexistent/input")).is_none());
    }
}
