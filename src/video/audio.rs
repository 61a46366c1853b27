use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{debug, info};

use super::process::{ManagedChild, wait_with_deadline};
use crate::config::{AudioDevice, AudioSettings};
use crate::error::{DecodeStage, DisplayError};

/// How long a freshly started player must stay alive to count as started.
const STARTUP_CHECK: Duration = Duration::from_millis(300);

impl AudioDevice {
    /// ALSA PCM name handed to the player.
    pub fn alsa_name(self) -> &'static str {
        match self {
            Self::Hdmi => "hdmi",
            Self::Local => "default",
        }
    }
}

/// Soundtrack of the current video, played by `ffplay` without a window.
///
/// The player is stopped when this value is dropped.
#[derive(Debug)]
pub struct AudioPlayer {
    child: ManagedChild,
}

impl AudioPlayer {
    pub fn command(path: &Path, settings: &AudioSettings) -> Command {
        let mut cmd = Command::new("ffplay");
        cmd.args(["-nodisp", "-autoexit", "-loglevel", "error", "-volume"])
            .arg(settings.volume.to_string())
            .arg(path)
            // Device selection is scoped to the child; our own environment is untouched.
            .env("SDL_AUDIODRIVER", "alsa")
            .env("AUDIODEV", settings.device.alsa_name());
        cmd
    }

    /// Starts the player, or returns `Ok(None)` when audio is disabled.
    ///
    /// `startup_timeout` bounds the liveness check; a player that exits during it is
    /// reported as a failure and the video continues silently.
    pub fn start(
        path: &Path,
        settings: &AudioSettings,
        startup_timeout: Duration,
        grace: Duration,
    ) -> Result<Option<Self>, DisplayError> {
        if !settings.enabled {
            return Ok(None);
        }
        let mut child = Self::command(path, settings)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                let message = format!("failed to start ffplay: {err}");
                DisplayError::decode(path, DecodeStage::Spawn, message)
            })?;
        match wait_with_deadline(&mut child, STARTUP_CHECK.min(startup_timeout)) {
            Ok(None) => {}
            Ok(Some(status)) if status.success() => {
                debug!(path = %path.display(), "audio player finished immediately");
                return Ok(None);
            }
            Ok(Some(status)) => {
                return Err(DisplayError::decode(
                    path,
                    DecodeStage::Spawn,
                    format!("ffplay exited with {status}"),
                ));
            }
            Err(err) => {
                drop(ManagedChild::new(child, grace));
                return Err(DisplayError::decode(path, DecodeStage::Spawn, err.to_string()));
            }
        }
        info!(
            path = %path.display(),
            device = settings.device.alsa_name(),
            volume = settings.volume,
            "audio playback started"
        );
        Ok(Some(Self {
            child: ManagedChild::new(child, grace),
        }))
    }

    pub fn is_running(&mut self) -> bool {
        !self.child.has_exited()
    }
}
