//! Rate-limited invocation of the external media-sync collaborator.

use std::fmt;
use std::io;
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::video::process::{ProcessError, run_with_timeout};

/// How long a failed sync stays on screen.
pub const ERROR_BANNER_DURATION: Duration = Duration::from_secs(30);
const STDERR_TAIL_CHARS: usize = 120;

/// Failure of one sync run; `Display` is the on-screen text.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("sync timed out after {}", humantime::format_duration(*.timeout))]
    TimedOut { timeout: Duration },
    #[error("sync failed ({status}): {stderr}")]
    Failed { status: String, stderr: String },
}

/// Fetches remote media into the media directory. Must be safe to call repeatedly.
pub trait MediaSyncProvider: Send + Sync {
    fn sync(&self) -> Result<(), SyncError>;
}

/// Runs a configured command line, e.g. `rclone sync remote: /srv/media`.
#[derive(Debug, Clone)]
pub struct CommandSyncProvider {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandSyncProvider {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

    /// `None` when no sync command is configured.
    pub fn from_settings(settings: &SyncSettings) -> Option<Self> {
        settings
            .command
            .clone()
            .filter(|argv| !argv.is_empty())
            .map(|argv| Self::new(argv, settings.timeout))
    }
}

impl MediaSyncProvider for CommandSyncProvider {
    fn sync(&self) -> Result<(), SyncError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(SyncError::Failed {
                status: "not run".into(),
                stderr: "empty sync command".into(),
            });
        };
        info!(program = %program, "running media sync");
        let output = run_with_timeout(Command::new(program).args(args), self.timeout).map_err(
            |err| match err {
                ProcessError::Spawn { program, source } => SyncError::Spawn { program, source },
                ProcessError::TimedOut { timeout, .. } => SyncError::TimedOut { timeout },
                ProcessError::Wait { source, .. } => SyncError::Failed {
                    status: "unknown".into(),
                    stderr: source.to_string(),
                },
            },
        )?;
        if output.status.success() {
            return Ok(());
        }
        let status = output
            .status
            .code()
            .map_or_else(|| "killed".to_string(), |code| format!("exit {code}"));
        Err(SyncError::Failed {
            status,
            stderr: stderr_tail(&output.stderr),
        })
    }
}

fn stderr_tail(stderr: &str) -> String {
    let line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no error output");
    let count = line.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return line.to_string();
    }
    let tail: String = line.chars().skip(count - STDERR_TAIL_CHARS).collect();
    format!("…{tail}")
}

pub type ProviderFactory =
    Box<dyn Fn() -> Result<Arc<dyn MediaSyncProvider>, SyncError> + Send + Sync>;

#[derive(Debug, Default)]
struct SyncState {
    last_attempt: Option<Instant>,
    last_success: Option<DateTime<Local>>,
    error: Option<(String, Instant)>,
    rescan_pending: bool,
    in_flight: bool,
    min_interval: Duration,
}

struct Inner {
    factory: Option<ProviderFactory>,
    provider: Mutex<Option<Arc<dyn MediaSyncProvider>>>,
    state: Mutex<SyncState>,
    runtime: Option<Handle>,
}

/// Shared handle; clones observe the same state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("configured", &self.is_configured())
            .field("background", &self.inner.runtime.is_some())
            .field("state", &*self.state())
            .finish()
    }
}

impl SyncCoordinator {
    /// `factory` builds the provider on first use; `None` disables syncing.
    pub fn new(factory: Option<ProviderFactory>, min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                provider: Mutex::new(None),
                state: Mutex::new(SyncState {
                    min_interval,
                    ..SyncState::default()
                }),
                runtime: None,
            }),
        }
    }

    pub fn from_settings(settings: &SyncSettings, runtime: Option<Handle>) -> Self {
        let factory = CommandSyncProvider::from_settings(settings).map(|provider| {
            Box::new(move || {
                Ok::<_, SyncError>(Arc::new(provider.clone()) as Arc<dyn MediaSyncProvider>)
            })
                as ProviderFactory
        });
        let coordinator = Self::new(factory, settings.min_interval());
        match runtime {
            Some(handle) => coordinator.with_runtime(handle),
            None => coordinator,
        }
    }

    /// Runs syncs on the runtime's blocking pool instead of the caller's thread.
    ///
    /// Must be called before the coordinator is cloned.
    pub fn with_runtime(self, handle: Handle) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.runtime = Some(handle);
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => {
                warn!("sync coordinator already shared; keeping foreground syncs");
                Self { inner }
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.factory.is_some()
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_min_interval(&self, min_interval: Duration) {
        self.state().min_interval = min_interval;
    }

    pub fn min_interval(&self) -> Duration {
        self.state().min_interval
    }

    /// Invokes the collaborator unless the last attempt is younger than the minimum
    /// interval. `force` skips that check. Returns whether a sync was started.
    pub fn maybe_sync(&self, force: bool) -> bool {
        if !self.claim(force) {
            return false;
        }
        let Some(provider) = self.provider() else {
            self.state().in_flight = false;
            return false;
        };
        match self.inner.runtime.as_ref() {
            Some(handle) => {
                let this = self.clone();
                handle.spawn_blocking(move || this.run(provider.as_ref()));
            }
            None => self.run(provider.as_ref()),
        }
        true
    }

    /// Runs the collaborator on the calling thread, ignoring the rate limit.
    pub fn sync_blocking(&self) -> Result<(), String> {
        if !self.claim(true) {
            return Err("sync unavailable".into());
        }
        let Some(provider) = self.provider() else {
            self.state().in_flight = false;
            return Err(self
                .active_error()
                .unwrap_or_else(|| "sync unavailable".into()));
        };
        self.run(provider.as_ref());
        match self.state().error.as_ref() {
            Some((message, _)) => Err(message.clone()),
            None => Ok(()),
        }
    }

    fn claim(&self, force: bool) -> bool {
        if !self.is_configured() {
            return false;
        }
        let mut state = self.state();
        if state.in_flight {
            debug!("sync already running");
            return false;
        }
        if !force
            && let Some(last) = state.last_attempt
            && last.elapsed() < state.min_interval
        {
            return false;
        }
        state.last_attempt = Some(Instant::now());
        state.in_flight = true;
        true
    }

    fn provider(&self) -> Option<Arc<dyn MediaSyncProvider>> {
        let factory = self.inner.factory.as_ref()?;
        let mut slot = self
            .inner
            .provider
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(provider) = slot.as_ref() {
            return Some(Arc::clone(provider));
        }
        match factory() {
            Ok(provider) => {
                *slot = Some(Arc::clone(&provider));
                Some(provider)
            }
            Err(err) => {
                warn!(error = %err, "cannot create sync provider");
                self.state().error = Some((err.to_string(), Instant::now()));
                None
            }
        }
    }

    fn run(&self, provider: &dyn MediaSyncProvider) {
        let started = Instant::now();
        let result = provider.sync();
        let mut state = self.state();
        // A failed run still consumes the window.
        state.last_attempt = Some(Instant::now());
        state.in_flight = false;
        match result {
            Ok(()) => {
                info!(elapsed = ?started.elapsed(), "media sync finished");
                state.last_success = Some(Local::now());
                state.rescan_pending = true;
                state.error = None;
            }
            Err(err) => {
                warn!(error = %err, "media sync failed");
                state.error = Some((err.to_string(), Instant::now()));
            }
        }
    }

    /// Returns and clears the "media changed" flag set by a successful sync.
    pub fn take_rescan(&self) -> bool {
        std::mem::take(&mut self.state().rescan_pending)
    }

    pub fn last_success(&self) -> Option<DateTime<Local>> {
        self.state().last_success
    }

    pub fn is_in_flight(&self) -> bool {
        self.state().in_flight
    }

    /// Banner text for a recent failure; expires after [`ERROR_BANNER_DURATION`].
    pub fn active_error(&self) -> Option<String> {
        self.active_error_at(Instant::now())
    }

    pub fn active_error_at(&self, now: Instant) -> Option<String> {
        let mut state = self.state();
        let expired = state
            .error
            .as_ref()
            .is_some_and(|(_, at)| now.saturating_duration_since(*at) >= ERROR_BANNER_DURATION);
        if expired {
            state.error = None;
        }
        state.error.as_ref().map(|(message, _)| message.clone())
    }
}
