use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use crossbeam_channel::Sender;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use signage_display::config::{BackendPreference, ConfigProvider, FileConfig};
use signage_display::error::DisplayError;
use signage_display::events::ControlCommand;
use signage_display::platform::DisplayBackend;
use signage_display::platform::headless::HeadlessBackend;
use signage_display::platform::probe::{ProbeRequest, probe};
use signage_display::playback::{PlaybackLoop, PlaybackOptions};
use signage_display::render::context::RenderingContext;
use signage_display::sync::{CommandSyncProvider, MediaSyncProvider, SyncCoordinator};

#[derive(Debug, Parser)]
#[command(
    name = "signage-display",
    version,
    about = "Unattended HDMI signage player"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Play media from this directory instead of the configured one
    #[arg(long = "media-dir", value_name = "DIR")]
    media_dir: Option<PathBuf>,
    /// Force a display backend: auto, kms, fbdev, windowed or headless
    #[arg(long, value_name = "BACKEND", value_parser = parse_backend)]
    backend: Option<BackendPreference>,
    /// Run on the in-memory backend for N ticks and exit
    #[arg(long = "headless-ticks", value_name = "TICKS")]
    headless_ticks: Option<u64>,
    /// Run the configured sync command once and exit
    #[arg(long = "sync-only")]
    sync_only: bool,
    /// Do not sync before the first display
    #[arg(long = "skip-initial-sync")]
    skip_initial_sync: bool,
}

fn parse_backend(raw: &str) -> Result<BackendPreference, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(BackendPreference::Auto),
        "kms" | "drm" => Ok(BackendPreference::Kms),
        "fbdev" | "fb" => Ok(BackendPreference::Fbdev),
        "windowed" | "x11" | "wayland" => Ok(BackendPreference::Windowed),
        "headless" => Ok(BackendPreference::Headless),
        other => Err(format!("unknown backend '{other}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // init tracing (RUST_LOG controls level, default = info)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let Args {
        config,
        media_dir,
        backend,
        headless_ticks,
        sync_only,
        skip_initial_sync,
    } = Args::parse();

    let provider = Arc::new(FileConfig::load(&config, media_dir)?);
    let cfg = provider.current();
    tracing::info!(
        "Loaded configuration from {}:\n{:#?}",
        config.display(),
        cfg
    );

    if sync_only {
        let sync = CommandSyncProvider::from_settings(&cfg.sync)
            .ok_or_else(|| anyhow!("--sync-only requires sync.command in the configuration"))?;
        sync.sync().context("sync failed")?;
        tracing::info!("sync finished");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let (control_tx, control_rx) = crossbeam_channel::unbounded::<ControlCommand>();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    {
        spawn_terminate_watcher(cancel.clone());
        spawn_control_signal(
            SignalKind::hangup(),
            "SIGHUP",
            ControlCommand::Reload,
            control_tx.clone(),
            cancel.clone(),
        );
        spawn_control_signal(
            SignalKind::user_defined1(),
            "SIGUSR1",
            ControlCommand::Skip,
            control_tx.clone(),
            cancel.clone(),
        );
        spawn_control_signal(
            SignalKind::user_defined2(),
            "SIGUSR2",
            ControlCommand::ForceSync,
            control_tx.clone(),
            cancel.clone(),
        );
    }
    drop(control_tx);

    let backend: Box<dyn DisplayBackend> = if headless_ticks.is_some() {
        let size = ProbeRequest::from_config(&cfg).size;
        let (backend, _handle) = HeadlessBackend::new(size.0, size.1);
        Box::new(backend)
    } else {
        let mut probe_cfg = (*cfg).clone();
        if let Some(preference) = backend {
            probe_cfg.display.backend = preference;
        }
        match probe(&probe_cfg) {
            Ok(probed) => {
                tracing::info!(
                    backend = %probed.backend.kind(),
                    size = ?probed.size,
                    "display ready"
                );
                probed.backend
            }
            Err(err @ DisplayError::BackendInit { .. }) => {
                tracing::error!("{err}");
                cancel.cancel();
                bail!(err);
            }
            Err(err) => return Err(err.into()),
        }
    };

    let ctx = RenderingContext::new(backend, &cfg);
    let sync = SyncCoordinator::from_settings(&cfg.sync, Some(Handle::current()));
    let options = PlaybackOptions {
        max_ticks: headless_ticks,
        initial_sync: !skip_initial_sync,
        sleep_countdown: None,
    };
    let provider: Arc<dyn ConfigProvider> = provider;
    let playback = PlaybackLoop::new(provider, ctx, sync, control_rx, cancel.clone(), options);

    // The window system wants the main thread, so the loop blocks here.
    if let Err(e) = playback.run().context("playback failed") {
        tracing::error!("{e:?}");
    }
    cancel.cancel();
    Ok(())
}

#[cfg(unix)]
fn spawn_terminate_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = sigterm.recv() => {
                        tracing::info!("SIGTERM received; initiating shutdown");
                        cancel.cancel();
                    }
                }
            }
            Err(err) => tracing::warn!("failed to register SIGTERM handler: {err}"),
        }
    });
}

#[cfg(unix)]
fn spawn_control_signal(
    kind: SignalKind,
    name: &'static str,
    command: ControlCommand,
    control: Sender<ControlCommand>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        match signal(kind) {
            Ok(mut stream) => loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = stream.recv() => {
                        if received.is_none() {
                            break;
                        }
                        tracing::info!(?command, "{name} received");
                        if control.send(command).is_err() {
                            tracing::warn!("playback loop gone; dropping {name}");
                            break;
                        }
                    }
                }
            },
            Err(err) => tracing::warn!("failed to register {name} handler: {err}"),
        }
    });
}
