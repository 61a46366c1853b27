use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use image::{Rgba, RgbaImage};
use signage_display::config::{ConfigProvider, Configuration, FileConfig, StaticConfig};
use signage_display::events::{ControlCommand, InputEvent};
use signage_display::platform::headless::{HeadlessBackend, HeadlessHandle};
use signage_display::playback::{PlaybackLoop, PlaybackOptions};
use signage_display::render::context::RenderingContext;
use signage_display::sync::{MediaSyncProvider, ProviderFactory, SyncCoordinator, SyncError};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

fn write_png(path: &Path, rgb: [u8; 3]) {
    write_png_sized(path, rgb, 40, 30);
}

fn write_png_sized(path: &Path, rgb: [u8; 3], w: u32, h: u32) {
    RgbaImage::from_pixel(w, h, Rgba([rgb[0], rgb[1], rgb[2], 255]))
        .save(path)
        .unwrap();
}

fn config_for(dir: &Path) -> Configuration {
    let mut config = Configuration {
        media_dir: dir.to_path_buf(),
        ..Configuration::default()
    };
    config.display.resolution = Some([64, 48]);
    config.display.show_status_bar = false;
    config.slideshow.interval_seconds = 600;
    config.validated().unwrap()
}

struct Running {
    handle: HeadlessHandle,
    control: Sender<ControlCommand>,
    cancel: CancellationToken,
    join: thread::JoinHandle<anyhow::Result<()>>,
}

fn start(config: Configuration, max_ticks: Option<u64>) -> Running {
    let options = PlaybackOptions {
        max_ticks,
        ..PlaybackOptions::default()
    };
    let sync = SyncCoordinator::new(None, Duration::from_secs(60));
    launch(Arc::new(StaticConfig::new(config)), sync, options)
}

fn launch(
    provider: Arc<dyn ConfigProvider>,
    sync: SyncCoordinator,
    options: PlaybackOptions,
) -> Running {
    let (backend, handle) = HeadlessBackend::new(64, 48);
    let (control, control_rx) = crossbeam_channel::unbounded();
    let cancel = CancellationToken::new();
    let join = thread::spawn({
        let cancel = cancel.clone();
        move || {
            let config = provider.current();
            let ctx = RenderingContext::with_text(Box::new(backend), &config, None);
            PlaybackLoop::new(provider, ctx, sync, control_rx, cancel, options).run()
        }
    });
    Running {
        handle,
        control,
        cancel,
        join,
    }
}

/// Sync stand-in that writes one image into the media directory while armed.
struct WritesImage {
    target: PathBuf,
    rgb: [u8; 3],
    size: (u32, u32),
    armed: AtomicBool,
    calls: AtomicUsize,
}

impl WritesImage {
    fn new(target: PathBuf, rgb: [u8; 3], size: (u32, u32), armed: bool) -> Arc<Self> {
        Arc::new(Self {
            target,
            rgb,
            size,
            armed: AtomicBool::new(armed),
            calls: AtomicUsize::new(0),
        })
    }

    fn coordinator(self: &Arc<Self>, min_interval: Duration) -> SyncCoordinator {
        let shared = Arc::clone(self);
        let factory: ProviderFactory = Box::new(move || {
            Ok::<_, SyncError>(Arc::clone(&shared) as Arc<dyn MediaSyncProvider>)
        });
        SyncCoordinator::new(Some(factory), min_interval)
    }
}

impl MediaSyncProvider for WritesImage {
    fn sync(&self) -> Result<(), SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.armed.load(Ordering::SeqCst) {
            write_png_sized(&self.target, self.rgb, self.size.0, self.size.1);
        }
        Ok(())
    }
}

/// Which primary the centre pixel of the last frame shows.
fn centre(handle: &HeadlessHandle) -> Option<char> {
    let frame = handle.last_frame()?;
    let px = frame.get(32, 24)?;
    let (r, g, b) = ((px >> 16) & 0xFF, (px >> 8) & 0xFF, px & 0xFF);
    Some(match (r > 200, g > 200, b > 200) {
        (true, false, false) => 'r',
        (false, true, false) => 'g',
        (false, false, false) if r < 30 && g < 30 && b < 30 => 'k',
        _ => '?',
    })
}

fn wait_for(handle: &HeadlessHandle, want: char) {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if centre(handle) == Some(want) {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("screen never showed '{want}', last was {:?}", centre(handle));
}

/// Polls until the presented-frame counter stops moving for `quiet`.
fn wait_until_idle(handle: &HeadlessHandle, quiet: Duration) -> u64 {
    let deadline = Instant::now() + WAIT;
    let mut last = handle.presented();
    let mut since = Instant::now();
    while Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
        let now = handle.presented();
        if now != last || now == 0 {
            last = now;
            since = Instant::now();
        } else if since.elapsed() >= quiet {
            return now;
        }
    }
    panic!("display never went idle");
}

#[test]
fn shows_first_item_then_skips_on_request() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("a.png"), [255, 0, 0]);
    write_png(&dir.path().join("b.png"), [0, 255, 0]);
    let run = start(config_for(dir.path()), None);

    wait_for(&run.handle, 'r');
    run.control.send(ControlCommand::Skip).unwrap();
    wait_for(&run.handle, 'g');
    // Wraps around to the first item.
    run.handle.push_input(InputEvent::Skip);
    wait_for(&run.handle, 'r');

    run.cancel.cancel();
    run.join.join().unwrap().unwrap();
    assert_eq!(centre(&run.handle), Some('k'), "shutdown blanks the screen");
}

#[test]
fn waits_for_media_then_retries_on_key() {
    let dir = tempfile::tempdir().unwrap();
    let run = start(config_for(dir.path()), None);

    wait_for(&run.handle, 'k');
    let presented = run.handle.presented();
    assert!(presented >= 1);

    write_png(&dir.path().join("late.png"), [0, 255, 0]);
    run.handle.push_input(InputEvent::Retry);
    wait_for(&run.handle, 'g');

    run.handle.push_input(InputEvent::Quit);
    run.join.join().unwrap().unwrap();
    assert!(run.cancel.is_cancelled());
}

#[test]
fn corrupt_items_are_skipped_without_stopping() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.png"), b"not an image").unwrap();
    write_png(&dir.path().join("b.png"), [255, 0, 0]);
    let run = start(config_for(dir.path()), None);

    wait_for(&run.handle, 'r');
    run.cancel.cancel();
    run.join.join().unwrap().unwrap();
}

#[test]
fn tick_limit_ends_the_run() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("a.png"), [255, 0, 0]);
    let run = start(config_for(dir.path()), Some(5));
    run.join.join().unwrap().unwrap();
    assert!(!run.cancel.is_cancelled());
    assert!(run.handle.presented() >= 2);
    drop(run.control);
}

#[test]
fn waiting_screen_syncs_until_media_arrives() {
    let dir = tempfile::tempdir().unwrap();
    let sync = WritesImage::new(dir.path().join("synced.png"), [0, 255, 0], (40, 30), true);
    let options = PlaybackOptions {
        initial_sync: false,
        ..PlaybackOptions::default()
    };
    let provider = Arc::new(StaticConfig::new(config_for(dir.path())));
    let run = launch(provider, sync.coordinator(Duration::from_millis(200)), options);

    // Nothing on disk and no initial sync: a periodic sync has to fetch it.
    wait_for(&run.handle, 'g');
    assert!(sync.calls.load(Ordering::SeqCst) >= 1);

    run.cancel.cancel();
    run.join.join().unwrap().unwrap();
}

#[test]
fn file_rewritten_by_sync_is_shown_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.png");
    write_png(&path, [255, 0, 0]);
    // Same name, new content: wider than the panel, so it is letterboxed under fit.
    let sync = WritesImage::new(path, [0, 255, 0], (64, 16), false);
    let provider = Arc::new(StaticConfig::new(config_for(dir.path())));
    let run = launch(
        provider,
        sync.coordinator(Duration::from_secs(3600)),
        PlaybackOptions::default(),
    );

    wait_for(&run.handle, 'r');
    sync.armed.store(true, Ordering::SeqCst);
    run.control.send(ControlCommand::ForceSync).unwrap();
    wait_for(&run.handle, 'g');
    let frame = run.handle.last_frame().unwrap();
    let top = frame.get(32, 2).unwrap();
    assert_eq!(top & 0x00FF_FFFF, 0, "new dimensions leave a letterbox band");

    // The stale scaled buffer must not come back when the item is shown again.
    run.control.send(ControlCommand::Skip).unwrap();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(centre(&run.handle), Some('g'));

    run.cancel.cancel();
    run.join.join().unwrap().unwrap();
}

#[test]
fn closed_window_counts_down_sleeps_and_wakes_on_reload() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("a.png"), [255, 0, 0]);
    let settings = dir.path().join("settings.yaml");
    let base = format!(
        "media-dir: {:?}\n\
         display:\n  resolution: [64, 48]\n  show-status-bar: false\n\
         slideshow:\n  interval-seconds: 600\n",
        dir.path().display().to_string()
    );
    // An empty window is never open.
    let closed = format!(
        "{base}schedule:\n  days: [Mon, Tue, Wed, Thu, Fri, Sat, Sun]\n  \
         start: \"08:00\"\n  stop: \"08:00\"\n"
    );
    std::fs::write(&settings, &closed).unwrap();
    let provider = Arc::new(FileConfig::load(&settings, None).unwrap());
    let options = PlaybackOptions {
        sleep_countdown: Some(Duration::from_millis(300)),
        ..PlaybackOptions::default()
    };
    let run = launch(
        provider,
        SyncCoordinator::new(None, Duration::from_secs(60)),
        options,
    );

    // Countdown, then a dark and idle screen; the item itself never appears.
    let presented = wait_until_idle(&run.handle, Duration::from_millis(500));
    assert!(presented >= 2, "countdown and blank were drawn");
    assert_eq!(centre(&run.handle), Some('k'));

    std::fs::write(&settings, &base).unwrap();
    run.control.send(ControlCommand::Reload).unwrap();
    wait_for(&run.handle, 'r');

    run.cancel.cancel();
    run.join.join().unwrap().unwrap();
}
