//! The top-level loop: picks what to show, when, and keeps the periodic duties going.
//!
//! Everything runs on the caller's thread at a ~20 Hz tick. Video playback runs a
//! nested loop that pops frames with a short timeout so input, sync and cancellation
//! stay responsive while a decoder is live.

pub mod state;

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Local;
use crossbeam_channel::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::state::{PlaybackSM, PlaybackState, Playlist};
use crate::cache::media_cache::MediaCache;
use crate::cache::surface_pool::SurfacePool;
use crate::config::{ConfigProvider, Configuration};
use crate::error::{DecodeStage, DisplayError};
use crate::events::{ControlCommand, InputEvent};
use crate::media::{MediaItem, MediaInfo, scan_configured};
use crate::overlay::{Orientation, OverlayContent, StatusOverlay, SystemStatus, progress_text};
use crate::platform::wifi::WifiProbe;
use crate::processing::layout::ScalePlan;
use crate::processing::loader::load_still;
use crate::processing::scale::render_scaled;
use crate::render::context::{MessageLine, RenderingContext};
use crate::render::pixels::{Color, PixelBuffer};
use crate::schedule::{PowerState, SLEEP_COUNTDOWN, ScheduleController};
use crate::sync::SyncCoordinator;
use crate::video::audio::AudioPlayer;
use crate::video::producer::{DecodeMode, DecodeRequest, FrameProducer, NextFrame};

pub const TICK: Duration = Duration::from_millis(50);
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);
pub const OVERLAY_REFRESH: Duration = Duration::from_secs(1);
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const WAITING_RESCAN: Duration = Duration::from_secs(10);
const FRAME_WAIT: Duration = Duration::from_millis(50);

const MESSAGE_COLOR: Color = Color::from_rgb8([220, 220, 220]);
const HINT_COLOR: Color = Color::from_rgb8([150, 150, 150]);

#[derive(Debug, Clone, Default)]
pub struct PlaybackOptions {
    /// Stop after this many ticks; `None` runs until cancelled.
    pub max_ticks: Option<u64>,
    /// Force a blocking sync at startup when the media list is empty.
    pub initial_sync: bool,
    /// Countdown shown before the screen goes dark; `None` uses [`SLEEP_COUNTDOWN`].
    pub sleep_countdown: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VideoOutcome {
    Finished,
    Skipped,
    /// Cancelled, quit, or the schedule window closed.
    Interrupted,
}

pub struct PlaybackLoop {
    provider: Arc<dyn ConfigProvider>,
    config: Arc<Configuration>,
    ctx: RenderingContext,
    cache: MediaCache,
    pool: Arc<SurfacePool>,
    overlay: StatusOverlay,
    schedule: ScheduleController,
    sync: SyncCoordinator,
    wifi: WifiProbe,
    playlist: Playlist,
    sm: PlaybackSM,
    control: Receiver<ControlCommand>,
    cancel: CancellationToken,
    options: PlaybackOptions,
    /// Scaled still currently on screen, reused for overlay-only refreshes.
    current_frame: Option<Arc<PixelBuffer>>,
    /// When the current item gives way to the next one; `None` shows the current item now.
    next_due: Option<Instant>,
    last_overlay: Instant,
    last_housekeeping: Instant,
    last_waiting_scan: Instant,
    last_waiting_sync: Instant,
    pending_rescan: bool,
    pending_reload: bool,
    ticks: u64,
}

impl std::fmt::Debug for PlaybackLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackLoop")
            .field("state", &self.sm.current())
            .field("power", &self.schedule.current())
            .field("items", &self.playlist.len())
            .field("index", &self.playlist.index())
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

impl PlaybackLoop {
    pub fn new(
        provider: Arc<dyn ConfigProvider>,
        ctx: RenderingContext,
        sync: SyncCoordinator,
        control: Receiver<ControlCommand>,
        cancel: CancellationToken,
        options: PlaybackOptions,
    ) -> Self {
        let config = provider.current();
        let now = Instant::now();
        Self {
            cache: MediaCache::new(config.cache.max_entries, config.cache.max_bytes),
            pool: Arc::new(SurfacePool::new(config.cache.pool_capacity)),
            overlay: StatusOverlay::new(config.display.status_bar.clone()),
            schedule: ScheduleController::new(config.active_schedule().cloned(), now)
                .with_countdown(options.sleep_countdown.unwrap_or(SLEEP_COUNTDOWN)),
            wifi: WifiProbe::new(&config),
            provider,
            config,
            ctx,
            sync,
            playlist: Playlist::default(),
            sm: PlaybackSM::new(),
            control,
            cancel,
            options,
            current_frame: None,
            next_due: None,
            last_overlay: now,
            last_housekeeping: now,
            last_waiting_scan: now,
            last_waiting_sync: now,
            pending_rescan: false,
            pending_reload: false,
            ticks: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.sm.current()
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn cache(&self) -> &MediaCache {
        &self.cache
    }

    /// Runs until cancelled (or `max_ticks`), then blanks the screen.
    pub fn run(mut self) -> Result<()> {
        self.startup();
        while !self.cancel.is_cancelled() {
            if let Err(err) = self.tick() {
                warn!("playback tick failed: {err:#}");
                thread::sleep(ERROR_BACKOFF);
            }
            self.ticks += 1;
            if self.options.max_ticks.is_some_and(|max| self.ticks >= max) {
                info!(ticks = self.ticks, "tick limit reached");
                break;
            }
            thread::sleep(TICK);
        }
        self.sm.on_shutdown();
        info!("playback stopped");
        self.ctx.compositor_mut().clear(Color::BLACK);
        self.ctx.present()
    }

    fn startup(&mut self) {
        self.rescan();
        if self.playlist.is_empty() && self.options.initial_sync && self.sync.is_configured() {
            info!("no media on disk; syncing before first display");
            if let Err(message) = self.sync.sync_blocking() {
                warn!(error = %message, "initial sync failed");
            }
            self.sync.take_rescan();
            self.rescan();
        } else if self.config.sync.sync_on_start && self.options.initial_sync {
            self.sync.maybe_sync(true);
        }
        if self.playlist.is_empty() {
            self.show_waiting_screen();
        }
    }

    fn tick(&mut self) -> Result<()> {
        let now = Instant::now();
        self.handle_input(now);
        self.handle_control();
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        if self.pending_reload {
            self.pending_reload = false;
            self.reload();
        }
        if self.sync.take_rescan() || self.pending_rescan {
            self.pending_rescan = false;
            self.rescan();
        }

        match self.sm.current() {
            PlaybackState::WaitingForMedia => self.tick_waiting(now),
            PlaybackState::Active => self.tick_active(now)?,
            PlaybackState::Initializing | PlaybackState::Shutdown => {}
        }

        self.sync.maybe_sync(false);
        if now.duration_since(self.last_housekeeping) >= HOUSEKEEPING_INTERVAL {
            self.last_housekeeping = now;
            self.housekeeping();
        }
        Ok(())
    }

    fn handle_input(&mut self, now: Instant) {
        for event in self.ctx.poll_input() {
            debug!(?event, "input");
            if self.schedule.on_input(now).is_some() {
                self.blank();
            }
            match event {
                InputEvent::Quit => {
                    info!("quit requested");
                    self.cancel.cancel();
                }
                InputEvent::Skip => self.next_due = Some(now),
                InputEvent::Retry => {
                    if self.sm.current() == PlaybackState::WaitingForMedia {
                        self.last_waiting_scan = now;
                        self.pending_rescan = true;
                    }
                }
            }
        }
    }

    fn handle_control(&mut self) {
        while let Ok(command) = self.control.try_recv() {
            info!(?command, "control command");
            match command {
                ControlCommand::Reload => self.pending_reload = true,
                ControlCommand::Skip => self.next_due = Some(Instant::now()),
                ControlCommand::ForceSync => {
                    self.sync.maybe_sync(true);
                }
            }
        }
    }

    fn tick_waiting(&mut self, now: Instant) {
        if now.duration_since(self.last_waiting_scan) >= WAITING_RESCAN {
            self.last_waiting_scan = now;
            self.rescan();
            if self.playlist.is_empty() {
                self.show_waiting_screen();
            }
        }
        // Forced, so an empty directory still syncs on the configured check interval.
        if now.duration_since(self.last_waiting_sync) >= self.sync.min_interval() {
            self.last_waiting_sync = now;
            self.sync.maybe_sync(true);
        }
    }

    fn tick_active(&mut self, now: Instant) -> Result<()> {
        let active = self.schedule.is_active_now();
        if let Some(change) = self.schedule.on_tick(active, now) {
            match change.to {
                PowerState::Active => {
                    self.ctx.compositor_mut().begin_frame();
                    self.next_due = None;
                    self.current_frame = None;
                }
                PowerState::CountingDownToSleep => self.show_countdown(now)?,
                PowerState::Asleep => {
                    self.blank();
                    let wake = self.schedule.next_wake();
                    info!(
                        wakes_at = ?wake.map(|at| at.format("%a %H:%M").to_string()),
                        "display asleep"
                    );
                }
            }
        }
        match self.schedule.current() {
            PowerState::Active => {}
            PowerState::CountingDownToSleep => {
                if now.duration_since(self.last_overlay) >= OVERLAY_REFRESH {
                    self.show_countdown(now)?;
                }
                return Ok(());
            }
            PowerState::Asleep => return Ok(()),
        }

        match self.next_due {
            None => self.show_current(now),
            Some(due) if now >= due => {
                self.playlist.advance();
                self.show_current(now);
            }
            Some(_) => {
                if now.duration_since(self.last_overlay) >= OVERLAY_REFRESH {
                    self.refresh_overlay(now)?;
                }
            }
        }
        Ok(())
    }

    fn show_current(&mut self, now: Instant) {
        let Some(item) = self.playlist.current() else {
            return;
        };
        if item.is_video() {
            self.current_frame = None;
            let outcome = self.play_video(&item);
            debug!(path = %item.path().display(), ?outcome, "video ended");
            self.next_due = match outcome {
                VideoOutcome::Finished | VideoOutcome::Skipped => Some(Instant::now()),
                // Replay from the start once the loop resumes.
                VideoOutcome::Interrupted => None,
            };
            return;
        }
        match self.show_image(&item) {
            Ok(()) => self.next_due = Some(now + self.config.slideshow.interval()),
            Err(err) => {
                warn!(error = %err, "skipping media item");
                self.current_frame = None;
                self.next_due = Some(now + ERROR_BACKOFF);
            }
        }
    }

    fn show_image(&mut self, item: &MediaItem) -> Result<(), DisplayError> {
        let path = item.path();
        let (w, h) = self.ctx.canvas_size();
        let mode = self.config.slideshow.scale_mode;
        let buffer = match self.cache.get(path, w, h, mode) {
            Some(buffer) => buffer,
            None => {
                let image = load_still(path, (w, h))?;
                let plan = ScalePlan::compute(mode, image.width(), image.height(), w, h);
                let background = Color::from_rgb8(self.config.display.background_color);
                let scaled = render_scaled(&image, &plan, w, h, background)
                    .map_err(|err| DisplayError::media_load(path, err))?;
                let scaled = Arc::new(scaled);
                self.cache.put(path, w, h, mode, Arc::clone(&scaled));
                scaled
            }
        };
        debug!(path = %path.display(), index = self.playlist.index(), "showing image");
        self.current_frame = Some(buffer);
        self.redraw_still(Instant::now())
            .map_err(|err| DisplayError::media_load(path, err))
    }

    fn refresh_overlay(&mut self, now: Instant) -> Result<()> {
        if self.current_frame.is_some() {
            self.redraw_still(now)?;
        }
        Ok(())
    }

    /// Re-blits the cached still and draws a fresh overlay over it.
    fn redraw_still(&mut self, now: Instant) -> Result<()> {
        let Some(frame) = self.current_frame.clone() else {
            return Ok(());
        };
        let content = self.still_overlay(now);
        let compositor = self.ctx.compositor_mut();
        compositor.begin_frame();
        compositor.draw_image_buffer(&frame, 0, 0);
        self.draw_overlay(&content);
        self.last_overlay = now;
        self.ctx.present()
    }

    fn still_overlay(&self, now: Instant) -> OverlayContent {
        let Some(item) = self.playlist.current() else {
            return OverlayContent::default();
        };
        let info = item.info(self.config.system.timeouts.long);
        let next_in = self.next_due.map(|due| due.saturating_duration_since(now));
        OverlayContent {
            file_info: info.image_summary(),
            system_info: self.system_status(false, next_in),
            progress: None,
        }
    }

    fn system_status(&self, showing_video: bool, next_in: Option<Duration>) -> Vec<String> {
        SystemStatus {
            resolution: self.ctx.physical_size(),
            now: Local::now(),
            wifi: self.wifi.signal_text(),
            index: self.playlist.index(),
            total: self.playlist.len(),
            showing_video,
            next_in,
            last_sync: self.sync.last_success(),
        }
        .texts()
    }

    fn draw_overlay(&mut self, content: &OverlayContent) {
        let show_bar = self.config.display.show_status_bar;
        let banner = self.sync.active_error();
        let orientation = Orientation::from_rotation(self.config.display.rotation);
        let overlay = &self.overlay;
        self.ctx.draw_with_text(|canvas, text| {
            let Some(text) = text else {
                return;
            };
            if show_bar {
                overlay.render(canvas, text, content, orientation);
            }
            if let Some(message) = banner {
                overlay.render_error_banner(canvas, text, &message, orientation);
            }
        });
    }

    fn play_video(&mut self, item: &MediaItem) -> VideoOutcome {
        let canvas = self.ctx.canvas_size();
        let info = item.info(self.config.system.timeouts.long).clone();
        let (src_w, src_h) = info.dimensions.unwrap_or(canvas);
        let scale_mode = self.config.slideshow.scale_mode;
        let plan = ScalePlan::compute(scale_mode, src_w, src_h, canvas.0, canvas.1);
        let mut mode = Some(DecodeMode::HardwareAccelerated);
        while let Some(current) = mode {
            let request = DecodeRequest::new(item.path(), plan, canvas, current);
            match self.stream_video(&request, &info) {
                Ok(outcome) => return outcome,
                Err(err) => {
                    warn!(error = %err, mode = ?current, "video decode failed");
                    mode = current.fallback();
                }
            }
        }
        warn!(path = %item.path().display(), "no decoder could play video; skipping");
        VideoOutcome::Skipped
    }

    fn stream_video(
        &mut self,
        request: &DecodeRequest,
        info: &MediaInfo,
    ) -> Result<VideoOutcome, DisplayError> {
        let grace = self.config.system.timeouts.normal;
        let producer = FrameProducer::spawn(request, Arc::clone(&self.pool), grace)?;
        let _audio = match AudioPlayer::start(
            &request.path,
            &self.config.audio,
            self.config.system.timeouts.long,
            grace,
        ) {
            Ok(audio) => audio,
            Err(err) => {
                warn!(error = %err, "continuing without audio");
                None
            }
        };
        info!(path = %request.path.display(), mode = ?request.mode, "playing video");
        let (ox, oy) = request.plan.offset();
        let started = Instant::now();
        let mut frames = 0u64;
        let mut last_duties = started;
        loop {
            if let Some(outcome) = self.video_interruptions() {
                producer.stop();
                return Ok(outcome);
            }
            match producer.next_frame(FRAME_WAIT) {
                NextFrame::Frame(frame) => {
                    frames += 1;
                    let content = OverlayContent {
                        file_info: info.video_summary(),
                        system_info: self.system_status(true, None),
                        progress: Some(progress_text(started.elapsed(), info.duration)),
                    };
                    let compositor = self.ctx.compositor_mut();
                    compositor.begin_frame();
                    compositor.draw_rgb24(
                        frame.data(),
                        frame.width(),
                        frame.height(),
                        ox as i32,
                        oy as i32,
                    );
                    self.pool.release(frame);
                    self.draw_overlay(&content);
                    if let Err(err) = self.ctx.present() {
                        warn!("failed to present video frame: {err:#}");
                    }
                }
                NextFrame::Pending => {}
                NextFrame::Finished if frames == 0 => {
                    return Err(DisplayError::decode(
                        &request.path,
                        DecodeStage::Stream,
                        "decoder produced no frames",
                    ));
                }
                NextFrame::Finished => return Ok(VideoOutcome::Finished),
                NextFrame::Failed(message) if frames == 0 => {
                    return Err(DisplayError::decode(&request.path, DecodeStage::Stream, message));
                }
                NextFrame::Failed(message) => {
                    warn!(
                        path = %request.path.display(),
                        error = %message,
                        "video stream ended early"
                    );
                    return Ok(VideoOutcome::Finished);
                }
            }
            if last_duties.elapsed() >= OVERLAY_REFRESH {
                last_duties = Instant::now();
                self.sync.maybe_sync(false);
                if self.sync.take_rescan() {
                    self.pending_rescan = true;
                }
                if !self.schedule.is_active_now() {
                    producer.stop();
                    return Ok(VideoOutcome::Interrupted);
                }
            }
        }
    }

    fn video_interruptions(&mut self) -> Option<VideoOutcome> {
        if self.cancel.is_cancelled() {
            return Some(VideoOutcome::Interrupted);
        }
        for event in self.ctx.poll_input() {
            match event {
                InputEvent::Quit => {
                    info!("quit requested");
                    self.cancel.cancel();
                    return Some(VideoOutcome::Interrupted);
                }
                InputEvent::Skip => return Some(VideoOutcome::Skipped),
                InputEvent::Retry => {}
            }
        }
        while let Ok(command) = self.control.try_recv() {
            info!(?command, "control command");
            match command {
                ControlCommand::Skip => return Some(VideoOutcome::Skipped),
                ControlCommand::Reload => {
                    self.pending_reload = true;
                    return Some(VideoOutcome::Interrupted);
                }
                ControlCommand::ForceSync => {
                    self.sync.maybe_sync(true);
                }
            }
        }
        None
    }

    fn show_countdown(&mut self, now: Instant) -> Result<()> {
        let lines: Vec<MessageLine> = self
            .schedule
            .sleep_message(now)
            .into_iter()
            .enumerate()
            .map(|(idx, text)| {
                let size = if idx == 0 { 48.0 } else { 28.0 };
                MessageLine::new(text, size, MESSAGE_COLOR)
            })
            .collect();
        self.ctx.draw_message_screen(Color::BLACK, &lines);
        self.last_overlay = now;
        self.ctx.present()
    }

    fn blank(&mut self) {
        self.current_frame = None;
        self.ctx.compositor_mut().clear(Color::BLACK);
        if let Err(err) = self.ctx.present() {
            warn!("failed to blank display: {err:#}");
        }
    }

    fn show_waiting_screen(&mut self) {
        let background = Color::from_rgb8(self.config.display.background_color);
        let lines = [
            MessageLine::new("No media found", 48.0, MESSAGE_COLOR),
            MessageLine::new(self.config.media_dir.display().to_string(), 24.0, HINT_COLOR),
            MessageLine::new("Press R to retry", 24.0, HINT_COLOR),
        ];
        self.ctx.draw_message_screen(background, &lines);
        if let Err(err) = self.ctx.present() {
            warn!("failed to draw waiting screen: {err:#}");
        }
    }

    fn rescan(&mut self) {
        match scan_configured(&self.config) {
            Ok(items) => {
                let update = self.playlist.replace(items);
                let paths = self.playlist.paths();
                // Scaled buffers of rewritten files are stale even though the path stayed.
                let dropped = self.cache.retain_paths(|path: &Path| {
                    paths.contains(path) && !update.changed.contains(path)
                });
                info!(
                    items = self.playlist.len(),
                    changed = update.changed.len(),
                    dropped,
                    "media list updated"
                );
                if !update.kept_current {
                    self.current_frame = None;
                    self.next_due = None;
                }
            }
            Err(err) => warn!("media scan failed: {err:#}"),
        }
        if let Some(change) = self.sm.on_media_count(self.playlist.len()) {
            info!(from = ?change.from, to = ?change.to, "playback state change");
            if change.to == PlaybackState::WaitingForMedia {
                self.current_frame = None;
                self.show_waiting_screen();
            }
            if change.to == PlaybackState::Active {
                self.next_due = None;
            }
        }
    }

    fn reload(&mut self) {
        let fresh = match self.provider.reload() {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!("keeping previous settings: {err:#}");
                return;
            }
        };
        let old = Arc::clone(&self.config);
        if fresh.scaling_signature() != old.scaling_signature()
            || fresh.rotation() != old.rotation()
        {
            info!("scaling settings changed; clearing media cache");
            self.cache.clear();
            self.pool.clear();
        }
        self.ctx.reconfigure(&fresh);
        self.overlay = StatusOverlay::new(fresh.display.status_bar.clone());
        self.schedule.set_window(fresh.active_schedule().cloned());
        self.sync.set_min_interval(fresh.sync.min_interval());
        self.wifi = WifiProbe::new(&fresh);
        self.config = fresh;
        self.current_frame = None;
        self.next_due = None;
        self.rescan();
        info!("settings reloaded");
    }

    fn housekeeping(&mut self) {
        let paths = self.playlist.paths();
        let dropped = self.cache.retain_paths(|path: &Path| paths.contains(path));
        let playing_video = self.playlist.current().is_some_and(|item| item.is_video());
        if !playing_video {
            self.pool.clear();
        }
        let stats = self.cache.stats();
        debug!(
            cache_entries = stats.entries,
            cache_bytes = stats.bytes,
            cache_hits = stats.hits,
            cache_misses = stats.misses,
            cache_evictions = stats.evictions,
            dropped,
            pool_buffers = self.pool.len(),
            pool_bytes = self.pool.pooled_bytes(),
            "memory report"
        );
    }
}
