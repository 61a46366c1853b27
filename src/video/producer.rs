//! Decoder subprocess feeding RGB24 frames through a bounded channel.
//!
//! `ffmpeg` paces output at the source frame rate (`-re`), scales with the same
//! [`ScalePlan`] the still-image path uses and writes raw frames to stdout. A dedicated
//! thread reads whole frames into pooled buffers and hands them to the render thread.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use tracing::{debug, warn};

use super::process::ManagedChild;
use crate::cache::surface_pool::{FrameBuffer, SurfacePool};
use crate::error::{DecodeStage, DisplayError};
use crate::processing::layout::ScalePlan;

pub const FRAME_QUEUE_CAPACITY: usize = 5;
const SEND_RETRY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Let ffmpeg pick a hardware decoder.
    HardwareAccelerated,
    Software,
}

impl DecodeMode {
    /// The next, simpler mode to try after a failure.
    pub fn fallback(self) -> Option<Self> {
        match self {
            Self::HardwareAccelerated => Some(Self::Software),
            Self::Software => None,
        }
    }
}

#[derive(Debug)]
enum FrameMessage {
    Frame(FrameBuffer),
    End,
    Failed(String),
}

/// What the render thread gets from [`FrameProducer::next_frame`].
#[derive(Debug)]
pub enum NextFrame {
    Frame(FrameBuffer),
    /// Nothing arrived within the timeout; the stream is still live.
    Pending,
    Finished,
    Failed(String),
}

/// Decoder request: source, scaling, and output frame size.
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    pub path: PathBuf,
    pub plan: ScalePlan,
    /// Size of each decoded frame, i.e. `plan.scaled_size(canvas)`.
    pub frame_size: (u32, u32),
    pub mode: DecodeMode,
}

impl DecodeRequest {
    pub fn new(path: &Path, plan: ScalePlan, canvas: (u32, u32), mode: DecodeMode) -> Self {
        Self {
            path: path.to_path_buf(),
            plan,
            frame_size: plan.scaled_size(canvas.0, canvas.1),
            mode,
        }
    }

    /// The ffmpeg `-vf` chain equivalent to `plan`.
    pub fn filter_chain(&self) -> String {
        let (w, h) = self.frame_size;
        match self.plan {
            ScalePlan::Fill { crop } => format!(
                "crop={}:{}:{}:{},scale={w}:{h}",
                crop.width, crop.height, crop.x, crop.y
            ),
            ScalePlan::Fit { .. } | ScalePlan::Stretch => format!("scale={w}:{h}"),
        }
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
        if self.mode == DecodeMode::HardwareAccelerated {
            cmd.args(["-hwaccel", "auto"]);
        }
        cmd.arg("-re")
            .arg("-i")
            .arg(&self.path)
            .args(["-an", "-sn", "-vf"])
            .arg(self.filter_chain())
            .args(["-pix_fmt", "rgb24", "-f", "rawvideo", "pipe:1"]);
        cmd
    }
}

pub struct FrameProducer {
    rx: Receiver<FrameMessage>,
    stop: Arc<AtomicBool>,
    child: Option<ManagedChild>,
    reader: Option<JoinHandle<()>>,
    frame_size: (u32, u32),
}

impl std::fmt::Debug for FrameProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProducer")
            .field("frame_size", &self.frame_size)
            .field("queued", &self.rx.len())
            .finish_non_exhaustive()
    }
}

impl FrameProducer {
    /// Spawns the decoder and its reader thread.
    pub fn spawn(
        request: &DecodeRequest,
        pool: Arc<SurfacePool>,
        grace: Duration,
    ) -> Result<Self, DisplayError> {
        let mut cmd = request.command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd.spawn().map_err(|err| {
            DisplayError::decode(
                &request.path,
                DecodeStage::Spawn,
                format!("failed to start ffmpeg: {err}"),
            )
        })?;
        let Some(stdout) = child.stdout.take() else {
            drop(ManagedChild::new(child, grace));
            return Err(DisplayError::decode(
                &request.path,
                DecodeStage::Spawn,
                "decoder stdout unavailable",
            ));
        };
        let child = ManagedChild::new(child, grace);
        debug!(
            path = %request.path.display(),
            mode = ?request.mode,
            filter = %request.filter_chain(),
            pid = child.id(),
            "video decoder started"
        );
        Ok(Self::from_reader(stdout, request.frame_size, pool, Some(child)))
    }

    fn from_reader<R>(
        reader: R,
        frame_size: (u32, u32),
        pool: Arc<SurfacePool>,
        child: Option<ManagedChild>,
    ) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = bounded(FRAME_QUEUE_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let reader = thread::Builder::new()
            .name("video-frames".into())
            .spawn(move || read_frames(reader, frame_size, &pool, &tx, &thread_stop));
        let reader = match reader {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(error = %err, "failed to spawn frame reader thread");
                None
            }
        };
        Self {
            rx,
            stop,
            child,
            reader,
            frame_size,
        }
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    /// Waits up to `timeout` for the next frame.
    pub fn next_frame(&self, timeout: Duration) -> NextFrame {
        if self.reader.is_none() {
            return NextFrame::Failed("frame reader thread unavailable".into());
        }
        match self.rx.recv_timeout(timeout) {
            Ok(FrameMessage::Frame(frame)) => NextFrame::Frame(frame),
            Ok(FrameMessage::End) => NextFrame::Finished,
            Ok(FrameMessage::Failed(message)) => NextFrame::Failed(message),
            Err(RecvTimeoutError::Timeout) => NextFrame::Pending,
            Err(RecvTimeoutError::Disconnected) => NextFrame::Finished,
        }
    }

    /// Stops the decoder and joins the reader thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Terminating the child closes the pipe, which unblocks the reader.
        drop(self.child.take());
        while self.rx.try_recv().is_ok() {}
        if let Some(handle) = self.reader.take()
            && handle.join().is_err()
        {
            warn!("frame reader thread panicked");
        }
    }
}

impl Drop for FrameProducer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_frames<R: Read>(
    mut reader: R,
    (width, height): (u32, u32),
    pool: &SurfacePool,
    tx: &Sender<FrameMessage>,
    stop: &AtomicBool,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let mut frame = pool.acquire_or_alloc(width, height);
        let message = match read_full(&mut reader, frame.data_mut()) {
            Ok(true) => FrameMessage::Frame(frame),
            Ok(false) => {
                pool.release(frame);
                FrameMessage::End
            }
            Err(err) => {
                pool.release(frame);
                FrameMessage::Failed(format!("decoder stream error: {err}"))
            }
        };
        let last = !matches!(message, FrameMessage::Frame(_));
        if !send_until_stopped(tx, message, stop, pool) || last {
            return;
        }
    }
}

/// Fills `buf` completely. `Ok(false)` on a clean end of stream, including a trailing
/// partial frame.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}

fn send_until_stopped(
    tx: &Sender<FrameMessage>,
    mut message: FrameMessage,
    stop: &AtomicBool,
    pool: &SurfacePool,
) -> bool {
    loop {
        match tx.send_timeout(message, SEND_RETRY) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                if stop.load(Ordering::Relaxed) {
                    recycle(returned, pool);
                    return false;
                }
                message = returned;
            }
            Err(SendTimeoutError::Disconnected(returned)) => {
                recycle(returned, pool);
                return false;
            }
        }
    }
}

fn recycle(message: FrameMessage, pool: &SurfacePool) {
    if let FrameMessage::Frame(frame) = message {
        pool.release(frame);
    }
}
