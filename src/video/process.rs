//! Bounded waits and graceful termination for helper processes.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} timed out after {}", humantime::format_duration(*.timeout))]
    TimedOut { program: String, timeout: Duration },
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

/// Runs `cmd` to completion, capturing output, killing it once `timeout` elapses.
pub fn run_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
) -> Result<CommandOutput, ProcessError> {
    let program = program_name(cmd);
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

    // Drain both pipes concurrently so a chatty child cannot block on a full pipe.
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let status = match wait_with_deadline(&mut child, timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            terminate(&mut child, Duration::from_millis(500));
            return Err(ProcessError::TimedOut { program, timeout });
        }
        Err(source) => {
            terminate(&mut child, Duration::ZERO);
            return Err(ProcessError::Wait { program, source });
        }
    };

    Ok(CommandOutput {
        status,
        stdout: stdout.map(join_reader).unwrap_or_default(),
        stderr: stderr.map(join_reader).unwrap_or_default(),
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Polls `child` until it exits or `timeout` elapses. `Ok(None)` means still running.
pub fn wait_with_deadline(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Sends SIGTERM, waits up to `grace`, then SIGKILLs. Always reaps the child.
pub fn terminate(child: &mut Child, grace: Duration) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    let pid = Pid::from_raw(child.id() as i32);
    if !grace.is_zero() {
        match kill(pid, Signal::SIGTERM) {
            Ok(()) => {
                if let Ok(Some(status)) = wait_with_deadline(child, grace) {
                    debug!(pid = child.id(), %status, "child exited after SIGTERM");
                    return;
                }
            }
            Err(err) => debug!(pid = child.id(), error = %err, "SIGTERM failed"),
        }
    }
    if let Err(err) = child.kill() {
        warn!(pid = child.id(), error = %err, "failed to kill child process");
    }
    let _ = child.wait();
}

/// A child process that is terminated when dropped.
#[derive(Debug)]
pub struct ManagedChild {
    child: Child,
    grace: Duration,
}

impl ManagedChild {
    pub fn new(child: Child, grace: Duration) -> Self {
        Self { child, grace }
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Whether the process has already exited.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

impl Drop for ManagedChild {
    fn drop(&mut self) {
        // Dropping the pipe handles closes our ends before the wait.
        drop(self.child.stdin.take());
        drop(self.child.stdout.take());
        drop(self.child.stderr.take());
        terminate(&mut self.child, self.grace);
    }
}
