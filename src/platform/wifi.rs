//! WiFi signal level for the status overlay.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::debug;

use crate::config::Configuration;
use crate::video::process::{CommandOutput, run_with_timeout};

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(10);
pub const UNAVAILABLE: &str = "N/A";

type CommandRunner = Arc<dyn Fn(&str) -> Result<CommandOutput> + Send + Sync>;

/// Samples the signal level, at most once per [`SAMPLE_INTERVAL`].
pub struct WifiProbe {
    runner: CommandRunner,
    proc_wireless: PathBuf,
    sample_interval: Duration,
    last: Mutex<Option<(Instant, String)>>,
}

impl fmt::Debug for WifiProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiProbe")
            .field("proc_wireless", &self.proc_wireless)
            .field("sample_interval", &self.sample_interval)
            .finish_non_exhaustive()
    }
}

impl WifiProbe {
    pub fn new(config: &Configuration) -> Self {
        let timeout = config.system.timeouts.quick;
        let runner: CommandRunner = Arc::new(move |program: &str| {
            Ok(run_with_timeout(&mut Command::new(program), timeout)?)
        });
        Self::build(runner, config.system.paths.proc_net_wireless.clone())
    }

    fn build(runner: CommandRunner, proc_wireless: PathBuf) -> Self {
        Self {
            runner,
            proc_wireless,
            sample_interval: SAMPLE_INTERVAL,
            last: Mutex::new(None),
        }
    }

    /// `-NN dBm`, or `N/A` when no source reports a level.
    pub fn signal_text(&self) -> String {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((at, text)) = last.as_ref()
            && at.elapsed() < self.sample_interval
        {
            return text.clone();
        }
        let text = self.sample();
        *last = Some((Instant::now(), text.clone()));
        text
    }

    fn sample(&self) -> String {
        match (self.runner)("iwconfig") {
            Ok(output) if output.status.success() => {
                if let Some(level) = parse_iwconfig(&output.stdout) {
                    return format!("{level} dBm");
                }
            }
            Ok(output) => debug!(status = ?output.status, "iwconfig reported failure"),
            Err(err) => debug!("iwconfig unavailable: {err:#}"),
        }
        match fs::read_to_string(&self.proc_wireless) {
            Ok(raw) => parse_proc_wireless(&raw)
                .map(|level| format!("{level} dBm"))
                .unwrap_or_else(|| UNAVAILABLE.to_string()),
            Err(err) => {
                debug!(
                    path = %self.proc_wireless.display(),
                    error = %err,
                    "no wireless statistics"
                );
                UNAVAILABLE.to_string()
            }
        }
    }
}

/// Extracts `N` from `Signal level=N dBm`.
pub fn parse_iwconfig(stdout: &str) -> Option<i32> {
    let (_, rest) = stdout.split_once("Signal level=")?;
    let end = rest
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map_or(rest.len(), |(i, _)| i);
    let (number, tail) = rest.split_at(end);
    if !tail.trim_start().starts_with("dBm") {
        return None;
    }
    number.parse().ok()
}

/// Level column of the first interface line (third line of the file).
pub fn parse_proc_wireless(raw: &str) -> Option<i32> {
    let line = raw.lines().nth(2)?;
    let level = line.split_whitespace().nth(3)?;
    let value: f64 = level.trim_end_matches('.').parse().ok()?;
    Some(value as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PROC_WIRELESS: &str = concat!(
        "Inter-| sta-|   Quality        |   Discarded packets\n",
        " face | tus | link level noise |  nwid  crypt   frag\n",
        " wlan0: 0000   54.  -56.  -256        0      0      0\n",
    );

    struct StubRunner {
        responses: Arc<StdMutex<HashMap<String, CommandOutput>>>,
        calls: Arc<AtomicUsize>,
    }

    impl StubRunner {
        fn new(map: HashMap<String, CommandOutput>) -> Self {
            Self {
                responses: Arc::new(StdMutex::new(map)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn into_runner(self) -> CommandRunner {
            Arc::new(move |program: &str| {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.responses
                    .lock()
                    .unwrap()
                    .get(program)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("{program}: not found"))
            })
        }
    }

    fn output(code: i32, stdout: &str) -> CommandOutput {
        CommandOutput {
            status: ExitStatus::from_raw((code & 0xff) << 8),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[test]
    fn iwconfig_level_is_preferred() {
        let mut map = HashMap::new();
        map.insert(
            "iwconfig".to_string(),
            output(
                0,
                "wlan0  IEEE 802.11  ESSID:\"x\"\n  Link Quality=54/70  Signal level=-56 dBm\n",
            ),
        );
        let probe = WifiProbe::build(StubRunner::new(map).into_runner(), "/nonexistent".into());
        assert_eq!(probe.signal_text(), "-56 dBm");
    }

    #[test]
    fn falls_back_to_proc_then_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let proc = dir.path().join("wireless");
        fs::write(&proc, PROC_WIRELESS).unwrap();
        let probe = WifiProbe::build(StubRunner::new(HashMap::new()).into_runner(), proc);
        assert_eq!(probe.signal_text(), "-56 dBm");

        let probe = WifiProbe::build(
            StubRunner::new(HashMap::new()).into_runner(),
            dir.path().join("missing"),
        );
        assert_eq!(probe.signal_text(), UNAVAILABLE);
    }

    #[test]
    fn samples_are_reused_within_the_interval() {
        let stub = StubRunner::new(HashMap::new());
        let calls = Arc::clone(&stub.calls);
        let probe = WifiProbe::build(stub.into_runner(), "/nonexistent".into());
        probe.signal_text();
        probe.signal_text();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parsers_reject_noise() {
        assert_eq!(parse_iwconfig("Signal level=-71 dBm"), Some(-71));
        assert_eq!(parse_iwconfig("Signal level=60/100"), None);
        assert_eq!(parse_iwconfig("no wireless extensions."), None);
        assert_eq!(parse_proc_wireless("only\ntwo lines\n"), None);
    }
}
