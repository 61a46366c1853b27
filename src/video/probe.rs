use std::path::Path;
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;

use super::process::run_with_timeout;
use crate::error::{DecodeStage, DisplayError};

/// Geometry and timing of a video's first video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    pub duration: Option<Duration>,
    pub fps: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

pub fn probe_video(path: &Path, timeout: Duration) -> Result<VideoProbe, DisplayError> {
    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height,avg_frame_rate,r_frame_rate,duration:format=duration",
        "-of",
        "json",
    ])
    .arg(path);
    let output = run_with_timeout(&mut cmd, timeout)
        .map_err(|err| DisplayError::decode(path, DecodeStage::Probe, err.to_string()))?;
    if !output.status.success() {
        return Err(DisplayError::decode(
            path,
            DecodeStage::Probe,
            format!("ffprobe exited with {}: {}", output.status, output.stderr.trim()),
        ));
    }
    parse_probe(&output.stdout)
        .map_err(|message| DisplayError::decode(path, DecodeStage::Probe, message))
}

fn parse_probe(json: &str) -> Result<VideoProbe, String> {
    let parsed: ProbeOutput =
        serde_json::from_str(json).map_err(|err| format!("unreadable ffprobe output: {err}"))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| "no video stream".to_string())?;
    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err("video stream has no dimensions".into());
    };
    if width == 0 || height == 0 {
        return Err("video stream has zero dimensions".into());
    }
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate));
    let duration = stream
        .duration
        .as_deref()
        .and_then(parse_seconds)
        .or_else(|| {
            parsed
                .format
                .and_then(|f| f.duration)
                .as_deref()
                .and_then(parse_seconds)
        });
    Ok(VideoProbe {
        width,
        height,
        duration,
        fps,
    })
}

/// `"30000/1001"` or `"25"`; zero or malformed rates are `None`.
fn parse_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => raw.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}
