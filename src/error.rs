use std::path::PathBuf;

use thiserror::Error;

/// Library error type for display engine operations.
///
/// Only [`DisplayError::BackendInit`] is fatal; the playback loop turns every other
/// variant into a skip, a fallback or a transient banner.
#[derive(Debug, Error)]
pub enum DisplayError {
    /// No rendering backend could be initialised.
    #[error("no display backend available (tried: {})", .tried.join(", "))]
    BackendInit { tried: Vec<String> },

    /// A media file could not be read or decoded.
    #[error("failed to load {}: {source}", .path.display())]
    MediaLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The external video decoder failed at the given stage.
    #[error("video decode failed for {} ({stage}): {message}", .path.display())]
    Decode {
        path: PathBuf,
        stage: DecodeStage,
        message: String,
    },

    /// The media sync collaborator reported an error.
    #[error("sync failed: {0}")]
    Sync(String),

    /// The schedule window could not be evaluated.
    #[error("schedule evaluation failed: {0}")]
    ScheduleEvaluation(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    Probe,
    Spawn,
    Stream,
}

impl std::fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Probe => "probe",
            Self::Spawn => "spawn",
            Self::Stream => "stream",
        })
    }
}

impl DisplayError {
    pub fn media_load(path: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        Self::MediaLoad {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn decode(
        path: impl Into<PathBuf>,
        stage: DecodeStage,
        message: impl Into<String>,
    ) -> Self {
        Self::Decode {
            path: path.into(),
            stage,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BackendInit { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_backend_failures_are_fatal() {
        let fatal = DisplayError::BackendInit {
            tried: vec!["kms".into(), "fbdev".into()],
        };
        assert!(fatal.is_fatal());
        assert_eq!(
            fatal.to_string(),
            "no display backend available (tried: kms, fbdev)"
        );
        let sync = DisplayError::Sync("remote unavailable".into());
        assert!(!sync.is_fatal());
        let decode = DisplayError::decode("/m/a.mp4", DecodeStage::Stream, "short read");
        assert!(!decode.is_fatal());
        assert!(decode.to_string().contains("(stream)"));
    }
}
