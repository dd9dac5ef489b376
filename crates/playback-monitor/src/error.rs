use std::path::PathBuf;

/// Failure reported by a [`MediaSource`](crate::MediaSource) call.
///
/// Query failures are expected now and then while a decoder warms up; the
/// monitor recovers from them with last-known values.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaError {
    #[error("media source is not ready")]
    NotReady,

    #[error("{op} failed: {reason}")]
    Query { op: &'static str, reason: String },

    #[error("cannot open `{}`: {reason}", path.display())]
    DataSource { path: PathBuf, reason: String },
}

impl MediaError {
    pub fn query(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Query {
            op,
            reason: reason.into(),
        }
    }
}

/// Terminal playback failure, surfaced once to the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("decoder rejected `{path}`: {reason}")]
    DataSource { path: String, reason: String },

    #[error("buffering exceeded {waited_secs}s without playback starting")]
    BufferingTimeout { waited_secs: u64 },

    #[error("decoder error (what={what}, extra={extra})")]
    Decoder { what: i32, extra: i32 },

    #[error("playback already requested")]
    AlreadyStarted,
}

impl PlaybackError {
    pub fn data_source(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataSource {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable tag used in telemetry attributes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataSource { .. } => "data_source",
            Self::BufferingTimeout { .. } => "buffering_timeout",
            Self::Decoder { .. } => "decoder",
            Self::AlreadyStarted => "already_started",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        let err = PlaybackError::BufferingTimeout { waited_secs: 30 };
        assert_eq!(
            err.to_string(),
            "buffering exceeded 30s without playback starting"
        );
        assert_eq!(err.kind(), "buffering_timeout");

        let err = MediaError::query("getDuration", "not prepared");
        assert_eq!(err.to_string(), "getDuration failed: not prepared");
    }
}
