//! Error type shared by the controller, the command channel and the helper.
//!
//! Every controller-level failure ends up as a human readable `last_error`
//! string; `kind()` keeps the category available for callers that need to
//! branch on it.

/// Failure categories of a shaping session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapingError {
    /// The user did not authorize the elevation prompt, or the helper never
    /// published its liveness marker before the readiness timeout.
    #[error("Authentication cancelled or helper did not start")]
    ElevationDeclined,

    /// Elevation could not even be attempted (tool missing, OS refused).
    #[error("Failed to launch privileged helper: {0}")]
    SpawnFailed(String),

    /// A command could not be persisted to the command channel.
    #[error("Failed to write command: {0}")]
    ChannelWriteFailed(String),

    /// A shaping command run by the helper exited non-zero.
    #[error("Shaping command `{command}` failed ({status}): {stderr}")]
    BackendCommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// A helper from the previous session has not exited yet; starting another
    /// one now would have two helpers polling the same channel.
    #[error("Previous helper is still shutting down, try again shortly")]
    HelperStillRunning,

    /// Requested rate outside the accepted Kbps range.
    #[error("Bandwidth limit {0} Kbps is outside 100..=1000000 Kbps")]
    InvalidLimit(u64),

    /// Other filesystem or OS level failure.
    #[error("{0}")]
    Io(String),
}

impl ShapingError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            ShapingError::ElevationDeclined => "ElevationDeclined",
            ShapingError::SpawnFailed(_) => "SpawnFailed",
            ShapingError::ChannelWriteFailed(_) => "ChannelWriteFailed",
            ShapingError::BackendCommandFailed { .. } => "BackendCommandFailed",
            ShapingError::HelperStillRunning => "HelperStillRunning",
            ShapingError::InvalidLimit(_) => "InvalidLimit",
            ShapingError::Io(_) => "Io",
        }
    }
}

impl From<std::io::Error> for ShapingError {
    fn from(err: std::io::Error) -> Self {
        ShapingError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_returns_variant_name() {
        assert_eq!(ShapingError::ElevationDeclined.kind(), "ElevationDeclined");
        assert_eq!(
            ShapingError::SpawnFailed("no osascript".into()).kind(),
            "SpawnFailed"
        );
        assert_eq!(
            ShapingError::ChannelWriteFailed("disk full".into()).kind(),
            "ChannelWriteFailed"
        );
        assert_eq!(ShapingError::InvalidLimit(5).kind(), "InvalidLimit");
        assert_eq!(
            ShapingError::HelperStillRunning.kind(),
            "HelperStillRunning"
        );
    }

    #[test]
    fn test_spawn_failed_carries_underlying_message() {
        let err = ShapingError::SpawnFailed("No such file or directory".into());
        assert!(err.to_string().contains("No such file or directory"));
    }

    #[test]
    fn test_from_io_error_produces_io_variant() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ShapingError = io_err.into();
        assert_eq!(err.kind(), "Io");
        assert!(err.to_string().contains("denied"));
    }
}
