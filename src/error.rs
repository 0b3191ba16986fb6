//! Error types for the gaze estimation library.

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Too few stable landmark correspondences, or a rank-deficient
    /// (collinear/coplanar) configuration
    #[error("Insufficient correspondence: {0}")]
    InsufficientCorrespondence(String),

    /// The alignment solve is ill-conditioned beyond the configured tolerance
    #[error("Degenerate alignment: {0}")]
    DegenerateAlignment(String),

    /// The eyeball estimator has not accepted enough observations yet
    #[error("Eyeball estimate has not converged yet")]
    NotYetConverged,

    /// A least-squares sphere fit is singular or ill-conditioned
    #[error("Ill-conditioned fit: {0}")]
    IllConditioned(String),

    /// NaN or infinity encountered in an input or intermediate value
    #[error("Numeric instability: {0}")]
    NumericInstability(String),

    /// Malformed input (short landmark set, empty point set, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Frames were submitted to a session that is not running
    #[error("Session is not running")]
    SessionNotRunning,

    /// The external landmark source failed
    #[error("Landmark detector unavailable: {0}")]
    DetectorUnavailable(String),

    /// The result consumer went away
    #[error("Result sink closed")]
    ResultSinkClosed,

    /// The session worker thread terminated abnormally
    #[error("Session failed: {0}")]
    SessionFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error only invalidates the current frame.
    ///
    /// Frame-recoverable errors are absorbed by the session; everything else
    /// terminates it.
    #[must_use]
    pub fn is_frame_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientCorrespondence(_)
                | Self::DegenerateAlignment(_)
                | Self::NotYetConverged
                | Self::IllConditioned(_)
                | Self::NumericInstability(_)
                | Self::InvalidInput(_)
        )
    }
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_recoverable_classification() {
        assert!(Error::DegenerateAlignment("x".into()).is_frame_recoverable());
        assert!(Error::NotYetConverged.is_frame_recoverable());
        assert!(Error::NumericInstability("nan".into()).is_frame_recoverable());
        assert!(!Error::SessionNotRunning.is_frame_recoverable());
        assert!(!Error::DetectorUnavailable("camera".into()).is_frame_recoverable());
        assert!(!Error::ResultSinkClosed.is_frame_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::InsufficientCorrespondence("3 points".to_string());
        assert_eq!(err.to_string(), "Insufficient correspondence: 3 points");
        assert_eq!(Error::NotYetConverged.to_string(), "Eyeball estimate has not converged yet");
    }
}
