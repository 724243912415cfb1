//! Error taxonomy
//!
//! Per-cycle errors are recovered inside the rotation loop and recorded as
//! the cycle outcome. Only [`RotationError`] ends a run.

use thiserror::Error;

/// Low-level control protocol failure
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("control port I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for Tor reply")]
    Timeout,

    #[error("control connection closed by Tor")]
    Closed,

    #[error("Tor replied {code}: {message}")]
    Status { code: u16, message: String },

    #[error("malformed reply line: {0:?}")]
    Malformed(String),
}

/// Control channel could not be authenticated
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("control port {addr} unreachable: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{method} authentication rejected: {message}")]
    Rejected { method: String, message: String },

    #[error("no usable authentication method (no cookie, no password, NULL not offered)")]
    NoUsableMethod,

    #[error("control protocol error during authentication: {0}")]
    Protocol(#[from] ControlError),
}

/// NEWNYM signal failed for this cycle
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Tor rejected the signal: {0}")]
    Rejected(String),

    #[error("no acknowledgement from Tor before timeout")]
    Timeout,

    #[error("control protocol error while signaling: {0}")]
    Protocol(ControlError),
}

impl From<ControlError> for SignalError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Timeout => SignalError::Timeout,
            ControlError::Status { code, message } => {
                SignalError::Rejected(format!("{} {}", code, message))
            },
            other => SignalError::Protocol(other),
        }
    }
}

/// Service manager could not restart Tor
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("no service manager available to control Tor")]
    ManagerUnavailable,

    #[error("`{command}` failed with {status}")]
    CommandFailed { command: String, status: String },

    #[error("`{0}` requires elevated privileges")]
    PermissionDenied(String),

    #[error("service management not supported on {0}")]
    Unsupported(String),

    #[error("`{0}` did not finish in time")]
    Timeout(String),

    #[error("service command I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// IP verification failed
#[derive(Error, Debug)]
pub enum ReporterError {
    /// Transient; retried before surfacing
    #[error("network error: {0}")]
    Network(String),

    /// Service answered but the body is unusable; never retried
    #[error("unparseable IP service response: {0}")]
    Parse(String),
}

impl ReporterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReporterError::Network(_))
    }
}

/// Fatal run termination
#[derive(Error, Debug)]
pub enum RotationError {
    #[error("{limit} consecutive rotation cycles failed, giving up")]
    ConsecutiveFailureLimitExceeded { limit: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reply_maps_to_rejected_signal() {
        let err = ControlError::Status {
            code: 552,
            message: "Unrecognized signal".to_string(),
        };

        let signal: SignalError = err.into();
        assert!(matches!(signal, SignalError::Rejected(ref m) if m.starts_with("552")));
    }

    #[test]
    fn test_timeout_maps_to_signal_timeout() {
        let signal: SignalError = ControlError::Timeout.into();
        assert!(matches!(signal, SignalError::Timeout));
    }

    #[test]
    fn test_only_network_errors_retry() {
        assert!(ReporterError::Network("reset".into()).is_retryable());
        assert!(!ReporterError::Parse("garbage".into()).is_retryable());
    }
}
