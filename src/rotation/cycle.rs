//! Rotation cycle records

use std::fmt;
use std::net::IpAddr;
use std::time::SystemTime;

/// How the new identity was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationMethod {
    ControlChannel,
    ServiceRestart,
}

impl fmt::Display for RotationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RotationMethod::ControlChannel => "control-channel",
            RotationMethod::ServiceRestart => "service-restart",
        })
    }
}

/// Result classification of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Observed IP differs from the previous one (or the previous one was unknown)
    Success,
    /// Rotation ran but the exit IP stayed the same
    Unchanged,
    /// Rotation or verification failed
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Success => "success",
            Outcome::Unchanged => "unchanged",
            Outcome::Failed => "failed",
        })
    }
}

/// Controller state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Authenticating,
    Signaling,
    Verifying,
    Stopped,
}

/// Why a cycle failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleFailure {
    /// Error class, e.g. `ServiceError` or `NetworkError`
    pub class: &'static str,
    pub message: String,
}

impl fmt::Display for CycleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

/// One finished rotation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationCycle {
    /// 1-based
    pub seq: u64,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
    pub method: RotationMethod,
    pub previous_ip: Option<IpAddr>,
    pub observed_ip: Option<IpAddr>,
    /// Location of the observed IP, if the service reported one
    pub observed_location: Option<String>,
    pub outcome: Outcome,
    pub failure: Option<CycleFailure>,
}

/// Classify a verification result
///
/// A missing observation is a failure; an unknown previous IP never yields
/// `Unchanged`.
pub fn classify(previous: Option<IpAddr>, observed: Option<IpAddr>) -> Outcome {
    match (previous, observed) {
        (_, None) => Outcome::Failed,
        (Some(previous), Some(observed)) if previous == observed => Outcome::Unchanged,
        _ => Outcome::Success,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(ip("1.2.3.4"), ip("5.6.7.8")), Outcome::Success);
        assert_eq!(classify(ip("5.6.7.8"), ip("5.6.7.8")), Outcome::Unchanged);
        assert_eq!(classify(None, ip("5.6.7.8")), Outcome::Success);
        assert_eq!(classify(ip("1.2.3.4"), None), Outcome::Failed);
        assert_eq!(classify(None, None), Outcome::Failed);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(RotationMethod::ControlChannel.to_string(), "control-channel");
        assert_eq!(RotationMethod::ServiceRestart.to_string(), "service-restart");
        assert_eq!(Outcome::Unchanged.to_string(), "unchanged");

        let failure = CycleFailure {
            class: "NetworkError",
            message: "connection refused".to_string(),
        };
        assert_eq!(failure.to_string(), "NetworkError: connection refused");
    }
}
