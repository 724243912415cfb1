//! Identity rotation
//!
//! The controller drives one strictly sequential loop of rotation cycles.
//! Its collaborators sit behind the traits below so the loop can be driven
//! by scripted fakes in tests.

#![allow(async_fn_in_trait)] // Futures are awaited in place, never spawned

mod controller;
mod cycle;

pub use controller::{RotationController, AUTH_FAILURE_LIMIT};
pub use cycle::{classify, CycleFailure, Outcome, Phase, RotationCycle, RotationMethod};

use crate::error::{AuthError, ReporterError, ServiceError, SignalError};
use crate::ip::IpObservation;

/// Opens authenticated control sessions
pub trait ControlChannel {
    type Session: ControlSession;

    /// Connect and authenticate a new session
    async fn authenticate(&mut self) -> Result<Self::Session, AuthError>;
}

/// An authenticated control session
pub trait ControlSession {
    /// Send NEWNYM and wait for the acknowledgement
    async fn signal_new_identity(&mut self) -> Result<(), SignalError>;

    /// Whether Tor reports a usable circuit
    async fn circuit_established(&mut self) -> Result<bool, SignalError>;

    /// Release the session
    async fn close(&mut self);
}

/// Degraded rotation path: restart the daemon
pub trait ServiceRestart {
    async fn restart(&self) -> Result<(), ServiceError>;
}

/// Source of the currently visible exit IP
pub trait IpSource {
    async fn fetch(&self) -> Result<IpObservation, ReporterError>;
}
