//! Rotation controller
//!
//! `Idle -> Authenticating -> Signaling -> Verifying -> Idle ... -> Stopped`
//!
//! Cycles never overlap. Cancellation is only observed between cycles and
//! during the inter-cycle wait, so a NEWNYM is never abandoned half way.

use super::cycle::{classify, CycleFailure, Outcome, Phase, RotationCycle, RotationMethod};
use super::{ControlChannel, ControlSession, IpSource, ServiceRestart};
use crate::config::RotationConfig;
use crate::error::{AuthError, ReporterError, RotationError, ServiceError, SignalError};
use crate::state::{RotationHistory, RunSummary, StopReason};
use crate::util::rand::backoff;
use crate::util::time::{format_duration, unix_secs};
use std::fmt::Display;
use std::net::IpAddr;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Consecutive authentication failures after which the control channel is
/// abandoned for the rest of the run
pub const AUTH_FAILURE_LIMIT: u32 = 2;

/// Poll interval while waiting for a fresh circuit
const CIRCUIT_POLL: Duration = Duration::from_millis(500);

/// Why the control path could not be used this cycle
#[derive(Debug, Error)]
enum ControlFailure {
    #[error("control channel disabled after repeated authentication failures")]
    Disabled,
    #[error("AuthError: {0}")]
    Auth(#[from] AuthError),
    #[error("SignalError: {0}")]
    Signal(#[from] SignalError),
}

impl From<&ServiceError> for CycleFailure {
    fn from(err: &ServiceError) -> Self {
        CycleFailure {
            class: "ServiceError",
            message: err.to_string(),
        }
    }
}

impl From<&ReporterError> for CycleFailure {
    fn from(err: &ReporterError) -> Self {
        let (class, message) = match err {
            ReporterError::Network(m) => ("NetworkError", m),
            ReporterError::Parse(m) => ("ParseError", m),
        };
        CycleFailure {
            class,
            message: message.clone(),
        }
    }
}

/// Drives rotation cycles until the count is reached, the run is
/// cancelled, or too many cycles fail in a row
pub struct RotationController<C: ControlChannel, S, R> {
    config: RotationConfig,
    control: C,
    /// Authenticated session, reused across cycles until it errors
    session: Option<C::Session>,
    service: S,
    reporter: R,
    history: RotationHistory,
    phase: Phase,
    auth_failures: u32,
    control_disabled: bool,
    /// Exit IP confirmed by the previous cycle
    last_observed: Option<IpAddr>,
}

impl<C, S, R> RotationController<C, S, R>
where
    C: ControlChannel,
    S: ServiceRestart,
    R: IpSource,
{
    pub fn new(config: RotationConfig, control: C, service: S, reporter: R) -> Self {
        Self {
            config,
            control,
            session: None,
            service,
            reporter,
            history: RotationHistory::new(),
            phase: Phase::Idle,
            auth_failures: 0,
            control_disabled: false,
            last_observed: None,
        }
    }

    pub fn history(&self) -> &RotationHistory {
        &self.history
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True once the controller has given up on the control port
    pub fn control_disabled(&self) -> bool {
        self.control_disabled
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Run the rotation loop
    ///
    /// Always releases the control session before returning.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunSummary, RotationError> {
        if self.config.is_unbounded() {
            info!(
                "Rotating exit IP every {} until stopped",
                format_duration(self.config.interval())
            );
        } else {
            info!(
                "Rotating exit IP {} times, every {}",
                self.config.count,
                format_duration(self.config.interval())
            );
        }

        let result = self.run_cycles(cancel).await;

        self.release_session().await;
        self.set_phase(Phase::Stopped);

        let stop_reason = result?;
        let summary = self.history.summary(stop_reason);
        info!("Rotation stopped ({:?}): {}", stop_reason, summary);
        Ok(summary)
    }

    async fn run_cycles(&mut self, cancel: &CancellationToken) -> Result<StopReason, RotationError> {
        let mut seq = 0;

        loop {
            if cancel.is_cancelled() {
                info!("Stop requested, not starting cycle {}", seq + 1);
                return Ok(StopReason::Cancelled);
            }

            seq += 1;
            let started = Instant::now();
            let cycle = self.run_cycle(seq).await;
            self.emit(&cycle);
            let failed = cycle.outcome == Outcome::Failed;
            self.history.record(cycle);

            let failures = self.history.consecutive_failures();
            if failures >= self.config.max_consecutive_failures {
                error!("{} consecutive rotation cycles failed, aborting run", failures);
                return Err(RotationError::ConsecutiveFailureLimitExceeded {
                    limit: self.config.max_consecutive_failures,
                });
            }

            if !self.config.is_unbounded() && seq >= self.config.count {
                return Ok(StopReason::Completed);
            }

            // Never negative: an overlong cycle just starts the next one at once
            let mut delay = self.config.interval().saturating_sub(started.elapsed());
            if failed {
                let pause = backoff(
                    failures,
                    Duration::from_secs(self.config.backoff_base_secs),
                    Duration::from_secs(self.config.backoff_max_secs),
                );
                delay = delay.max(pause);
            }

            debug!("Next rotation in {}", format_duration(delay));
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Stop requested while waiting, {} cycles done", seq);
                    return Ok(StopReason::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One full cycle; every per-cycle error ends up in the returned record
    async fn run_cycle(&mut self, seq: u64) -> RotationCycle {
        let started_at = SystemTime::now();
        self.set_phase(Phase::Idle);

        let previous_ip = match self.last_observed {
            Some(ip) => Some(ip),
            None => match self.reporter.fetch().await {
                Ok(observation) => Some(observation.address),
                Err(e) => {
                    self.report("Could not determine current IP", &e);
                    None
                },
            },
        };

        let (method, triggered) = match self.rotate_via_control().await {
            Ok(()) => (RotationMethod::ControlChannel, Ok(())),
            Err(reason) => {
                if !matches!(reason, ControlFailure::Disabled) {
                    self.report("Control channel unusable, restarting Tor instead", &reason);
                }
                (RotationMethod::ServiceRestart, self.service.restart().await)
            },
        };

        let mut observed = None;
        let failure = match triggered {
            Err(e) => Some(CycleFailure::from(&e)),
            Ok(()) => {
                self.settle(method).await;
                self.set_phase(Phase::Verifying);
                match self.reporter.fetch().await {
                    Ok(observation) => {
                        observed = Some(observation);
                        None
                    },
                    Err(e) => Some(CycleFailure::from(&e)),
                }
            },
        };

        let observed_ip = observed.as_ref().map(|o| o.address);
        self.last_observed = observed_ip;
        self.set_phase(Phase::Idle);

        RotationCycle {
            seq,
            started_at,
            finished_at: SystemTime::now(),
            method,
            previous_ip,
            observed_ip,
            observed_location: observed.and_then(|o| o.location()),
            outcome: classify(previous_ip, observed_ip),
            failure,
        }
    }

    /// Request a new identity over the control port
    ///
    /// A reused session that fails is discarded and re-authenticated once.
    async fn rotate_via_control(&mut self) -> Result<(), ControlFailure> {
        if self.control_disabled {
            return Err(ControlFailure::Disabled);
        }

        let reused = self.session.is_some();
        match self.signal_once().await {
            Err(ControlFailure::Signal(e)) if reused => {
                debug!("Stale control session ({}), re-authenticating", e);
                self.signal_once().await
            },
            other => other,
        }
    }

    async fn signal_once(&mut self) -> Result<(), ControlFailure> {
        if self.session.is_none() {
            if self.control_disabled {
                return Err(ControlFailure::Disabled);
            }
            self.set_phase(Phase::Authenticating);
            match self.control.authenticate().await {
                Ok(session) => {
                    self.auth_failures = 0;
                    self.session = Some(session);
                },
                Err(e) => {
                    self.auth_failures += 1;
                    if self.auth_failures >= AUTH_FAILURE_LIMIT {
                        self.control_disabled = true;
                        warn!(
                            "Control port authentication failed {} times in a row, \
                             using service restarts for the rest of the run",
                            self.auth_failures
                        );
                    }
                    return Err(e.into());
                },
            }
        }

        self.set_phase(Phase::Signaling);
        let Some(session) = self.session.as_mut() else {
            return Err(ControlFailure::Disabled);
        };

        let sent = session.signal_new_identity().await;
        match sent {
            Ok(()) => Ok(()),
            Err(e) => {
                self.discard_session().await;
                Err(e.into())
            },
        }
    }

    /// Give Tor time to build circuits before verifying
    async fn settle(&mut self, method: RotationMethod) {
        match method {
            RotationMethod::ControlChannel => {
                tokio::time::sleep(self.config.control_settle()).await;
                self.await_circuit().await;
            },
            RotationMethod::ServiceRestart => {
                debug!(
                    "Waiting {} for Tor to come back up",
                    format_duration(self.config.fallback_settle())
                );
                tokio::time::sleep(self.config.fallback_settle()).await;
            },
        }
    }

    /// Poll until Tor reports an established circuit; only informative
    async fn await_circuit(&mut self) {
        let deadline = Instant::now() + self.config.circuit_wait();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        loop {
            match session.circuit_established().await {
                Ok(true) => {
                    trace!("Circuit established");
                    return;
                },
                Ok(false) => {},
                Err(e) => {
                    debug!("Circuit status query failed: {}", e);
                    return;
                },
            }
            if Instant::now() >= deadline {
                debug!("No established circuit yet, verifying anyway");
                return;
            }
            tokio::time::sleep(CIRCUIT_POLL).await;
        }
    }

    async fn discard_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }

    async fn release_session(&mut self) {
        if self.session.is_some() {
            debug!("Closing control session");
            self.discard_session().await;
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            trace!("{:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Error details are only surfaced in verbose mode
    fn report(&self, context: &str, err: &dyn Display) {
        if self.config.verbose {
            warn!("{}: {}", context, err);
        } else {
            debug!("{}: {}", context, err);
        }
    }

    /// One structured record per cycle plus a human readable line
    fn emit(&self, cycle: &RotationCycle) {
        let ip_or_unknown =
            |ip: Option<IpAddr>| ip.map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
        let elapsed_ms = cycle
            .finished_at
            .duration_since(cycle.started_at)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        info!(
            target: "tornet::cycle",
            seq = cycle.seq,
            method = %cycle.method,
            previous_ip = %ip_or_unknown(cycle.previous_ip),
            observed_ip = %ip_or_unknown(cycle.observed_ip),
            outcome = %cycle.outcome,
            started_at = unix_secs(cycle.started_at),
            finished_at = unix_secs(cycle.finished_at),
            elapsed_ms,
            "rotation cycle finished"
        );

        let total = if self.config.is_unbounded() {
            "∞".to_string()
        } else {
            self.config.count.to_string()
        };
        let location = cycle
            .observed_location
            .as_deref()
            .map(|l| format!(" ({})", l))
            .unwrap_or_default();

        match cycle.outcome {
            Outcome::Success => info!(
                "[{}/{}] IP changed: {} -> {}{}",
                cycle.seq,
                total,
                ip_or_unknown(cycle.previous_ip),
                ip_or_unknown(cycle.observed_ip),
                location
            ),
            Outcome::Unchanged => warn!(
                "[{}/{}] Exit IP unchanged ({}), Tor reused the exit node",
                cycle.seq,
                total,
                ip_or_unknown(cycle.observed_ip)
            ),
            Outcome::Failed => match (&cycle.failure, self.config.verbose) {
                (Some(failure), true) => {
                    warn!("[{}/{}] Rotation failed: {}", cycle.seq, total, failure)
                },
                _ => warn!("[{}/{}] Rotation failed", cycle.seq, total),
            },
        }
    }
}
