//! Rotation history model

use crate::rotation::{Outcome, RotationCycle};
use std::fmt;

/// How a run ended without a fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Configured cycle count reached
    Completed,
    /// External stop request observed at a cycle boundary
    Cancelled,
}

/// Totals for a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: usize,
    pub successes: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub stop_reason: StopReason,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cycles ({} changed, {} unchanged, {} failed)",
            self.cycles, self.successes, self.unchanged, self.failed
        )
    }
}

/// Append-only record of finished cycles
#[derive(Debug, Default)]
pub struct RotationHistory {
    cycles: Vec<RotationCycle>,
    consecutive_failures: u32,
}

impl RotationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finished cycle and update the failure streak
    pub fn record(&mut self, cycle: RotationCycle) {
        if cycle.outcome == Outcome::Failed {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }
        self.cycles.push(cycle);
    }

    pub fn cycles(&self) -> &[RotationCycle] {
        &self.cycles
    }

    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    pub fn last(&self) -> Option<&RotationCycle> {
        self.cycles.last()
    }

    /// Failed cycles since the last non-failed one
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.cycles.iter().filter(|c| c.outcome == outcome).count()
    }

    pub fn summary(&self, stop_reason: StopReason) -> RunSummary {
        RunSummary {
            cycles: self.len(),
            successes: self.count(Outcome::Success),
            unchanged: self.count(Outcome::Unchanged),
            failed: self.count(Outcome::Failed),
            stop_reason,
        }
    }
}
