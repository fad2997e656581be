//! Cumulative compile statistics.

use std::time::Duration;

use super::job::PhaseTimings;

/// Per-phase totals and outcome counts for every job a dispatcher has seen.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompilationStatistics {
    /// Jobs whose code was installed.
    pub succeeded: u64,
    /// Jobs that failed in prepare or execute.
    pub failed: u64,
    /// Jobs that lost the install race.
    pub aborted: u64,
    /// Jobs thrown away by a flush or after failing.
    pub disposed: u64,
    pub total_prepare_time: Duration,
    pub total_execute_time: Duration,
    pub total_finalize_time: Duration,
}

impl CompilationStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_timings(&mut self, timings: &PhaseTimings) {
        self.total_prepare_time += timings.prepare;
        self.total_execute_time += timings.execute;
        self.total_finalize_time += timings.finalize;
    }

    pub fn record_success(&mut self, timings: &PhaseTimings) {
        self.succeeded += 1;
        self.add_timings(timings);
    }

    pub fn record_failure(&mut self, timings: &PhaseTimings) {
        self.failed += 1;
        self.add_timings(timings);
    }

    pub fn record_abort(&mut self, timings: &PhaseTimings) {
        self.aborted += 1;
        self.add_timings(timings);
    }

    pub fn record_disposed(&mut self) {
        self.disposed += 1;
    }

    /// Jobs that reached a final outcome.
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.aborted
    }

    /// Mean execute time over completed jobs.
    pub fn avg_execute_time(&self) -> Duration {
        match u32::try_from(self.completed()) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_execute_time / n,
            Err(_) => Duration::ZERO,
        }
    }

    pub fn total_time(&self) -> Duration {
        self.total_prepare_time + self.total_execute_time + self.total_finalize_time
    }
}

// =============================================================================
// Tests
// =============================================================================
