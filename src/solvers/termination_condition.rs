use crate::solvers::SolveStatus;
use memory_stats::memory_stats;
use std::time::{Duration, Instant};
use tracing::debug;

/// Resource usage is reported at most this often during a solve.
const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// The wall-clock deadline and memory ceiling of a single `solve` call.
/// Solvers poll it between trials (or rollouts, or sweeps); nothing is
/// interrupted halfway.
///
/// Memory is only sampled on every poll when a memory limit is set,
/// otherwise once per report.
#[derive(Debug)]
pub struct TerminationCondition {
    started: Instant,
    deadline: Option<Instant>,
    memory_limit_mb: Option<usize>,
    peak_memory_mb: Option<usize>,
    next_report: Instant,
}

impl TerminationCondition {
    pub fn new(time_limit: Option<Duration>, memory_limit_mb: Option<usize>) -> Self {
        let started = Instant::now();
        debug!(
            time_limit = time_limit.map(|limit| limit.as_secs_f64()),
            memory_limit_mb,
        );
        Self {
            started,
            // a limit too large to represent is no limit
            deadline: time_limit.and_then(|limit| started.checked_add(limit)),
            memory_limit_mb,
            peak_memory_mb: None,
            next_report: started + REPORT_INTERVAL,
        }
    }

    fn sample_memory(&mut self) -> Option<usize> {
        let usage = memory_stats().map(|usage| usage.physical_mem / 1024 / 1024);
        self.peak_memory_mb = self.peak_memory_mb.max(usage);
        usage
    }

    /// Whether the deadline has passed. Cheaper than
    /// [`should_terminate`](Self::should_terminate), for polling inside a
    /// single trial.
    pub fn is_past_deadline(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// The status to stop with, if a limit has been hit.
    pub fn should_terminate(&mut self) -> Option<SolveStatus> {
        let now = Instant::now();
        if now >= self.next_report {
            self.next_report = now + REPORT_INTERVAL;
            let memory_usage_mb = self.sample_memory();
            debug!(
                memory_usage_mb,
                time_elapsed = self.started.elapsed().as_secs_f64(),
            );
        } else if self.memory_limit_mb.is_some() {
            self.sample_memory();
        }

        if self.is_past_deadline() {
            return Some(SolveStatus::TimeLimitExceeded);
        }
        match (self.memory_limit_mb, self.peak_memory_mb) {
            (Some(limit), Some(peak)) if peak > limit => Some(SolveStatus::MemoryLimitExceeded),
            _ => None,
        }
    }

    pub fn finalise(&mut self) {
        debug!(
            peak_recorded_memory_usage_mb = self.peak_memory_mb,
            total_time_used = self.started.elapsed().as_secs_f64(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_limits_never_terminate() {
        let mut termination = TerminationCondition::new(None, None);
        assert!(!termination.is_past_deadline());
        assert_eq!(termination.should_terminate(), None);
    }

    #[test]
    fn zero_time_limit_terminates() {
        let mut termination = TerminationCondition::new(Some(Duration::ZERO), None);
        std::thread::sleep(Duration::from_millis(2));
        assert!(termination.is_past_deadline());
        assert_eq!(
            termination.should_terminate(),
            Some(SolveStatus::TimeLimitExceeded)
        );
        termination.finalise();
    }

    #[test]
    fn huge_time_limit_is_no_limit() {
        let mut termination = TerminationCondition::new(Some(Duration::MAX), None);
        assert_eq!(termination.should_terminate(), None);
    }

    #[test]
    fn tiny_memory_limit_terminates_at_once() {
        let mut termination = TerminationCondition::new(None, Some(0));
        // platforms without memory statistics never hit the limit
        if memory_stats().is_some() {
            assert_eq!(
                termination.should_terminate(),
                Some(SolveStatus::MemoryLimitExceeded)
            );
        }
    }
}
