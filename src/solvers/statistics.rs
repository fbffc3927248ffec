use std::time::Instant;
use tracing::{debug, info};

/// Counters shared by the solvers, logged periodically while a solve runs.
#[derive(Debug)]
pub struct SolverStatistics {
    /// Number of trials (or rollouts) started
    trials: u64,
    /// Number of Bellman backups applied
    backups: u64,
    /// Number of states expanded for the first time
    expanded_states: u64,
    /// Number of convergence checks run
    check_solved_calls: u64,
    /// Number of states labeled as solved
    labeled_states: u64,
    /// Time when the solve started
    solve_start_time: Instant,
    /// Time when the last log was printed, used for periodic logging
    last_log_time: Instant,
}

impl Default for SolverStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverStatistics {
    pub fn new() -> Self {
        debug!("starting solve");
        Self {
            trials: 0,
            backups: 0,
            expanded_states: 0,
            check_solved_calls: 0,
            labeled_states: 0,
            solve_start_time: Instant::now(),
            last_log_time: Instant::now(),
        }
    }

    pub fn increment_trials(&mut self) {
        self.trials += 1;
        self.log_if_needed();
    }

    pub fn increment_backups(&mut self, num_backups: usize) {
        self.backups += num_backups as u64;
        self.log_if_needed();
    }

    pub fn increment_expanded_states(&mut self, num_states: usize) {
        self.expanded_states += num_states as u64;
        self.log_if_needed();
    }

    pub fn increment_check_solved_calls(&mut self) {
        self.check_solved_calls += 1;
        self.log_if_needed();
    }

    pub fn increment_labeled_states(&mut self, num_states: usize) {
        self.labeled_states += num_states as u64;
        self.log_if_needed();
    }

    pub fn trials(&self) -> u64 {
        self.trials
    }

    pub fn backups(&self) -> u64 {
        self.backups
    }

    fn log_if_needed(&mut self) {
        if self.last_log_time.elapsed().as_secs() > 10 {
            self.last_log_time = Instant::now();
            self.log();
        }
    }

    fn log(&self) {
        info!(
            trials = self.trials,
            backups = self.backups,
            expanded_states = self.expanded_states,
            check_solved_calls = self.check_solved_calls,
            labeled_states = self.labeled_states,
        );
    }

    /// Online solvers call `solve` once per executed step, so the summary is
    /// logged at debug level.
    pub fn finalise_solve(&self) {
        debug!(
            trials = self.trials,
            backups = self.backups,
            expanded_states = self.expanded_states,
            check_solved_calls = self.check_solved_calls,
            labeled_states = self.labeled_states,
            solve_duration = self.solve_start_time.elapsed().as_secs_f64(),
        );
    }
}
