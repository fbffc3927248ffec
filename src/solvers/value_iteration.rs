use crate::{
    config::SolverConfig,
    model::{ActionId, Ssp, StateId},
    solvers::{
        bellman_update, greedy_action, Solution, SolveStatus, Solver, SolverStatistics,
        TerminationCondition,
    },
};
use std::time::Duration;
use tracing::debug;

/// Synchronous sweeps of Bellman updates over every reachable state.
#[derive(Debug)]
pub struct ValueIteration<M: Ssp> {
    model: M,
    epsilon: f64,
    max_iterations: usize,
    time_limit: Option<Duration>,
    memory_limit_mb: Option<usize>,
}

impl<M: Ssp> ValueIteration<M> {
    pub fn new(model: M, config: &SolverConfig) -> Self {
        Self {
            model,
            epsilon: config.epsilon,
            max_iterations: config.max_trials,
            time_limit: config.time_limit(),
            memory_limit_mb: config.memory_limit_mb,
        }
    }
}

impl<M: Ssp> Solver for ValueIteration<M> {
    fn solve(&mut self, state: StateId) -> Solution {
        let mut statistics = SolverStatistics::new();
        let mut termination = TerminationCondition::new(self.time_limit, self.memory_limit_mb);
        let states = self.model.all_states();
        statistics.increment_expanded_states(states.len());

        let mut status = SolveStatus::TrialLimitReached;
        for iteration in 0..self.max_iterations {
            if let Some(limit) = termination.should_terminate() {
                status = limit;
                break;
            }
            statistics.increment_trials();
            let mut max_residual: f64 = 0.;
            for &s in &states {
                max_residual = max_residual.max(bellman_update(&mut self.model, s));
            }
            statistics.increment_backups(states.len());
            debug!(iteration, max_residual);
            if max_residual < self.epsilon {
                status = SolveStatus::Converged;
                break;
            }
        }
        statistics.finalise_solve();
        termination.finalise();
        Solution::from_policy(&self.model, state, status)
    }

    fn best_action(&mut self, state: StateId) -> Option<ActionId> {
        greedy_action(&mut self.model, state)
    }

    fn set_max_trials(&mut self, max_trials: usize) {
        self.max_iterations = max_trials;
    }

    fn set_time_limit(&mut self, time_limit: Option<Duration>) {
        self.time_limit = time_limit;
    }

    fn reset(&mut self) {
        self.model.reset_values();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domains::GridWorld,
        model::{Mdp, DEAD_END_COST},
        test_utils::{chain_problem, HOPELESS_GRID},
    };
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn chain_values() {
        let mut mdp = Mdp::new(chain_problem());
        let s0 = mdp.initial_state();
        let solution = ValueIteration::new(&mut mdp, &SolverConfig::default()).solve(s0);
        assert!(solution.is_converged());
        let values: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|name| mdp.value(mdp.lookup(&name.to_string()).unwrap()))
            .collect();
        assert_approx_eq!(values[0], 2.);
        assert_approx_eq!(values[1], 1.);
        assert_approx_eq!(values[2], 0.);
    }

    #[test]
    fn iteration_budget_is_reported() {
        let mut mdp = Mdp::new(chain_problem());
        let s0 = mdp.initial_state();
        let mut solver = ValueIteration::new(&mut mdp, &SolverConfig::default());
        solver.set_max_trials(1);
        assert_eq!(solver.solve(s0).status, SolveStatus::TrialLimitReached);
    }

    #[test]
    fn walled_in_start_is_a_dead_end() {
        let grid = GridWorld::from_map(HOPELESS_GRID).unwrap();
        let mut mdp = Mdp::new(grid);
        let s0 = mdp.initial_state();
        let solution = ValueIteration::new(&mut mdp, &SolverConfig::default()).solve(s0);
        assert_eq!(solution.status, SolveStatus::DeadEnd);
        assert_eq!(solution.action, None);
        assert_approx_eq!(mdp.value(s0), DEAD_END_COST);
    }
}
