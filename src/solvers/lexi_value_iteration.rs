use crate::{
    config::SolverConfig,
    model::{ActionId, Ssp, StateId},
    solvers::{
        greedy_action, lexi_bellman_update, LexiValues, Solution, SolveStatus, Solver,
        SolverStatistics, TerminationCondition,
    },
};
use std::time::Duration;
use tracing::debug;

/// Value iteration for problems with several cost functions ranked
/// lexicographically. Each sweep updates every level of every reachable
/// state; level `i` only ranks actions that were within `slack` of the best
/// on all earlier levels. On a single-level problem this is
/// [`ValueIteration`](crate::solvers::ValueIteration).
#[derive(Debug)]
pub struct LexiValueIteration<M: Ssp> {
    model: M,
    values: LexiValues,
    epsilon: f64,
    slack: f64,
    max_iterations: usize,
    time_limit: Option<Duration>,
    memory_limit_mb: Option<usize>,
}

impl<M: Ssp> LexiValueIteration<M> {
    pub fn new(model: M, config: &SolverConfig) -> Self {
        Self {
            model,
            values: LexiValues::new(),
            epsilon: config.epsilon,
            slack: config.slack,
            max_iterations: config.max_trials,
            time_limit: config.time_limit(),
            memory_limit_mb: config.memory_limit_mb,
        }
    }

    /// Current estimates of `state`, one per level.
    pub fn level_values(&self, state: StateId) -> Vec<f64> {
        self.values.levels(&self.model, state)
    }
}

impl<M: Ssp> Solver for LexiValueIteration<M> {
    fn solve(&mut self, state: StateId) -> Solution {
        let mut statistics = SolverStatistics::new();
        let mut termination = TerminationCondition::new(self.time_limit, self.memory_limit_mb);
        let states = self.model.all_states();
        statistics.increment_expanded_states(states.len());
        let last_level = self.model.num_levels().saturating_sub(1);

        let mut status = SolveStatus::TrialLimitReached;
        for iteration in 0..self.max_iterations {
            if let Some(limit) = termination.should_terminate() {
                status = limit;
                break;
            }
            statistics.increment_trials();
            let mut max_residual: f64 = 0.;
            for &s in &states {
                let residual = lexi_bellman_update(
                    &mut self.model,
                    &mut self.values,
                    s,
                    last_level,
                    self.slack,
                );
                max_residual = max_residual.max(residual);
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
        self.values.clear();
        self.model.reset_values();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domains::ExplicitProblem,
        model::Mdp,
        solvers::{lexi_sample_trial, SolverContext, ValueIteration},
        test_utils::{dead_end_problem, lexi_retry_problem, routes_description},
    };
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn second_level_breaks_first_level_ties() {
        let mut mdp = Mdp::new(ExplicitProblem::new(routes_description()).unwrap());
        let s0 = mdp.initial_state();
        let mut solver = LexiValueIteration::new(&mut mdp, &SolverConfig::default());
        let solution = solver.solve(s0);
        assert!(solution.is_converged());
        let values = solver.level_values(s0);
        assert_approx_eq!(values[0], 2.);
        assert_approx_eq!(values[1], 1.);
        assert_eq!(mdp.action(solution.action.unwrap()), "smooth");

        // plain value iteration keeps the first of the tied actions
        let mut plain = Mdp::new(ExplicitProblem::new(routes_description()).unwrap());
        let solution = ValueIteration::new(&mut plain, &SolverConfig::default()).solve(s0);
        assert_eq!(plain.action(solution.action.unwrap()), "fast");
    }

    #[test]
    fn slack_trades_the_first_level_for_the_second() {
        let cheap = || {
            let description = routes_description()
                .transition("S", "cheap", 1.5, &[("G", 1.)])
                .secondary_costs(&[20.]);
            Mdp::new(ExplicitProblem::new(description).unwrap())
        };

        let mut mdp = cheap();
        let s0 = mdp.initial_state();
        let solution = LexiValueIteration::new(&mut mdp, &SolverConfig::default()).solve(s0);
        assert_eq!(mdp.action(solution.action.unwrap()), "cheap");

        let mut mdp = cheap();
        let config = SolverConfig {
            slack: 0.5,
            ..SolverConfig::default()
        };
        let mut solver = LexiValueIteration::new(&mut mdp, &config);
        let solution = solver.solve(s0);
        // the first level keeps the best value the slack is measured from
        let values = solver.level_values(s0);
        assert_approx_eq!(values[0], 1.5);
        assert_approx_eq!(values[1], 1.);
        assert_eq!(mdp.action(solution.action.unwrap()), "smooth");
    }

    #[test]
    fn levels_converge_through_self_loops() {
        let mut mdp = Mdp::new(lexi_retry_problem());
        let s0 = mdp.initial_state();
        let mut solver = LexiValueIteration::new(&mut mdp, &SolverConfig::default());
        assert!(solver.solve(s0).is_converged());
        let values = solver.level_values(s0);
        assert_approx_eq!(values[0], 2., 1e-4);
        assert_approx_eq!(values[1], 6., 1e-4);
        drop(solver);

        let mut context = SolverContext::new(Some(5));
        let runs = 4000;
        let mut totals = [0.; 2];
        for _ in 0..runs {
            let costs = lexi_sample_trial(&mut mdp, s0, context.rng());
            totals[0] += costs[0];
            totals[1] += costs[1];
        }
        assert_approx_eq!(totals[0] / runs as f64, 2., 0.15);
        assert_approx_eq!(totals[1] / runs as f64, 6., 0.45);
    }

    #[test]
    fn single_level_avoids_the_dead_end() {
        let mut mdp = Mdp::new(dead_end_problem());
        let s0 = mdp.initial_state();
        let mut solver = LexiValueIteration::new(&mut mdp, &SolverConfig::default());
        let solution = solver.solve(s0);
        assert_eq!(solver.level_values(s0).len(), 1);
        assert_eq!(mdp.action(solution.action.unwrap()), "safe");
        assert_approx_eq!(mdp.value(s0), 5.);
    }

    #[test]
    fn reset_forgets_secondary_levels() {
        let mut mdp = Mdp::new(lexi_retry_problem());
        let s0 = mdp.initial_state();
        let mut solver = LexiValueIteration::new(&mut mdp, &SolverConfig::default());
        solver.solve(s0);
        solver.reset();
        assert_eq!(solver.level_values(s0)[1], 0.);
    }
}
