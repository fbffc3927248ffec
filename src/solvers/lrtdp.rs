use crate::{
    config::SolverConfig,
    model::{ActionId, Ssp, StateId},
    solvers::{
        greedy_action, Horizon, Labeler, Solution, Solver, SolverContext, SolverStatistics,
        TerminationCondition,
    },
};
use std::time::Duration;

/// Labeled RTDP: greedy trials from the start state, each followed by a
/// convergence check over the full greedy subgraph of the states it
/// visited.
#[derive(Debug)]
pub struct Lrtdp<M: Ssp> {
    model: M,
    labeler: Labeler,
    context: SolverContext,
    max_trials: usize,
    time_limit: Option<Duration>,
    memory_limit_mb: Option<usize>,
}

impl<M: Ssp> Lrtdp<M> {
    pub fn new(model: M, config: &SolverConfig) -> Self {
        Self {
            model,
            labeler: Labeler::new(config.epsilon, Horizon::Unbounded, true),
            context: SolverContext::new(config.seed),
            max_trials: config.max_trials,
            time_limit: config.time_limit(),
            memory_limit_mb: config.memory_limit_mb,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Goals count as solved without ever being labeled.
    pub fn is_solved(&self, state: StateId) -> bool {
        self.model.is_goal(state) || self.labeler.is_solved(state)
    }
}

impl<M: Ssp> Solver for Lrtdp<M> {
    fn solve(&mut self, state: StateId) -> Solution {
        let mut statistics = SolverStatistics::new();
        let mut termination = TerminationCondition::new(self.time_limit, self.memory_limit_mb);
        let status = self.labeler.run_trials(
            &mut self.model,
            state,
            self.max_trials,
            self.context.rng(),
            &mut statistics,
            &mut termination,
        );
        statistics.finalise_solve();
        termination.finalise();
        Solution::from_policy(&self.model, state, status)
    }

    fn best_action(&mut self, state: StateId) -> Option<ActionId> {
        greedy_action(&mut self.model, state)
    }

    fn set_max_trials(&mut self, max_trials: usize) {
        self.max_trials = max_trials;
    }

    fn set_time_limit(&mut self, time_limit: Option<Duration>) {
        self.time_limit = time_limit;
    }

    fn reset(&mut self) {
        self.labeler.clear();
        self.model.reset_values();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domains::GridWorld,
        model::{Mdp, DEAD_END_COST},
        solvers::{SolveStatus, ValueIteration},
        test_utils::{chain_problem, retry_problem, OPEN_GRID, TRAP_GRID},
    };
    use assert_approx_eq::assert_approx_eq;

    fn config() -> SolverConfig {
        SolverConfig {
            seed: Some(21),
            ..SolverConfig::default()
        }
    }

    #[test]
    fn solves_retry_loop_optimally() {
        let mut mdp = Mdp::new(retry_problem());
        let s0 = mdp.initial_state();
        let solution = Lrtdp::new(&mut mdp, &config()).solve(s0);
        assert!(solution.is_converged());
        assert_eq!(mdp.action(solution.action.unwrap()), "retry");
        assert_approx_eq!(mdp.value(s0), 2., 1e-4);
    }

    #[test]
    fn agrees_with_value_iteration_on_grid() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        let mut reference = Mdp::new(grid.clone());
        let s0 = reference.initial_state();
        ValueIteration::new(&mut reference, &config()).solve(s0);

        let heuristic = Box::new(grid.manhattan_heuristic());
        let mut mdp = Mdp::with_heuristic(grid, heuristic);
        let mut lrtdp = Lrtdp::new(&mut mdp, &config());
        let solution = lrtdp.solve(s0);
        assert!(solution.is_converged());
        assert!(lrtdp.is_solved(s0));
        assert_approx_eq!(mdp.value(s0), reference.value(s0), 1e-3);
    }

    #[test]
    fn avoids_the_trap() {
        let grid = GridWorld::from_map(TRAP_GRID).unwrap();
        let mut mdp = Mdp::new(grid);
        let s0 = mdp.initial_state();
        let solution = Lrtdp::new(&mut mdp, &config()).solve(s0);
        assert_eq!(solution.status, SolveStatus::Converged);
        // any policy that risks the trap pays at least a tenth of the
        // dead-end cost
        assert!(mdp.value(s0) < 0.1 * DEAD_END_COST);
        assert_eq!(mdp.action(solution.action.unwrap()).to_string(), "left");
    }

    #[test]
    fn trial_budget_is_reported() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        let mut mdp = Mdp::new(grid);
        let s0 = mdp.initial_state();
        let mut lrtdp = Lrtdp::new(&mut mdp, &config());
        lrtdp.set_max_trials(1);
        assert_eq!(lrtdp.solve(s0).status, SolveStatus::TrialLimitReached);
        lrtdp.reset();
        assert!(!lrtdp.is_solved(s0));
        assert!(!lrtdp.model().record(s0).is_initialised());
    }

    #[test]
    fn goals_are_solved() {
        let mut mdp = Mdp::new(chain_problem());
        let s0 = mdp.initial_state();
        let c = mdp.lookup(&"C".to_string()).unwrap();
        let mut lrtdp = Lrtdp::new(&mut mdp, &config());
        assert!(lrtdp.is_solved(c));
        assert!(!lrtdp.is_solved(s0));
        assert!(lrtdp.solve(s0).is_converged());
        assert!(lrtdp.is_solved(s0));
    }
}
