use crate::{
    config::SolverConfig,
    model::{ActionId, Ssp, StateId, DEAD_END_COST},
    solvers::{
        bellman_update, greedy_action, weighted_bellman_update, Solution, SolveStatus, Solver,
        SolverStatistics, TerminationCondition,
    },
};
use std::{collections::HashSet, time::Duration};

/// Error reported by a convergence test whose greedy graph is still
/// changing.
const NOT_CONVERGED: f64 = DEAD_END_COST + 1.;

/// LAO*, with weighted LAO* when the weight differs from one.
///
/// Alternates expansion passes, which grow the best partial solution graph
/// by one layer of tip states, with convergence passes, which back up the
/// graph in post-order until the largest change is below epsilon. Both
/// passes walk the graph with an explicit stack.
#[derive(Debug)]
pub struct LaoStar<M: Ssp> {
    model: M,
    epsilon: f64,
    weight: f64,
    max_iterations: usize,
    time_limit: Option<Duration>,
    memory_limit_mb: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Expand,
    TestConvergence,
}

#[derive(Debug)]
struct Frame {
    state: StateId,
    action: ActionId,
    successors: Vec<StateId>,
    next: usize,
}

#[derive(Debug)]
struct Sweep {
    pass: Pass,
    visited: HashSet<StateId>,
    stack: Vec<Frame>,
    expanded: usize,
    error: f64,
}

impl<M: Ssp> LaoStar<M> {
    pub fn new(model: M, config: &SolverConfig) -> Self {
        Self {
            model,
            epsilon: config.epsilon,
            weight: config.weight,
            max_iterations: config.max_trials,
            time_limit: config.time_limit(),
            memory_limit_mb: config.memory_limit_mb,
        }
    }

    /// Plain LAO* without limits, for finite sub-problems that must be
    /// solved to convergence.
    pub(crate) fn unbounded(model: M, epsilon: f64) -> Self {
        Self {
            model,
            epsilon,
            weight: 1.,
            max_iterations: usize::MAX,
            time_limit: None,
            memory_limit_mb: None,
        }
    }

    fn update(&mut self, state: StateId) -> f64 {
        if self.weight == 1. {
            bellman_update(&mut self.model, state)
        } else {
            weighted_bellman_update(&mut self.model, state, self.weight)
        }
    }

    fn enter(&mut self, sweep: &mut Sweep, state: StateId) {
        if !sweep.visited.insert(state)
            || self.model.is_dead_end(state)
            || self.model.is_goal(state)
        {
            return;
        }
        match self.model.best_action(state) {
            None => match sweep.pass {
                Pass::Expand => {
                    self.update(state);
                    sweep.expanded += 1;
                }
                Pass::TestConvergence => sweep.error = NOT_CONVERGED,
            },
            Some(action) => {
                let successors = self
                    .model
                    .transition(state, action)
                    .iter()
                    .map(|successor| successor.state)
                    .collect();
                sweep.stack.push(Frame {
                    state,
                    action,
                    successors,
                    next: 0,
                });
            }
        }
    }

    /// Post-order walk of the best partial solution graph below `root`.
    fn sweep(&mut self, root: StateId, pass: Pass, statistics: &mut SolverStatistics) -> Sweep {
        let mut sweep = Sweep {
            pass,
            visited: HashSet::new(),
            stack: vec![],
            expanded: 0,
            error: 0.,
        };
        self.enter(&mut sweep, root);
        while let Some(frame) = sweep.stack.last_mut() {
            if frame.next < frame.successors.len() {
                let next = frame.successors[frame.next];
                frame.next += 1;
                self.enter(&mut sweep, next);
                continue;
            }
            let Some(frame) = sweep.stack.pop() else {
                break;
            };
            let change = self.update(frame.state);
            if pass == Pass::TestConvergence {
                sweep.error = sweep.error.max(change);
                if self.model.best_action(frame.state) != Some(frame.action) {
                    sweep.error = NOT_CONVERGED;
                }
            }
        }
        statistics.increment_backups(sweep.visited.len());
        statistics.increment_expanded_states(sweep.expanded);
        sweep
    }

    pub(crate) fn run(
        &mut self,
        root: StateId,
        statistics: &mut SolverStatistics,
        termination: &mut TerminationCondition,
    ) -> SolveStatus {
        let mut iterations = 0;
        loop {
            loop {
                if iterations >= self.max_iterations {
                    return SolveStatus::TrialLimitReached;
                }
                if let Some(status) = termination.should_terminate() {
                    return status;
                }
                iterations += 1;
                statistics.increment_trials();
                if self.sweep(root, Pass::Expand, statistics).expanded == 0 {
                    break;
                }
            }

            loop {
                if iterations >= self.max_iterations {
                    return SolveStatus::TrialLimitReached;
                }
                if let Some(status) = termination.should_terminate() {
                    return status;
                }
                iterations += 1;
                let error = self.sweep(root, Pass::TestConvergence, statistics).error;
                if error < self.epsilon {
                    return SolveStatus::Converged;
                }
                if error > DEAD_END_COST {
                    // the graph changed, its new tips need expanding
                    break;
                }
            }
        }
    }
}

impl<M: Ssp> Solver for LaoStar<M> {
    fn solve(&mut self, state: StateId) -> Solution {
        let mut statistics = SolverStatistics::new();
        let mut termination = TerminationCondition::new(self.time_limit, self.memory_limit_mb);
        let status = self.run(state, &mut statistics, &mut termination);
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
        model::Mdp,
        solvers::{best_partial_solution_graph, ValueIteration},
        test_utils::{retry_problem, OPEN_GRID},
    };
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn solves_retry_loop() {
        let mut mdp = Mdp::new(retry_problem());
        let s0 = mdp.initial_state();
        let solution = LaoStar::new(&mut mdp, &SolverConfig::default()).solve(s0);
        assert!(solution.is_converged());
        assert_approx_eq!(mdp.value(s0), 2., 1e-4);
    }

    #[test]
    fn admissible_heuristic_keeps_graph_small() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        let mut reference = Mdp::new(grid.clone());
        let s0 = reference.initial_state();
        ValueIteration::new(&mut reference, &SolverConfig::default()).solve(s0);

        let heuristic = Box::new(grid.manhattan_heuristic());
        let mut mdp = Mdp::with_heuristic(grid, heuristic);
        let solution = LaoStar::new(&mut mdp, &SolverConfig::default()).solve(s0);
        assert!(solution.is_converged());
        assert_approx_eq!(mdp.value(s0), reference.value(s0), 1e-3);
        let graph = best_partial_solution_graph(&mut mdp, s0);
        assert!(graph.iter().all(|&s| mdp.is_goal(s) || mdp.best_action(s).is_some()));
    }

    #[test]
    fn weighted_search_finds_a_proper_policy() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        let mut reference = Mdp::new(grid.clone());
        let s0 = reference.initial_state();
        ValueIteration::new(&mut reference, &SolverConfig::default()).solve(s0);

        let heuristic = Box::new(grid.manhattan_heuristic());
        let mut mdp = Mdp::with_heuristic(grid, heuristic);
        let config = SolverConfig {
            weight: 2.,
            ..SolverConfig::default()
        };
        let solution = LaoStar::new(&mut mdp, &config).solve(s0);
        assert!(solution.is_converged());
        assert!(solution.action.is_some());
        // the converged graph is closed, so its value is that of a proper
        // policy
        assert!(mdp.value(s0) >= reference.value(s0) - 1e-3);
        assert!(mdp.value(s0) < DEAD_END_COST);
    }
}
