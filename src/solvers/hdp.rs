use crate::{
    config::SolverConfig,
    model::{ActionId, Ssp, StateId},
    solvers::{
        bellman_update, greedy_action, residual, Label, Solution, SolveStatus, Solver,
        SolverStatistics, StateLabels, TerminationCondition,
    },
};
use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

/// Heuristic dynamic programming: repeated depth-first searches over the
/// greedy graph that label whole strongly connected components as solved
/// once every state in them has converged. Tarjan's algorithm runs on an
/// explicit stack.
#[derive(Debug)]
pub struct Hdp<M: Ssp> {
    model: M,
    epsilon: f64,
    labels: StateLabels,
    max_trials: usize,
    time_limit: Option<Duration>,
    memory_limit_mb: Option<usize>,
}

/// Bookkeeping of one depth-first search.
#[derive(Debug, Default)]
struct Tarjan {
    next_index: usize,
    indices: HashMap<StateId, usize>,
    low: HashMap<StateId, usize>,
    stack: Vec<StateId>,
    in_stack: HashSet<StateId>,
    frames: Vec<Frame>,
}

#[derive(Debug)]
struct Frame {
    state: StateId,
    successors: Vec<StateId>,
    next: usize,
    needed_update: bool,
}

enum Visit {
    /// The state was handled without being opened; the flag says whether it
    /// had to be backed up.
    Done(bool),
    Opened,
}

impl<M: Ssp> Hdp<M> {
    pub fn new(model: M, config: &SolverConfig) -> Self {
        Self {
            model,
            epsilon: config.epsilon,
            labels: StateLabels::new(),
            max_trials: config.max_trials,
            time_limit: config.time_limit(),
            memory_limit_mb: config.memory_limit_mb,
        }
    }

    pub fn is_solved(&self, state: StateId) -> bool {
        self.labels.has(state, Label::Solved)
    }

    fn visit(
        &mut self,
        tarjan: &mut Tarjan,
        state: StateId,
        statistics: &mut SolverStatistics,
    ) -> Visit {
        if self.is_solved(state) || self.model.is_goal(state) || self.model.is_dead_end(state) {
            self.labels.set(state, Label::Solved);
            return Visit::Done(false);
        }
        if residual(&mut self.model, state) > self.epsilon {
            bellman_update(&mut self.model, state);
            statistics.increment_backups(1);
            return Visit::Done(true);
        }
        let Some(action) = greedy_action(&mut self.model, state) else {
            self.labels.set(state, Label::Solved);
            return Visit::Done(false);
        };

        tarjan.indices.insert(state, tarjan.next_index);
        tarjan.low.insert(state, tarjan.next_index);
        tarjan.next_index += 1;
        tarjan.stack.push(state);
        tarjan.in_stack.insert(state);
        let successors = self
            .model
            .transition(state, action)
            .iter()
            .map(|successor| successor.state)
            .collect();
        tarjan.frames.push(Frame {
            state,
            successors,
            next: 0,
            needed_update: false,
        });
        Visit::Opened
    }

    /// One search from `root`; returns whether any state needed an update.
    fn dfs(&mut self, root: StateId, statistics: &mut SolverStatistics) -> bool {
        let mut tarjan = Tarjan::default();
        if let Visit::Done(needed_update) = self.visit(&mut tarjan, root, statistics) {
            return needed_update;
        }

        while let Some(frame) = tarjan.frames.last_mut() {
            if frame.next < frame.successors.len() {
                let state = frame.state;
                let next = frame.successors[frame.next];
                frame.next += 1;
                if !tarjan.indices.contains_key(&next) {
                    if let Visit::Done(needed_update) = self.visit(&mut tarjan, next, statistics) {
                        if let Some(frame) = tarjan.frames.last_mut() {
                            frame.needed_update |= needed_update;
                        }
                    }
                } else if tarjan.in_stack.contains(&next) {
                    let next_index = tarjan.indices[&next];
                    if let Some(low) = tarjan.low.get_mut(&state) {
                        *low = (*low).min(next_index);
                    }
                }
                continue;
            }

            let Some(frame) = tarjan.frames.pop() else {
                break;
            };
            let state = frame.state;
            if frame.needed_update {
                bellman_update(&mut self.model, state);
                statistics.increment_backups(1);
            } else if tarjan.indices[&state] == tarjan.low[&state] {
                // root of a strongly connected component
                let mut labeled = 0;
                while let Some(member) = tarjan.stack.pop() {
                    tarjan.in_stack.remove(&member);
                    self.labels.set(member, Label::Solved);
                    labeled += 1;
                    if member == state {
                        break;
                    }
                }
                statistics.increment_labeled_states(labeled);
            }

            match tarjan.frames.last_mut() {
                Some(parent) => {
                    parent.needed_update |= frame.needed_update;
                    let child_low = tarjan.low[&state];
                    if let Some(low) = tarjan.low.get_mut(&parent.state) {
                        *low = (*low).min(child_low);
                    }
                }
                None => return frame.needed_update,
            }
        }
        false
    }
}

impl<M: Ssp> Solver for Hdp<M> {
    fn solve(&mut self, state: StateId) -> Solution {
        let mut statistics = SolverStatistics::new();
        let mut termination = TerminationCondition::new(self.time_limit, self.memory_limit_mb);
        let mut status = SolveStatus::Converged;
        let mut trials = 0;
        while !self.is_solved(state) {
            if trials >= self.max_trials {
                status = SolveStatus::TrialLimitReached;
                break;
            }
            if let Some(limit) = termination.should_terminate() {
                status = limit;
                break;
            }
            statistics.increment_trials();
            self.dfs(state, &mut statistics);
            trials += 1;
        }
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
        self.labels.clear();
        self.model.reset_values();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domains::{ExplicitDescription, ExplicitProblem, GridWorld},
        model::{Heuristic, Mdp},
        solvers::ValueIteration,
        test_utils::{retry_problem, OPEN_GRID},
    };
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn self_loop_is_one_component() {
        let mut mdp = Mdp::new(retry_problem());
        let s0 = mdp.initial_state();
        let mut hdp = Hdp::new(&mut mdp, &SolverConfig::default());
        assert!(hdp.solve(s0).is_converged());
        assert!(hdp.is_solved(s0));
        assert_approx_eq!(mdp.value(s0), 2., 1e-4);
    }

    #[test]
    fn matches_value_iteration_on_grid() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        let mut reference = Mdp::new(grid.clone());
        let s0 = reference.initial_state();
        ValueIteration::new(&mut reference, &SolverConfig::default()).solve(s0);

        let heuristic = Box::new(grid.manhattan_heuristic());
        let mut mdp = Mdp::with_heuristic(grid, heuristic);
        let mut hdp = Hdp::new(&mut mdp, &SolverConfig::default());
        assert!(hdp.solve(s0).is_converged());
        assert_approx_eq!(mdp.value(s0), reference.value(s0), 1e-3);
    }

    const STEP_COST: f64 = 0.005;

    /// Exact cost to the end of a chain whose states are named by their
    /// position.
    #[derive(Debug)]
    struct DistanceToEnd(usize);

    impl Heuristic<String> for DistanceToEnd {
        fn evaluate(&self, state: &String) -> f64 {
            (self.0 - state.parse::<usize>().unwrap()) as f64 * STEP_COST
        }
    }

    #[test]
    fn deep_chain_does_not_overflow_the_stack() {
        let length = 100_000;
        let names: Vec<String> = (0..=length).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut description = ExplicitDescription::new(&refs, "0", &[refs[length]]);
        for i in 0..length {
            description = description.transition(refs[i], "next", STEP_COST, &[(refs[i + 1], 1.)]);
        }
        let problem = ExplicitProblem::new(description).unwrap();
        let mut mdp = Mdp::with_heuristic(problem, Box::new(DistanceToEnd(length)));
        let s0 = mdp.initial_state();
        let mut hdp = Hdp::new(&mut mdp, &SolverConfig::default());
        assert!(hdp.solve(s0).is_converged());
        assert!(hdp.is_solved(s0));
    }
}
