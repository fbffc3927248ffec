//! Trial-based labeling shared by LRTDP, FLARES and myopic LRTDP.
//!
//! A trial follows the greedy policy from a state, backing up every state it
//! meets, and then walks the trajectory backwards asking `check_solved`
//! whether the greedy subgraph below each state has converged. Converged
//! subgraphs are labeled so later trials stop as soon as they reach them.

use crate::{
    model::{Ssp, StateId, DEAD_END_COST},
    solvers::{
        bellman_update, greedy_action, random_successor, residual, Label, SolveStatus,
        SolverStatistics, StateLabels, TerminationCondition,
    },
};
use rand::Rng;
use std::collections::HashSet;

/// How far below its root `check_solved` explores, and which of the
/// explored states it may label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Horizon {
    /// Explore the whole greedy subgraph.
    Unbounded,
    /// Depth counts steps.
    Steps(usize),
    /// Depth is the log-probability of the trajectory; states reached with
    /// probability below the threshold are beyond the horizon.
    Probability(f64),
}

impl Horizon {
    fn next_depth(&self, depth: f64, probability: f64) -> f64 {
        match self {
            Horizon::Probability(_) => depth + probability.ln(),
            _ => depth + 1.,
        }
    }

    /// Exploration stops at twice the horizon.
    fn beyond_cutoff(&self, depth: f64) -> bool {
        match *self {
            Horizon::Unbounded => false,
            Horizon::Steps(horizon) => depth > 2. * horizon as f64,
            Horizon::Probability(threshold) => depth < 2. * threshold.ln(),
        }
    }

    /// States at `depth` may be labeled as solved within the horizon.
    fn contains(&self, depth: f64) -> bool {
        match *self {
            Horizon::Unbounded => true,
            Horizon::Steps(horizon) => depth <= horizon as f64,
            Horizon::Probability(threshold) => depth > threshold.ln(),
        }
    }

    /// The next horizon tried when searching for a fully solved start
    /// state.
    pub fn widened(&self) -> Horizon {
        match *self {
            Horizon::Steps(horizon) => Horizon::Steps(2 * horizon + 1),
            Horizon::Probability(threshold) => Horizon::Probability(threshold * threshold),
            Horizon::Unbounded => Horizon::Unbounded,
        }
    }
}

/// Labels states as trials converge them. With `full_labels`, a state whose
/// entire greedy subgraph converged inside the horizon is labeled
/// [`Label::Solved`]; otherwise only [`Label::DepthSolved`] is ever set.
#[derive(Debug, Clone)]
pub struct Labeler {
    epsilon: f64,
    horizon: Horizon,
    full_labels: bool,
    dead_ends_fail: bool,
    labels: StateLabels,
}

impl Labeler {
    pub fn new(epsilon: f64, horizon: Horizon, full_labels: bool) -> Self {
        Self {
            epsilon,
            horizon,
            full_labels,
            dead_ends_fail: false,
            labels: StateLabels::new(),
        }
    }

    /// Makes `check_solved` fail on any dead end in the explored subgraph,
    /// so a policy that can reach a dead end is never labeled.
    pub fn with_failing_dead_ends(mut self) -> Self {
        self.dead_ends_fail = true;
        self
    }

    pub fn horizon(&self) -> Horizon {
        self.horizon
    }

    pub fn set_horizon(&mut self, horizon: Horizon) {
        self.horizon = horizon;
    }

    pub fn labels(&self) -> &StateLabels {
        &self.labels
    }

    /// Solved, either fully or within the horizon.
    pub fn is_labeled(&self, state: StateId) -> bool {
        self.labels.has(state, Label::Solved) || self.labels.has(state, Label::DepthSolved)
    }

    pub fn is_solved(&self, state: StateId) -> bool {
        self.labels.has(state, Label::Solved)
    }

    /// Drops the labels that were only valid for the current horizon.
    /// Fully solved states stay labeled.
    pub fn clear_depth_labels(&mut self) {
        self.labels.clear_label(Label::DepthSolved);
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }

    pub fn trial<M, R>(
        &mut self,
        model: &mut M,
        state: StateId,
        rng: &mut R,
        statistics: &mut SolverStatistics,
    ) where
        M: Ssp + ?Sized,
        R: Rng,
    {
        statistics.increment_trials();
        let mut current = state;
        let mut visited = vec![];
        let mut accumulated_cost = 0.;
        while !self.is_labeled(current) && !model.is_goal(current) {
            visited.push(current);
            bellman_update(model, current);
            statistics.increment_backups(1);
            if model.is_dead_end(current) || accumulated_cost >= DEAD_END_COST {
                break;
            }
            let Some(action) = greedy_action(model, current) else {
                break;
            };
            accumulated_cost += model.cost(current, action);
            current = random_successor(model, current, Some(action), rng);
        }

        while let Some(state) = visited.pop() {
            if !self.check_solved(model, state, statistics) {
                break;
            }
        }
    }

    /// Depth-first search over the greedy subgraph of `state`. If every
    /// state found has a residual of at most epsilon they are labeled,
    /// otherwise they are all backed up again in reverse discovery order.
    /// Dead ends that were already known count as converged unless the labeler was built
    /// [`with_failing_dead_ends`](Labeler::with_failing_dead_ends).
    pub fn check_solved<M: Ssp + ?Sized>(
        &mut self,
        model: &mut M,
        state: StateId,
        statistics: &mut SolverStatistics,
    ) -> bool {
        statistics.increment_check_solved_calls();
        if self.is_labeled(state) {
            return true;
        }

        let mut open = vec![(state, 0.)];
        let mut closed = vec![];
        let mut closed_set = HashSet::new();
        let mut converged = true;
        let mut within_horizon = self.full_labels;
        while let Some((current, depth)) = open.pop() {
            if self.horizon.beyond_cutoff(depth) {
                within_horizon = false;
                continue;
            }
            if model.is_goal(current) || !closed_set.insert(current) {
                continue;
            }
            closed.push((current, depth));

            let known_dead_end = model.is_dead_end(current);
            let Some(action) = greedy_action(model, current) else {
                // a dead end found just now changes its own value, and so
                // its predecessors'
                converged &= known_dead_end && !self.dead_ends_fail;
                continue;
            };
            if residual(model, current) > self.epsilon {
                converged = false;
            }
            for successor in model.transition(current, action) {
                let next = successor.state;
                if !self.is_labeled(next) && !closed_set.contains(&next) {
                    open.push((next, self.horizon.next_depth(depth, successor.probability)));
                } else if self.labels.has(next, Label::DepthSolved)
                    && !self.labels.has(next, Label::Solved)
                {
                    within_horizon = false;
                }
            }
        }

        if converged {
            let mut labeled = 0;
            for &(state, depth) in &closed {
                if within_horizon {
                    self.labels.set(state, Label::Solved);
                    self.labels.set(state, Label::DepthSolved);
                    labeled += 1;
                } else if self.horizon.contains(depth) {
                    self.labels.set(state, Label::DepthSolved);
                    labeled += 1;
                }
            }
            statistics.increment_labeled_states(labeled);
        } else {
            for &(state, _) in closed.iter().rev() {
                bellman_update(model, state);
            }
            statistics.increment_backups(closed.len());
        }
        converged
    }

    /// Runs trials from `state` until it is labeled, it is a goal, or a
    /// limit is hit.
    pub fn run_trials<M, R>(
        &mut self,
        model: &mut M,
        state: StateId,
        max_trials: usize,
        rng: &mut R,
        statistics: &mut SolverStatistics,
        termination: &mut TerminationCondition,
    ) -> SolveStatus
    where
        M: Ssp + ?Sized,
        R: Rng,
    {
        let mut trials = 0;
        while !self.is_labeled(state) && !model.is_goal(state) {
            if trials >= max_trials {
                return SolveStatus::TrialLimitReached;
            }
            if let Some(status) = termination.should_terminate() {
                return status;
            }
            self.trial(model, state, rng, statistics);
            trials += 1;
            if self.dead_ends_fail && model.is_dead_end(state) {
                // nothing below a dead start state can ever be labeled
                return SolveStatus::DeadEnd;
            }
        }
        SolveStatus::Converged
    }

    /// Runs rounds of trials with a widening step horizon, starting from
    /// zero, until `state` is fully solved. A round that cannot even solve
    /// `state` within its horizon ends the search.
    pub fn run_widening<M, R>(
        &mut self,
        model: &mut M,
        state: StateId,
        max_trials: usize,
        rng: &mut R,
        statistics: &mut SolverStatistics,
        termination: &mut TerminationCondition,
    ) -> SolveStatus
    where
        M: Ssp + ?Sized,
        R: Rng,
    {
        self.horizon = Horizon::Steps(0);
        loop {
            let status = self.run_trials(model, state, max_trials, rng, statistics, termination);
            if status != SolveStatus::Converged {
                return status;
            }
            if self.is_solved(state) || model.is_goal(state) {
                return SolveStatus::Converged;
            }
            self.horizon = self.horizon.widened();
            tracing::debug!(horizon = ?self.horizon, "widening horizon");
            self.clear_depth_labels();
        }
    }
}
