//! Trial-based heuristic tree search.
//!
//! The search tree alternates decision nodes (states) and chance nodes
//! (state-action pairs). Each trial walks down from the root, selecting an
//! action at every decision node and an outcome at every chance node,
//! explicating new nodes on the way, and backs the observed cost up along
//! the same path. Outcomes reaching the same state below one chance node
//! share a decision node. The tree only lives for one call to `solve`.

use crate::{
    config::{SolverConfig, ThtsConfig},
    model::{ActionId, Ssp, StateId, DEAD_END_COST},
    solvers::{
        bellman_update, qvalue, Solution, SolveStatus, Solver, SolverContext, SolverStatistics,
        TerminationCondition,
    },
};
use itertools::Itertools;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use strum_macros::Display;
use tracing::debug;

/// Probability mass of solved outcomes at which a chance node counts as
/// solved.
const SOLVED_TOLERANCE: f64 = 1e-6;

/// Scores closer than this are ties.
const TIE_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ThtsActionSelection {
    /// The unsolved action with the lowest estimate.
    Greedy,
    /// UCB1 on estimates normalised over the node's actions.
    Ucb1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ThtsOutcomeSelection {
    /// Sample the transition function restricted to unsolved outcomes.
    TransitionFunction,
    /// The outcome whose weighted value variance is smallest.
    MinVariance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ThtsBackup {
    /// Running average of trial costs.
    MonteCarlo,
    /// Action cost plus the visit-weighted average of the outcome values.
    MaxMonteCarlo,
    /// Action cost plus the probability-weighted average of the explicated
    /// outcome values, with solved labels.
    PartialBellman,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ThtsRecommendation {
    BestValue,
    MostPlayed,
}

#[derive(Debug)]
struct DecisionNode {
    state: StateId,
    depth: usize,
    parent: Option<usize>,
    /// Probability of this outcome under the parent's action.
    probability: f64,
    value: f64,
    solved: bool,
    expanded: bool,
    backups: usize,
    selections: usize,
    samples: usize,
    mean: f64,
    squared_deviations: f64,
    children: Vec<usize>,
}

impl DecisionNode {
    fn new(state: StateId, depth: usize, parent: Option<usize>, probability: f64) -> Self {
        Self {
            state,
            depth,
            parent,
            probability,
            value: 0.,
            solved: false,
            expanded: false,
            backups: 0,
            selections: 0,
            samples: 0,
            mean: 0.,
            squared_deviations: 0.,
            children: vec![],
        }
    }

    /// Welford's update of the mean and variance of trial costs.
    fn record_sample(&mut self, cost: f64) {
        self.samples += 1;
        let delta = cost - self.mean;
        self.mean += delta / self.samples as f64;
        self.squared_deviations += delta * (cost - self.mean);
    }

    fn variance(&self) -> f64 {
        if self.samples == 0 {
            0.
        } else {
            self.squared_deviations / self.samples as f64
        }
    }
}

#[derive(Debug)]
struct ChanceNode {
    action: ActionId,
    depth: usize,
    parent: usize,
    value: f64,
    solved: bool,
    backups: usize,
    selections: usize,
    solved_probability: f64,
    children: Vec<usize>,
    children_by_state: HashMap<StateId, usize>,
}

/// Arena holding the nodes of one search. Node indices are positions in
/// the arena; the root is decision node 0.
#[derive(Debug, Default)]
struct Tree {
    decisions: Vec<DecisionNode>,
    chances: Vec<ChanceNode>,
    expansions_in_trial: usize,
}

impl Tree {
    fn new(root: StateId) -> Self {
        Self {
            decisions: vec![DecisionNode::new(root, 0, None, 1.)],
            ..Self::default()
        }
    }

    fn len(&self) -> usize {
        self.decisions.len() + self.chances.len()
    }

    fn root(&self) -> &DecisionNode {
        &self.decisions[0]
    }

    /// Adds the probability of a newly solved outcome to its parent.
    fn mark_solved(&mut self, decision: usize) {
        let node = &mut self.decisions[decision];
        if node.solved {
            return;
        }
        node.solved = true;
        let probability = node.probability;
        if let Some(parent) = node.parent {
            self.chances[parent].solved_probability += probability;
        }
    }
}

/// Trial-based heuristic tree search with configurable action selection,
/// outcome selection, backup and recommendation rules.
#[derive(Debug)]
pub struct Thts<M: Ssp> {
    model: M,
    rules: ThtsConfig,
    max_trials: usize,
    max_depth: usize,
    virtual_rollouts: usize,
    context: SolverContext,
    time_limit: Option<Duration>,
    memory_limit_mb: Option<usize>,
}

impl<M: Ssp> Thts<M> {
    pub fn new(model: M, config: &SolverConfig) -> Self {
        Self {
            model,
            rules: config.thts.clone(),
            max_trials: config.max_rollouts,
            max_depth: config.max_depth,
            virtual_rollouts: config.virtual_rollouts,
            context: SolverContext::new(config.seed),
            time_limit: config.time_limit(),
            memory_limit_mb: config.memory_limit_mb,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    fn expand(&mut self, tree: &mut Tree, decision: usize) {
        let state = tree.decisions[decision].state;
        let depth = tree.decisions[decision].depth;
        let mut value = DEAD_END_COST;
        for action in self.model.applicable_actions(state) {
            let estimate = qvalue(&mut self.model, state, action);
            value = value.min(estimate);
            tree.decisions[decision].children.push(tree.chances.len());
            tree.chances.push(ChanceNode {
                action,
                depth,
                parent: decision,
                value: estimate,
                solved: false,
                backups: self.virtual_rollouts,
                selections: self.virtual_rollouts,
                solved_probability: 0.,
                children: vec![],
                children_by_state: HashMap::new(),
            });
        }
        let node = &mut tree.decisions[decision];
        node.value = value;
        node.backups = self.virtual_rollouts * node.children.len();
        node.selections += node.backups;
        node.expanded = true;
    }

    fn visit_decision(&mut self, tree: &mut Tree, decision: usize) -> f64 {
        tree.decisions[decision].selections += 1;
        let state = tree.decisions[decision].state;
        if self.model.is_goal(state) {
            let node = &mut tree.decisions[decision];
            node.backups += 1;
            node.value = self.model.goal_cost(state);
            let value = node.value;
            if self.rules.backup == ThtsBackup::PartialBellman {
                tree.mark_solved(decision);
            }
            return value;
        }
        if !tree.decisions[decision].expanded {
            self.expand(tree, decision);
        }
        if tree.decisions[decision].children.is_empty() {
            bellman_update(&mut self.model, state);
            let node = &mut tree.decisions[decision];
            node.backups += 1;
            node.value = DEAD_END_COST;
            if self.rules.backup == ThtsBackup::PartialBellman {
                tree.mark_solved(decision);
            }
            return DEAD_END_COST;
        }

        let chance = self
            .select_action(tree, decision)
            .unwrap_or(tree.decisions[decision].children[0]);
        let cumulative = self.visit_chance(tree, chance);
        self.backup_decision(tree, decision, cumulative);
        cumulative
    }

    fn visit_chance(&mut self, tree: &mut Tree, chance: usize) -> f64 {
        tree.chances[chance].selections += 1;
        let state = tree.decisions[tree.chances[chance].parent].state;
        let action = tree.chances[chance].action;
        let gamma = self.model.gamma();
        let mut cumulative = self.model.cost(state, action);

        let outcome = if tree.expansions_in_trial < self.rules.max_expansions_per_trial
            && tree.chances[chance].depth < self.max_depth
        {
            self.select_outcome(tree, chance)
        } else {
            None
        };
        match outcome {
            Some((next, probability)) => {
                let decision = self.decision_for(tree, chance, next, probability);
                cumulative += gamma * self.visit_decision(tree, decision);
            }
            None => {
                // past the search horizon the successors' estimates stand in
                // for the rest of the trial
                let expected: f64 = self
                    .model
                    .transition(state, action)
                    .iter()
                    .map(|successor| successor.probability * self.model.value(successor.state))
                    .sum();
                cumulative += gamma * expected;
            }
        }
        let cumulative = cumulative.min(DEAD_END_COST);
        self.backup_chance(tree, chance, cumulative);
        cumulative
    }

    fn decision_for(
        &mut self,
        tree: &mut Tree,
        chance: usize,
        state: StateId,
        probability: f64,
    ) -> usize {
        if let Some(&decision) = tree.chances[chance].children_by_state.get(&state) {
            return decision;
        }
        let decision = tree.decisions.len();
        let depth = tree.chances[chance].depth + 1;
        tree.decisions.push(DecisionNode::new(state, depth, Some(chance), probability));
        let node = &mut tree.chances[chance];
        node.children.push(decision);
        node.children_by_state.insert(state, decision);
        tree.expansions_in_trial += 1;
        decision
    }

    fn backup_chance(&mut self, tree: &mut Tree, chance: usize, cumulative: f64) {
        let gamma = self.model.gamma();
        let state = tree.decisions[tree.chances[chance].parent].state;
        let cost = self.model.cost(state, tree.chances[chance].action);

        let node = &tree.chances[chance];
        let value = if node.depth == self.max_depth || node.children.is_empty() {
            Some(cumulative)
        } else {
            match self.rules.backup {
                ThtsBackup::MonteCarlo => None,
                ThtsBackup::MaxMonteCarlo => {
                    let (weighted, weights) =
                        node.children.iter().fold((0., 0.), |(sum, weights), &child| {
                            let child = &tree.decisions[child];
                            let weight = child.backups as f64;
                            (sum + weight * child.value, weights + weight)
                        });
                    (weights > 0.).then(|| cost + gamma * weighted / weights)
                }
                ThtsBackup::PartialBellman => {
                    let (weighted, weights) =
                        node.children.iter().fold((0., 0.), |(sum, weights), &child| {
                            let child = &tree.decisions[child];
                            (sum + child.probability * child.value, weights + child.probability)
                        });
                    (weights > 0.).then(|| cost + gamma * weighted / weights)
                }
            }
        };

        let partial_bellman = self.rules.backup == ThtsBackup::PartialBellman;
        let node = &mut tree.chances[chance];
        node.backups += 1;
        node.value = match value {
            Some(value) => value.min(DEAD_END_COST),
            None => node.value + (cumulative - node.value) / node.backups as f64,
        };
        if partial_bellman && node.solved_probability > 1. - SOLVED_TOLERANCE {
            node.solved = true;
        }
    }

    fn backup_decision(&mut self, tree: &mut Tree, decision: usize, cumulative: f64) {
        let (value, solved) = tree.decisions[decision].children.iter().fold(
            (f64::INFINITY, true),
            |(value, solved), &child| {
                let child = &tree.chances[child];
                (value.min(child.value), solved && child.solved)
            },
        );
        let node = &mut tree.decisions[decision];
        node.backups += 1;
        node.value = value;
        node.record_sample(cumulative);
        if solved {
            tree.mark_solved(decision);
        }
    }

    fn select_action(&mut self, tree: &Tree, decision: usize) -> Option<usize> {
        let node = &tree.decisions[decision];
        let mut best = vec![];
        let mut best_score = f64::INFINITY;
        match self.rules.action_selection {
            ThtsActionSelection::Greedy => {
                for &child in &node.children {
                    let chance = &tree.chances[child];
                    if chance.solved {
                        continue;
                    }
                    push_if_best(&mut best, &mut best_score, child, chance.value);
                }
            }
            ThtsActionSelection::Ucb1 => {
                let (q_min, q_max) = node
                    .children
                    .iter()
                    .map(|&child| tree.chances[child].value)
                    .minmax_by(f64::total_cmp)
                    .into_option()?;
                let spread = q_max - q_min;
                for &child in &node.children {
                    let chance = &tree.chances[child];
                    if chance.selections == 0 {
                        return Some(child);
                    }
                    if chance.solved {
                        continue;
                    }
                    let normalised = if spread == 0. {
                        1.
                    } else {
                        (chance.value - q_min) / spread
                    };
                    let bonus = (2. * (node.selections.max(1) as f64).ln()
                        / chance.selections as f64)
                        .sqrt();
                    push_if_best(&mut best, &mut best_score, child, normalised - bonus);
                }
            }
        }
        best.choose(self.context.rng()).copied()
    }

    fn select_outcome(&mut self, tree: &Tree, chance: usize) -> Option<(StateId, f64)> {
        let node = &tree.chances[chance];
        let state = tree.decisions[node.parent].state;
        let successors = self.model.transition(state, node.action);
        let solved = |successor: StateId| {
            node.children_by_state
                .get(&successor)
                .map_or(false, |&decision| tree.decisions[decision].solved)
        };

        match self.rules.outcome_selection {
            ThtsOutcomeSelection::TransitionFunction => {
                let unsolved_mass = 1. - node.solved_probability;
                let pick: f64 = self.context.rng().gen();
                let mut accumulated = 0.;
                let mut last = None;
                for successor in successors.iter().filter(|s| !solved(s.state)) {
                    accumulated += successor.probability / unsolved_mass;
                    last = Some((successor.state, successor.probability));
                    if accumulated >= pick {
                        return last;
                    }
                }
                last
            }
            ThtsOutcomeSelection::MinVariance => {
                let mut best = vec![];
                let mut best_score = f64::INFINITY;
                for successor in &successors {
                    let score = match node.children_by_state.get(&successor.state) {
                        None => {
                            self.rules.prior_variance * successor.probability.powi(2)
                                / (self.virtual_rollouts + 1) as f64
                        }
                        Some(&decision) => {
                            let outcome = &tree.decisions[decision];
                            if outcome.solved {
                                continue;
                            }
                            outcome.probability.powi(2) * outcome.variance()
                                / (outcome.selections + 1) as f64
                        }
                    };
                    push_if_best(
                        &mut best,
                        &mut best_score,
                        (successor.state, successor.probability),
                        score,
                    );
                }
                best.choose(self.context.rng()).copied()
            }
        }
    }

    fn recommend(&mut self, tree: &Tree) -> Option<ActionId> {
        let mut best = vec![];
        let mut best_score = f64::INFINITY;
        for &child in &tree.root().children {
            let chance = &tree.chances[child];
            let score = match self.rules.recommendation {
                ThtsRecommendation::BestValue => chance.value,
                ThtsRecommendation::MostPlayed => -(chance.selections as f64),
            };
            push_if_best(&mut best, &mut best_score, chance.action, score);
        }
        best.choose(self.context.rng()).copied()
    }
}

/// Keeps every item whose score ties with the lowest seen so far.
fn push_if_best<T>(best: &mut Vec<T>, best_score: &mut f64, item: T, score: f64) {
    if score < *best_score - TIE_TOLERANCE {
        best.clear();
        *best_score = score;
    }
    if (score - *best_score).abs() <= TIE_TOLERANCE {
        best.push(item);
    }
}

impl<M: Ssp> Solver for Thts<M> {
    fn solve(&mut self, state: StateId) -> Solution {
        if self.model.is_goal(state) {
            return Solution::new(None, SolveStatus::Converged);
        }
        if self.model.applicable_actions(state).is_empty() {
            bellman_update(&mut self.model, state);
            return Solution::new(None, SolveStatus::DeadEnd);
        }

        let mut statistics = SolverStatistics::new();
        let mut termination = TerminationCondition::new(self.time_limit, self.memory_limit_mb);
        let mut tree = Tree::new(state);
        let mut status = SolveStatus::TrialLimitReached;
        for _ in 0..self.max_trials {
            if tree.root().solved {
                break;
            }
            if let Some(limit) = termination.should_terminate() {
                status = limit;
                break;
            }
            statistics.increment_trials();
            tree.expansions_in_trial = 0;
            self.visit_decision(&mut tree, 0);
        }
        if tree.root().solved {
            status = SolveStatus::Converged;
        }
        statistics.increment_expanded_states(tree.decisions.len());
        statistics.finalise_solve();
        termination.finalise();
        debug!(nodes = tree.len(), root_value = tree.root().value);

        if tree.root().value >= DEAD_END_COST {
            return Solution::new(None, SolveStatus::DeadEnd);
        }
        Solution::new(self.recommend(&tree), status)
    }

    /// Searches again from `state`; the tree is not kept between calls.
    fn best_action(&mut self, state: StateId) -> Option<ActionId> {
        self.solve(state).action
    }

    fn set_max_trials(&mut self, max_trials: usize) {
        self.max_trials = max_trials;
    }

    fn set_time_limit(&mut self, time_limit: Option<Duration>) {
        self.time_limit = time_limit;
    }

    /// Forgets the dead ends found by earlier searches.
    fn reset(&mut self) {
        self.model.reset_values();
    }
}
