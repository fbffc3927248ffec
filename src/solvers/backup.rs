//! Bellman backups and the sampling primitives shared by every solver.

use crate::model::{ActionId, Ssp, StateId, DEAD_END_COST};
use rand::Rng;
use std::collections::HashMap;

/// Tolerance used when comparing outcome probabilities.
const PROBABILITY_EPSILON: f64 = 1e-6;

/// Added to the slack of a lexicographic level so that rounding never
/// drops the best action itself.
const SLACK_TOLERANCE: f64 = 1e-8;

/// Result of a Bellman backup: the minimum Q-value and the action achieving
/// it. Goals and dead ends have no action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backup {
    pub cost: f64,
    pub action: Option<ActionId>,
}

/// `cost(s, a) + gamma * sum(p * value(s'))`, clipped at [`DEAD_END_COST`].
/// The action must be applicable in `state`.
pub fn qvalue<M: Ssp + ?Sized>(model: &mut M, state: StateId, action: ActionId) -> f64 {
    let successors = model.transition(state, action);
    let expected: f64 = successors
        .iter()
        .map(|successor| successor.probability * model.value(successor.state))
        .sum();
    (model.cost(state, action) + model.gamma() * expected).min(DEAD_END_COST)
}

/// The `(g, h)` split of a Q-value used by weighted searches: `g` is the
/// expected cost accumulated so far, `h` the discounted expected heuristic
/// part.
pub fn weighted_qvalue<M: Ssp + ?Sized>(
    model: &mut M,
    state: StateId,
    action: ActionId,
) -> (f64, f64) {
    let successors = model.transition(state, action);
    let mut g = 0.;
    let mut h = 0.;
    for successor in &successors {
        g += successor.probability * model.record(successor.state).g_value();
        h += successor.probability * model.h_value(successor.state);
    }
    (
        model.cost(state, action) + model.gamma() * g,
        model.gamma() * h,
    )
}

/// Minimum Q-value over the applicable actions. Ties go to the action that
/// comes first in the action list. A non-goal state without applicable
/// actions is marked as a dead end and backs up to [`DEAD_END_COST`].
pub fn bellman_backup<M: Ssp + ?Sized>(model: &mut M, state: StateId) -> Backup {
    if model.is_goal(state) {
        return Backup {
            cost: model.goal_cost(state),
            action: None,
        };
    }
    let mut best: Option<(f64, ActionId)> = None;
    for action in model.applicable_actions(state) {
        let q = qvalue(model, state, action);
        if best.map_or(true, |(best_q, _)| q < best_q) {
            best = Some((q, action));
        }
    }
    match best {
        Some((cost, action)) => Backup {
            cost,
            action: Some(action),
        },
        None => {
            model.record_mut(state).mark_dead_end();
            Backup {
                cost: DEAD_END_COST,
                action: None,
            }
        }
    }
}

/// Applies a Bellman backup to `state` and returns the change in its value.
pub fn bellman_update<M: Ssp + ?Sized>(model: &mut M, state: StateId) -> f64 {
    let backup = bellman_backup(model, state);
    let residual = (model.value(state) - backup.cost).abs();
    let record = model.record_mut(state);
    record.set_cost(backup.cost);
    record.set_best_action(backup.action);
    residual
}

/// Weighted backup `min_a g(a) + weight * h(a)`, keeping the g and h parts
/// of the chosen action on the record. Returns the change in value.
pub fn weighted_bellman_update<M: Ssp + ?Sized>(model: &mut M, state: StateId, weight: f64) -> f64 {
    let previous = model.value(state);
    if model.is_goal(state) {
        let cost = model.goal_cost(state);
        let record = model.record_mut(state);
        record.set_cost(cost);
        record.set_g_value(cost);
        record.set_h_value(0.);
        record.set_best_action(None);
        return (cost - previous).abs();
    }

    let mut best: Option<(f64, f64, f64, ActionId)> = None;
    for action in model.applicable_actions(state) {
        let (g, h) = weighted_qvalue(model, state, action);
        let q = (g + weight * h).min(DEAD_END_COST);
        if best.map_or(true, |(best_q, ..)| q < best_q) {
            best = Some((q, g, h, action));
        }
    }

    let record = model.record_mut(state);
    let cost = match best {
        Some((q, g, h, action)) => {
            record.set_g_value(g.min(DEAD_END_COST));
            record.set_h_value(h.min(DEAD_END_COST));
            record.set_best_action(Some(action));
            q
        }
        None => {
            record.mark_dead_end();
            record.set_g_value(DEAD_END_COST);
            record.set_h_value(DEAD_END_COST);
            record.set_best_action(None);
            DEAD_END_COST
        }
    };
    record.set_cost(cost);
    (cost - previous).abs()
}

/// The cached best action of `state` if there is one, otherwise the greedy
/// action with respect to the current successor values. The result is not
/// written back.
pub fn greedy_action<M: Ssp + ?Sized>(model: &mut M, state: StateId) -> Option<ActionId> {
    if let Some(action) = model.best_action(state) {
        return Some(action);
    }
    if model.is_goal(state) {
        return None;
    }
    let mut best: Option<(f64, ActionId)> = None;
    for action in model.applicable_actions(state) {
        let q = qvalue(model, state, action);
        if best.map_or(true, |(best_q, _)| q < best_q) {
            best = Some((q, action));
        }
    }
    if best.is_none() {
        model.record_mut(state).mark_dead_end();
    }
    best.map(|(_, action)| action)
}

/// Difference between the current value of `state` and a fresh backup.
/// Goals and known dead ends have no residual. A backup that discovers a
/// dead end measures the jump from the old estimate to [`DEAD_END_COST`].
pub fn residual<M: Ssp + ?Sized>(model: &mut M, state: StateId) -> f64 {
    if model.is_goal(state) || model.is_dead_end(state) {
        return 0.;
    }
    let previous = model.value(state);
    (bellman_backup(model, state).cost - previous).abs()
}

/// Estimates of every objective of a lexicographic problem. The primary
/// objective (level 0) is the value cached on the model's records; the
/// other levels live here and read as zero until backed up, or as
/// [`DEAD_END_COST`] for dead ends.
#[derive(Debug, Clone, Default)]
pub struct LexiValues {
    secondary: HashMap<StateId, Vec<f64>>,
}

impl LexiValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<M: Ssp + ?Sized>(&self, model: &M, state: StateId, level: usize) -> f64 {
        match level {
            0 => model.value(state),
            _ if model.is_dead_end(state) => DEAD_END_COST,
            _ => self
                .secondary
                .get(&state)
                .and_then(|costs| costs.get(level - 1))
                .copied()
                .unwrap_or(0.),
        }
    }

    fn set<M: Ssp + ?Sized>(&mut self, model: &mut M, state: StateId, level: usize, cost: f64) {
        if level == 0 {
            model.record_mut(state).set_cost(cost);
            return;
        }
        let costs = self.secondary.entry(state).or_default();
        if costs.len() < level {
            costs.resize(level, 0.);
        }
        costs[level - 1] = cost;
    }

    /// The estimates of `state` on every level of `model`.
    pub fn levels<M: Ssp + ?Sized>(&self, model: &M, state: StateId) -> Vec<f64> {
        (0..model.num_levels())
            .map(|level| self.get(model, state, level))
            .collect()
    }

    /// Forgets the secondary levels. Level 0 is reset with the model.
    pub fn clear(&mut self) {
        self.secondary.clear();
    }
}

/// [`qvalue`] under the cost function of `level`.
pub fn lexi_qvalue<M: Ssp + ?Sized>(
    model: &mut M,
    values: &LexiValues,
    state: StateId,
    action: ActionId,
    level: usize,
) -> f64 {
    let successors = model.transition(state, action);
    let expected: f64 = successors
        .iter()
        .map(|successor| successor.probability * values.get(&*model, successor.state, level))
        .sum();
    (model.level_cost(state, action, level) + model.gamma() * expected).min(DEAD_END_COST)
}

/// Lexicographic Bellman update of levels `0..=level` of `state`. Level `i`
/// only considers the actions whose Q-values on every earlier level were
/// within `slack` of that level's best, and the best action is the one
/// chosen on the last level. Returns the largest change over the updated
/// levels.
pub fn lexi_bellman_update<M: Ssp + ?Sized>(
    model: &mut M,
    values: &mut LexiValues,
    state: StateId,
    level: usize,
    slack: f64,
) -> f64 {
    let last = level.min(model.num_levels().saturating_sub(1));
    if model.is_goal(state) {
        let cost = model.goal_cost(state);
        let residual = (cost - model.value(state)).abs();
        for level in 0..=last {
            values.set(model, state, level, if level == 0 { cost } else { 0. });
        }
        model.record_mut(state).set_best_action(None);
        return residual;
    }

    let mut candidates = model.applicable_actions(state);
    if candidates.is_empty() {
        let residual = (DEAD_END_COST - model.value(state)).abs();
        let record = model.record_mut(state);
        record.mark_dead_end();
        record.set_cost(DEAD_END_COST);
        record.set_best_action(None);
        return residual;
    }

    let mut residual: f64 = 0.;
    for level in 0..=last {
        let scored: Vec<(ActionId, f64)> = candidates
            .iter()
            .map(|&action| (action, lexi_qvalue(model, values, state, action, level)))
            .collect();
        let mut best: Option<(ActionId, f64)> = None;
        for &(action, q) in &scored {
            if best.map_or(true, |(_, best_q)| q < best_q) {
                best = Some((action, q));
            }
        }
        let Some((action, best_q)) = best else {
            break;
        };
        residual = residual.max((best_q - values.get(model, state, level)).abs());
        values.set(model, state, level, best_q);
        model.record_mut(state).set_best_action(Some(action));
        candidates = scored
            .into_iter()
            .filter(|&(_, q)| q <= best_q + slack + SLACK_TOLERANCE)
            .map(|(action, _)| action)
            .collect();
    }
    residual
}

/// Samples a successor of `(state, action)`. Without an action, or when the
/// probabilities fall short of the sampled value, the state itself is
/// returned.
pub fn random_successor<M, R>(
    model: &mut M,
    state: StateId,
    action: Option<ActionId>,
    rng: &mut R,
) -> StateId
where
    M: Ssp + ?Sized,
    R: Rng,
{
    let pick: f64 = rng.gen();
    let Some(action) = action else {
        return state;
    };
    let mut accumulated = 0.;
    for successor in model.transition(state, action) {
        accumulated += successor.probability;
        if accumulated >= pick {
            return successor.state;
        }
    }
    state
}

/// The most likely successor of `(state, action)`. With `no_ties` the first
/// of several equally likely outcomes is returned, otherwise one of them is
/// picked uniformly at random.
pub fn most_likely_outcome<M, R>(
    model: &mut M,
    state: StateId,
    action: ActionId,
    no_ties: bool,
    rng: &mut R,
) -> StateId
where
    M: Ssp + ?Sized,
    R: Rng,
{
    let mut probability = -1.;
    let mut outcomes = vec![];
    for successor in model.transition(state, action) {
        if successor.probability > probability + PROBABILITY_EPSILON {
            probability = successor.probability;
            outcomes.clear();
            outcomes.push(successor.state);
        } else if successor.probability > probability - PROBABILITY_EPSILON {
            outcomes.push(successor.state);
        }
    }
    match outcomes.len() {
        0 => state,
        1 => outcomes[0],
        _ if no_ties => outcomes[0],
        n => outcomes[rng.gen_range(0..n)],
    }
}

/// Simulates the greedy policy from `state` and returns the discounted cost
/// of the trajectory. Reaching a dead end charges [`DEAD_END_COST`]; the
/// simulation also stops once the accumulated cost reaches that value or the
/// discount vanishes.
pub fn sample_trial<M, R>(model: &mut M, state: StateId, rng: &mut R) -> f64
where
    M: Ssp + ?Sized,
    R: Rng,
{
    let mut current = state;
    let mut discount = 1.;
    let mut cost = 0.;
    while !model.is_goal(current) {
        let Some(action) = greedy_action(model, current) else {
            cost += discount * DEAD_END_COST;
            break;
        };
        cost += discount * model.cost(current, action);
        if cost >= DEAD_END_COST || discount < PROBABILITY_EPSILON {
            break;
        }
        current = random_successor(model, current, Some(action), rng);
        discount *= model.gamma();
    }
    cost.min(DEAD_END_COST)
}

/// [`sample_trial`] on every level of a lexicographic problem: the
/// discounted cost of one simulated trajectory under each cost function.
/// Dead ends charge [`DEAD_END_COST`] on the primary level. A step that
/// costs nothing on any level ends the simulation, since it could repeat
/// forever.
pub fn lexi_sample_trial<M, R>(model: &mut M, state: StateId, rng: &mut R) -> Vec<f64>
where
    M: Ssp + ?Sized,
    R: Rng,
{
    let mut costs = vec![0.; model.num_levels()];
    let mut current = state;
    let mut discount = 1.;
    while !model.is_goal(current) {
        let Some(action) = greedy_action(model, current) else {
            costs[0] += discount * DEAD_END_COST;
            break;
        };
        let mut step = 0.;
        for (level, cost) in costs.iter_mut().enumerate() {
            let level_cost = discount * model.level_cost(current, action, level);
            *cost += level_cost;
            step += level_cost;
        }
        if step < PROBABILITY_EPSILON || costs[0] >= DEAD_END_COST {
            break;
        }
        current = random_successor(model, current, Some(action), rng);
        discount *= model.gamma();
    }
    costs[0] = costs[0].min(DEAD_END_COST);
    costs
}
