use crate::{
    config::SolverConfig,
    model::{ActionId, Ssp, StateId, DEAD_END_COST},
    solvers::{
        bellman_update, random_successor, Solution, SolveStatus, Solver, SolverContext,
        SolverStatistics, TerminationCondition,
    },
};
use rand::Rng;
use std::{collections::HashMap, time::Duration};
use tracing::debug;

/// One sampled determinisation of the problem: every state-action pair gets
/// a single outcome, drawn lazily in proportion to its probability, and the
/// depth-bounded plan costs computed in it so far.
#[derive(Debug, Default)]
struct Future {
    outcomes: HashMap<(StateId, ActionId), StateId>,
    costs: HashMap<(StateId, usize), f64>,
}

impl Future {
    /// Cost of an optimal plan from `state` of at most `depth` steps, with
    /// the model's value estimate taking over at the last step.
    fn plan_cost<M, R>(&mut self, model: &mut M, state: StateId, depth: usize, rng: &mut R) -> f64
    where
        M: Ssp + ?Sized,
        R: Rng,
    {
        if model.is_goal(state) {
            return model.goal_cost(state);
        }
        if depth == 0 {
            return model.value(state);
        }
        if let Some(&cost) = self.costs.get(&(state, depth)) {
            return cost;
        }
        let actions = model.applicable_actions(state);
        if actions.is_empty() {
            model.record_mut(state).mark_dead_end();
            return DEAD_END_COST;
        }
        let mut best = DEAD_END_COST;
        for action in actions {
            let next = match self.outcomes.get(&(state, action)) {
                Some(&next) => next,
                None => {
                    let next = random_successor(model, state, Some(action), rng);
                    self.outcomes.insert((state, action), next);
                    next
                }
            };
            let cost = model.cost(state, action)
                + model.gamma() * self.plan_cost(model, next, depth - 1, rng);
            best = best.min(cost);
        }
        self.costs.insert((state, depth), best);
        best
    }
}

/// Hindsight optimisation. The Q-value of an action is its cost plus the
/// expected cost of an optimal plan from its outcome, averaged over sampled
/// determinisations of the future. Plans look `horizon` steps ahead. All
/// actions are scored against the same determinisations.
///
/// Hindsight plans know the future, so the estimates are optimistic.
#[derive(Debug)]
pub struct Hop<M: Ssp> {
    model: M,
    samples: usize,
    horizon: usize,
    context: SolverContext,
    time_limit: Option<Duration>,
    memory_limit_mb: Option<usize>,
}

impl<M: Ssp> Hop<M> {
    pub fn new(model: M, config: &SolverConfig) -> Self {
        Self {
            model,
            samples: config.samples,
            horizon: config.horizon,
            context: SolverContext::new(config.seed),
            time_limit: config.time_limit(),
            memory_limit_mb: config.memory_limit_mb,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Estimated Q-values of the actions applicable in `state`, and how the
    /// sampling ended. At least one determinisation is always used.
    pub fn qvalues(&mut self, state: StateId) -> (Vec<(ActionId, f64)>, SolveStatus) {
        let mut statistics = SolverStatistics::new();
        let mut termination = TerminationCondition::new(self.time_limit, self.memory_limit_mb);
        let scored: Vec<_> = self
            .model
            .applicable_actions(state)
            .into_iter()
            .map(|action| (action, self.model.transition(state, action)))
            .collect();

        let mut totals = vec![0.; scored.len()];
        let mut taken = 0;
        let status = loop {
            let mut future = Future::default();
            for ((_, successors), total) in scored.iter().zip(&mut totals) {
                for successor in successors {
                    let cost = future.plan_cost(
                        &mut self.model,
                        successor.state,
                        self.horizon,
                        self.context.rng(),
                    );
                    *total += successor.probability * cost;
                }
            }
            statistics.increment_trials();
            taken += 1;
            if taken >= self.samples {
                break SolveStatus::TrialLimitReached;
            }
            if let Some(limit) = termination.should_terminate() {
                break limit;
            }
        };
        debug!(samples = taken, "hindsight estimates");
        statistics.finalise_solve();
        termination.finalise();

        let qvalues = scored
            .iter()
            .zip(totals)
            .map(|(&(action, _), total)| {
                let q = self.model.cost(state, action) + self.model.gamma() * total / taken as f64;
                (action, q.min(DEAD_END_COST))
            })
            .collect();
        (qvalues, status)
    }
}

impl<M: Ssp> Solver for Hop<M> {
    fn solve(&mut self, state: StateId) -> Solution {
        if self.model.is_goal(state) {
            return Solution::new(None, SolveStatus::Converged);
        }
        let (qvalues, status) = self.qvalues(state);
        let mut best: Option<(ActionId, f64)> = None;
        for (action, q) in qvalues {
            if best.map_or(true, |(_, best_q)| q < best_q) {
                best = Some((action, q));
            }
        }
        match best {
            Some((action, q)) if q < DEAD_END_COST => Solution::new(Some(action), status),
            Some(_) => Solution::new(None, SolveStatus::DeadEnd),
            None => {
                bellman_update(&mut self.model, state);
                Solution::new(None, SolveStatus::DeadEnd)
            }
        }
    }

    fn best_action(&mut self, state: StateId) -> Option<ActionId> {
        self.solve(state).action
    }

    fn set_max_trials(&mut self, max_trials: usize) {
        self.samples = max_trials;
    }

    fn set_time_limit(&mut self, time_limit: Option<Duration>) {
        self.time_limit = time_limit;
    }

    /// Forgets the dead ends found by earlier plans.
    fn reset(&mut self) {
        self.model.reset_values();
    }
}
