use crate::{
    config::SolverConfig,
    model::{ActionId, Ssp, StateId, DEAD_END_COST},
    solvers::{
        bellman_update, qvalue, random_successor, Solution, SolveStatus, Solver, SolverContext,
        SolverStatistics, TerminationCondition,
    },
};
use std::{collections::HashMap, time::Duration};

/// A state at a given depth of the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct UctNode {
    state: StateId,
    depth: usize,
}

#[derive(Debug, Clone)]
struct ActionStatistics {
    action: ActionId,
    q: f64,
    count: usize,
}

/// UCT: Monte-Carlo rollouts of bounded depth, choosing actions with UCB1
/// and averaging the observed costs into per-node Q estimates. Estimates
/// are kept between calls to `solve` until `reset`.
#[derive(Debug)]
pub struct Uct<M: Ssp> {
    model: M,
    visits: HashMap<UctNode, usize>,
    statistics: HashMap<UctNode, Vec<ActionStatistics>>,
    exploration: f64,
    use_qvalues_for_exploration: bool,
    virtual_rollouts: usize,
    max_rollouts: usize,
    cutoff: usize,
    start_depth: usize,
    auto_adjust_depth: bool,
    context: SolverContext,
    time_limit: Option<Duration>,
    memory_limit_mb: Option<usize>,
}

impl<M: Ssp> Uct<M> {
    pub fn new(model: M, config: &SolverConfig) -> Self {
        Self {
            model,
            visits: HashMap::new(),
            statistics: HashMap::new(),
            exploration: config.exploration,
            use_qvalues_for_exploration: config.use_qvalues_for_exploration,
            virtual_rollouts: config.virtual_rollouts,
            max_rollouts: config.max_rollouts,
            cutoff: config.cutoff,
            start_depth: 0,
            auto_adjust_depth: config.auto_adjust_depth,
            context: SolverContext::new(config.seed),
            time_limit: config.time_limit(),
            memory_limit_mb: config.memory_limit_mb,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Depth of the root of the next search. When planning online, the
    /// depth grows with each executed step so that estimates from earlier
    /// searches are reused.
    pub fn set_start_depth(&mut self, depth: usize) {
        self.start_depth = depth;
    }

    /// The estimated Q-value of `action` at the root state `state`.
    pub fn qvalue(&self, state: StateId, action: ActionId) -> Option<f64> {
        let node = UctNode {
            state,
            depth: self.start_depth,
        };
        self.statistics
            .get(&node)?
            .iter()
            .find(|stats| stats.action == action)
            .map(|stats| stats.q)
    }

    fn initialise(&mut self, node: UctNode) {
        if self.statistics.contains_key(&node) {
            return;
        }
        self.visits.insert(node, 0);
        let mut actions = vec![];
        for action in self.model.applicable_actions(node.state) {
            actions.push(ActionStatistics {
                action,
                q: qvalue(&mut self.model, node.state, action),
                count: self.virtual_rollouts,
            });
        }
        self.statistics.insert(node, actions);
    }

    fn ucb1_cost(&self, node: UctNode, stats: &ActionStatistics, exploration: f64) -> f64 {
        let visits = self.visits.get(&node).copied().unwrap_or(0).max(1) as f64;
        let bonus = (2. * visits.ln() / stats.count as f64).sqrt();
        (stats.q - exploration * bonus).min(DEAD_END_COST)
    }

    /// UCB1 choice at `node`; unexplored actions go first.
    fn pick_action(&self, node: UctNode) -> Option<ActionId> {
        let actions = self.statistics.get(&node)?;
        let mut best: Option<(f64, ActionId)> = None;
        for stats in actions {
            if stats.count == 0 {
                return Some(stats.action);
            }
            let exploration = if self.use_qvalues_for_exploration {
                stats.q
            } else {
                self.exploration
            };
            let cost = self.ucb1_cost(node, stats, exploration);
            if best.map_or(true, |(best_cost, _)| cost < best_cost) {
                best = Some((cost, stats.action));
            }
        }
        best.map(|(_, action)| action)
    }

    /// The action with the lowest estimate among those tried at `node`.
    fn recommend(&self, node: UctNode) -> Option<ActionId> {
        let actions = self.statistics.get(&node)?;
        actions
            .iter()
            .filter(|stats| stats.count > 0)
            .min_by(|a, b| a.q.total_cmp(&b.q))
            .or_else(|| actions.first())
            .map(|stats| stats.action)
    }

    fn rollout(&mut self, root: UctNode) {
        let mut steps = vec![];
        let mut node = root;
        let mut terminal_cost = 0.;
        for _ in 0..self.cutoff {
            self.initialise(node);
            if self.model.is_goal(node.state) {
                break;
            }
            let Some(action) = self.pick_action(node) else {
                terminal_cost = DEAD_END_COST;
                break;
            };
            let cost = self.model.cost(node.state, action);
            let next =
                random_successor(&mut self.model, node.state, Some(action), self.context.rng());
            steps.push((node, action, cost));
            node = UctNode {
                state: next,
                depth: node.depth + 1,
            };
        }

        let gamma = self.model.gamma();
        let mut total = terminal_cost;
        for (node, action, cost) in steps.into_iter().rev() {
            total = (cost + gamma * total).min(DEAD_END_COST);
            if let Some(stats) = self
                .statistics
                .get_mut(&node)
                .and_then(|actions| actions.iter_mut().find(|stats| stats.action == action))
            {
                stats.q = (stats.count as f64 * stats.q + total) / (stats.count + 1) as f64;
                stats.count += 1;
            }
            *self.visits.entry(node).or_insert(0) += 1;
        }
    }
}

impl<M: Ssp> Solver for Uct<M> {
    fn solve(&mut self, state: StateId) -> Solution {
        if self.model.is_goal(state) {
            return Solution::new(None, SolveStatus::Converged);
        }
        if self.auto_adjust_depth && !self.statistics.is_empty() {
            // one step of the previous plan has been executed since
            self.start_depth += 1;
        }
        let root = UctNode {
            state,
            depth: self.start_depth,
        };
        self.initialise(root);
        if self.statistics.get(&root).map_or(true, Vec::is_empty) {
            bellman_update(&mut self.model, state);
            return Solution::new(None, SolveStatus::DeadEnd);
        }

        let mut statistics = SolverStatistics::new();
        let mut termination = TerminationCondition::new(self.time_limit, self.memory_limit_mb);
        let mut status = SolveStatus::TrialLimitReached;
        for _ in 0..self.max_rollouts {
            if let Some(limit) = termination.should_terminate() {
                status = limit;
                break;
            }
            statistics.increment_trials();
            self.rollout(root);
        }
        statistics.finalise_solve();
        termination.finalise();

        Solution::new(self.recommend(root), status)
    }

    fn best_action(&mut self, state: StateId) -> Option<ActionId> {
        self.recommend(UctNode {
            state,
            depth: self.start_depth,
        })
    }

    fn set_max_trials(&mut self, max_trials: usize) {
        self.max_rollouts = max_trials;
    }

    fn set_time_limit(&mut self, time_limit: Option<Duration>) {
        self.time_limit = time_limit;
    }

    fn reset(&mut self) {
        self.visits.clear();
        self.statistics.clear();
        self.start_depth = 0;
        self.model.reset_values();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::Mdp,
        test_utils::{
            chain_problem, dead_end_problem, isolated_dead_end_problem, stochastic_branch_problem,
        },
    };
    use assert_approx_eq::assert_approx_eq;

    fn config(seed: u64) -> SolverConfig {
        SolverConfig {
            seed: Some(seed),
            max_rollouts: 500,
            ..SolverConfig::default()
        }
    }

    #[test]
    fn deterministic_chain_costs_are_exact() {
        let mut mdp = Mdp::new(chain_problem());
        let s0 = mdp.initial_state();
        let mut uct = Uct::new(&mut mdp, &config(1));
        let solution = uct.solve(s0);
        assert_eq!(solution.status, SolveStatus::TrialLimitReached);
        let action = solution.action.unwrap();
        assert_approx_eq!(uct.qvalue(s0, action).unwrap(), 2.);
    }

    #[test]
    fn rollouts_average_stochastic_outcomes() {
        let mut mdp = Mdp::new(stochastic_branch_problem());
        let s0 = mdp.initial_state();
        let mut uct = Uct::new(&mut mdp, &config(2));
        let action = uct.solve(s0).action.unwrap();
        // 1 + 0.5 * 10
        assert_approx_eq!(uct.qvalue(s0, action).unwrap(), 6., 1.);
    }

    #[test]
    fn avoids_the_dead_end_with_exploration() {
        let mut mdp = Mdp::new(dead_end_problem());
        let s0 = mdp.initial_state();
        let config = SolverConfig {
            virtual_rollouts: 1,
            ..config(3)
        };
        let mut uct = Uct::new(&mut mdp, &config);
        let action = uct.solve(s0).action.unwrap();
        assert_eq!(uct.best_action(s0), Some(action));
        assert_eq!(mdp.action(action), "safe");
    }

    #[test]
    fn reset_forgets_estimates() {
        let mut mdp = Mdp::new(chain_problem());
        let s0 = mdp.initial_state();
        let mut uct = Uct::new(&mut mdp, &config(4));
        uct.solve(s0);
        uct.reset();
        assert_eq!(uct.best_action(s0), None);
    }

    #[test]
    fn reset_clears_dead_end_marks() {
        let mut mdp = Mdp::new(isolated_dead_end_problem());
        let s0 = mdp.initial_state();
        let mut uct = Uct::new(&mut mdp, &config(5));
        assert_eq!(uct.solve(s0).status, SolveStatus::DeadEnd);
        assert!(uct.model().is_dead_end(s0));
        uct.reset();
        assert!(!uct.model().is_dead_end(s0));
        assert!(!uct.model().record(s0).is_initialised());
    }
}
