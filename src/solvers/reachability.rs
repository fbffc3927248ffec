use crate::{
    model::{Ssp, StateId},
    solvers::greedy_action,
};
use ordered_float::OrderedFloat;
use priority_queue::PriorityQueue;
use std::collections::{HashSet, VecDeque};

/// A bounded region of the state space: every state found, the frontier
/// ("tip") states where expansion stopped, and whether a goal was reached.
#[derive(Debug, Clone, Default)]
pub struct Reachability {
    pub states: HashSet<StateId>,
    pub tips: HashSet<StateId>,
    pub goal_seen: bool,
}

/// Breadth-first expansion from `seeds` (or the initial state if there are
/// none) under every applicable action, for at most `horizon` steps. Goals and
/// states found exactly `horizon` steps away become tips.
pub fn reachable_states<M: Ssp + ?Sized>(
    model: &mut M,
    seeds: &[StateId],
    horizon: usize,
) -> Reachability {
    let mut reachability = Reachability::default();
    let mut queue = VecDeque::new();
    if seeds.is_empty() {
        let initial_state = model.initial_state();
        reachability.states.insert(initial_state);
        queue.push_back((initial_state, 0));
    }
    for &seed in seeds {
        if reachability.states.insert(seed) {
            queue.push_back((seed, 0));
        }
    }

    while let Some((state, depth)) = queue.pop_front() {
        if model.is_goal(state) {
            reachability.tips.insert(state);
            reachability.goal_seen = true;
            continue;
        }
        if depth == horizon {
            reachability.tips.insert(state);
            continue;
        }
        for action in model.applicable_actions(state) {
            for successor in model.transition(state, action) {
                if reachability.states.insert(successor.state) {
                    queue.push_back((successor.state, depth + 1));
                }
            }
        }
    }
    reachability
}

/// Expands states in order of the probability of their most likely
/// trajectory from `root`. States whose trajectory probability falls below
/// `rho` are not expanded and become tips, as do goals.
pub fn reachable_states_by_probability<M: Ssp + ?Sized>(
    model: &mut M,
    root: StateId,
    rho: f64,
) -> Reachability {
    let mut reachability = Reachability::default();
    let mut queue: PriorityQueue<StateId, OrderedFloat<f64>> = PriorityQueue::new();
    queue.push(root, OrderedFloat(1.));

    while let Some((state, OrderedFloat(probability))) = queue.pop() {
        reachability.states.insert(state);
        if model.is_goal(state) {
            reachability.tips.insert(state);
            reachability.goal_seen = true;
            continue;
        }
        if probability < rho {
            reachability.tips.insert(state);
            continue;
        }
        for action in model.applicable_actions(state) {
            for successor in model.transition(state, action) {
                if reachability.states.contains(&successor.state) {
                    continue;
                }
                queue.push_increase(
                    successor.state,
                    OrderedFloat(probability * successor.probability),
                );
            }
        }
    }
    reachability
}

/// States reachable from `root` under the current greedy policy. Expansion
/// stops at goals, dead ends and states without a policy yet.
pub fn best_partial_solution_graph<M: Ssp + ?Sized>(
    model: &mut M,
    root: StateId,
) -> HashSet<StateId> {
    let mut graph = HashSet::from([root]);
    let mut stack = vec![root];
    while let Some(state) = stack.pop() {
        if model.is_goal(state) || model.is_dead_end(state) {
            continue;
        }
        let Some(action) = greedy_action(model, state) else {
            continue;
        };
        for successor in model.transition(state, action) {
            if graph.insert(successor.state) {
                stack.push(successor.state);
            }
        }
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domains::{GridCell, GridWorld},
        model::Mdp,
        solvers::bellman_update,
        test_utils::{chain_problem, dead_end_problem, OPEN_GRID},
    };

    #[test]
    fn horizon_limits_expansion() {
        let mut mdp = Mdp::new(chain_problem());
        let s0 = mdp.initial_state();
        let zero = reachable_states(&mut mdp, &[], 0);
        assert_eq!(zero.states, HashSet::from([s0]));
        assert_eq!(zero.tips, HashSet::from([s0]));
        assert!(!zero.goal_seen);

        let full = reachable_states(&mut mdp, &[s0], 5);
        assert_eq!(full.states.len(), 3);
        assert_eq!(full.tips.len(), 1);
        assert!(full.goal_seen);
    }

    #[test]
    fn grid_tips_are_at_the_horizon() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        let mut mdp = Mdp::new(grid);
        let s0 = mdp.initial_state();
        let reachability = reachable_states(&mut mdp, &[s0], 1);
        // start, the cell above it and the cell to its right
        assert_eq!(reachability.states.len(), 3);
        assert_eq!(reachability.tips.len(), 2);
        assert!(reachability
            .tips
            .iter()
            .all(|&tip| *mdp.state(tip) != GridCell::new(0, 2)));
    }

    #[test]
    fn probability_bound_cuts_unlikely_branches() {
        let grid = GridWorld::from_map(OPEN_GRID).unwrap();
        let mut mdp = Mdp::new(grid);
        let s0 = mdp.initial_state();
        let narrow = reachable_states_by_probability(&mut mdp, s0, 0.5);
        let wide = reachable_states_by_probability(&mut mdp, s0, 0.01);
        assert!(narrow.states.len() < wide.states.len());
        assert!(narrow.tips.iter().all(|tip| narrow.states.contains(tip)));
        assert!(wide.goal_seen);
    }

    #[test]
    fn partial_solution_graph_follows_policy() {
        let mut mdp = Mdp::new(dead_end_problem());
        let s0 = mdp.initial_state();
        let states = mdp.all_states();
        for _ in 0..2 {
            for &s in &states {
                bellman_update(&mut mdp, s);
            }
        }
        // the safe action leads straight to the goal
        let graph = best_partial_solution_graph(&mut mdp, s0);
        assert_eq!(graph.len(), 2);
    }
}
