use crate::model::{ActionId, DEAD_END_COST};
use segvec::{Linear, SegVec};
use std::{collections::HashMap, hash::Hash};

/// Stable handle to a state interned in a [`StateTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(usize);

impl StateId {
    #[inline(always)]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline(always)]
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Solver-facing data cached for every interned state. The stored cost
/// starts above [`DEAD_END_COST`], meaning "unknown"; reads of an unknown
/// cost fall back to the heuristic (see [`crate::model::Ssp::value`]).
#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    cost: f64,
    g_value: f64,
    h_value: f64,
    best_action: Option<ActionId>,
    residual_distance: f64,
    depth: usize,
    dead_end: bool,
}

impl Default for StateRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl StateRecord {
    pub fn new() -> Self {
        Self {
            cost: DEAD_END_COST + 1.0,
            g_value: DEAD_END_COST + 1.0,
            h_value: DEAD_END_COST + 1.0,
            best_action: None,
            residual_distance: -1.0,
            depth: usize::MAX,
            dead_end: false,
        }
    }

    /// Raw stored cost, without the dead-end and unknown-cost translation.
    pub fn raw_cost(&self) -> f64 {
        self.cost
    }

    pub fn set_cost(&mut self, cost: f64) {
        self.cost = cost;
    }

    /// Whether the cost has ever been written by a backup.
    pub fn is_initialised(&self) -> bool {
        self.cost <= DEAD_END_COST
    }

    pub fn g_value(&self) -> f64 {
        if self.g_value > DEAD_END_COST {
            0.
        } else {
            self.g_value
        }
    }

    pub fn set_g_value(&mut self, g_value: f64) {
        self.g_value = g_value;
    }

    pub fn raw_h_value(&self) -> f64 {
        self.h_value
    }

    pub fn set_h_value(&mut self, h_value: f64) {
        self.h_value = h_value;
    }

    pub fn best_action(&self) -> Option<ActionId> {
        self.best_action
    }

    pub fn set_best_action(&mut self, action: Option<ActionId>) {
        self.best_action = action;
    }

    pub fn residual_distance(&self) -> f64 {
        self.residual_distance
    }

    pub fn set_residual_distance(&mut self, distance: f64) {
        self.residual_distance = distance;
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn set_depth(&mut self, depth: usize) {
        self.depth = depth;
    }

    pub fn is_dead_end(&self) -> bool {
        self.dead_end
    }

    /// Dead ends are terminal: once marked, the flag survives every backup
    /// until [`StateRecord::reset`].
    pub fn mark_dead_end(&mut self) {
        self.dead_end = true;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Interning table mapping domain states to stable [`StateId`] handles. Each
/// distinct (by value equality) state is stored exactly once and keeps its
/// [`StateRecord`] for the lifetime of the table.
#[derive(Debug)]
pub struct StateTable<S: Hash + Eq + Clone> {
    states: SegVec<S, Linear>,
    records: SegVec<StateRecord, Linear>,
    registered_states: HashMap<S, StateId>,
}

impl<S: Hash + Eq + Clone> Default for StateTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Hash + Eq + Clone> StateTable<S> {
    pub fn new() -> Self {
        Self {
            states: SegVec::new(),
            records: SegVec::new(),
            registered_states: HashMap::new(),
        }
    }

    /// Returns the handle of `state`, registering it first if it has not
    /// been seen before.
    pub fn insert_or_get(&mut self, state: S) -> StateId {
        if let Some(&state_id) = self.registered_states.get(&state) {
            return state_id;
        }
        let state_id = StateId::new(self.states.len());
        self.states.push(state.clone());
        self.records.push(StateRecord::new());
        self.registered_states.insert(state, state_id);
        state_id
    }

    pub fn lookup(&self, state: &S) -> Option<StateId> {
        self.registered_states.get(state).copied()
    }

    #[inline(always)]
    pub fn get_state(&self, state_id: StateId) -> &S {
        self.states.get(state_id.index()).expect("Invalid state id")
    }

    #[inline(always)]
    pub fn get_record(&self, state_id: StateId) -> &StateRecord {
        self.records.get(state_id.index()).expect("Invalid state id")
    }

    #[inline(always)]
    pub fn get_record_mut(&mut self, state_id: StateId) -> &mut StateRecord {
        self.records
            .get_mut(state_id.index())
            .expect("Invalid state id")
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.len() == 0
    }

    pub fn ids(&self) -> impl Iterator<Item = StateId> {
        (0..self.states.len()).map(StateId::new)
    }

    /// Clears every cached value; interned states and their handles stay
    /// valid.
    pub fn reset(&mut self) {
        for index in 0..self.records.len() {
            if let Some(record) = self.records.get_mut(index) {
                record.reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates_by_value() {
        let mut table = StateTable::new();
        let a = table.insert_or_get((1, 2));
        let b = table.insert_or_get((3, 4));
        let c = table.insert_or_get((1, 2));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get_state(b), &(3, 4));
        assert_eq!(table.lookup(&(3, 4)), Some(b));
        assert_eq!(table.lookup(&(5, 6)), None);
    }

    #[test]
    fn fresh_record_is_unknown() {
        let record = StateRecord::new();
        assert!(!record.is_initialised());
        assert!(record.raw_cost() > DEAD_END_COST);
        assert_eq!(record.best_action(), None);
        assert!(!record.is_dead_end());
        assert_eq!(record.g_value(), 0.);
    }

    #[test]
    fn reset_clears_records_but_keeps_handles() {
        let mut table = StateTable::new();
        let a = table.insert_or_get("a");
        table.get_record_mut(a).set_cost(3.);
        table.get_record_mut(a).mark_dead_end();
        table.reset();
        assert_eq!(table.lookup(&"a"), Some(a));
        assert!(!table.get_record(a).is_initialised());
        assert!(!table.get_record(a).is_dead_end());
    }
}
