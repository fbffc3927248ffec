use crate::model::StateId;
use std::collections::HashMap;

/// Per-run annotations a labeling solver attaches to states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    /// The state's value has converged over its whole greedy subgraph.
    Solved,
    /// The state's value has converged within the current search horizon.
    DepthSolved,
}

impl Label {
    fn mask(self) -> u8 {
        match self {
            Label::Solved => 0b01,
            Label::DepthSolved => 0b10,
        }
    }
}

/// Side table of [`Label`]s, owned by a single solver so that different
/// solvers working on the same problem never see each other's labels.
#[derive(Debug, Clone, Default)]
pub struct StateLabels {
    labels: HashMap<StateId, u8>,
}

impl StateLabels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, state: StateId, label: Label) -> bool {
        self.labels
            .get(&state)
            .map_or(false, |bits| bits & label.mask() != 0)
    }

    pub fn set(&mut self, state: StateId, label: Label) {
        *self.labels.entry(state).or_insert(0) |= label.mask();
    }

    pub fn unset(&mut self, state: StateId, label: Label) {
        if let Some(bits) = self.labels.get_mut(&state) {
            *bits &= !label.mask();
        }
    }

    /// Removes `label` from every state.
    pub fn clear_label(&mut self, label: Label) {
        for bits in self.labels.values_mut() {
            *bits &= !label.mask();
        }
        self.labels.retain(|_, bits| *bits != 0);
    }

    pub fn count(&self, label: Label) -> usize {
        self.labels
            .values()
            .filter(|&&bits| bits & label.mask() != 0)
            .count()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }
}
