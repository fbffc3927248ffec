use crate::{error::MdpError, model::Problem};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// A problem given as an explicit table of named states and per-action
/// outcome distributions.
#[derive(Debug, Clone)]
pub struct ExplicitProblem {
    initial_state: String,
    goals: HashSet<String>,
    actions: Vec<String>,
    edges: HashMap<(String, String), ExplicitEdge>,
    gamma: f64,
    levels: usize,
}

#[derive(Debug, Clone)]
struct ExplicitEdge {
    cost: f64,
    secondary_costs: Vec<f64>,
    outcomes: Vec<(String, f64)>,
}

/// Serialisable description of an [`ExplicitProblem`], as read from TOML:
///
/// ```toml
/// states = ["a", "b"]
/// initial-state = "a"
/// goals = ["b"]
///
/// [[transitions]]
/// state = "a"
/// action = "go"
/// cost = 1.0
/// outcomes = [{ state = "b", probability = 1.0 }]
/// ```
///
/// A transition may list `secondary-costs`, the costs of less important
/// objectives in decreasing order of preference. Objectives a transition
/// leaves out cost nothing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExplicitDescription {
    pub states: Vec<String>,
    pub initial_state: String,
    pub goals: Vec<String>,
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    #[serde(default)]
    pub transitions: Vec<TransitionDescription>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransitionDescription {
    pub state: String,
    pub action: String,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_costs: Vec<f64>,
    #[serde(default)]
    pub outcomes: Vec<OutcomeDescription>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutcomeDescription {
    pub state: String,
    pub probability: f64,
}

fn default_gamma() -> f64 {
    1.
}

impl ExplicitDescription {
    pub fn new(states: &[&str], initial_state: &str, goals: &[&str]) -> Self {
        Self {
            states: states.iter().map(|s| s.to_string()).collect(),
            initial_state: initial_state.to_string(),
            goals: goals.iter().map(|s| s.to_string()).collect(),
            gamma: default_gamma(),
            transitions: vec![],
        }
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn transition(
        mut self,
        state: &str,
        action: &str,
        cost: f64,
        outcomes: &[(&str, f64)],
    ) -> Self {
        self.transitions.push(TransitionDescription {
            state: state.to_string(),
            action: action.to_string(),
            cost,
            secondary_costs: vec![],
            outcomes: outcomes
                .iter()
                .map(|&(state, probability)| OutcomeDescription {
                    state: state.to_string(),
                    probability,
                })
                .collect(),
        });
        self
    }

    /// Sets the secondary costs of the transition added last.
    pub fn secondary_costs(mut self, costs: &[f64]) -> Self {
        if let Some(transition) = self.transitions.last_mut() {
            transition.secondary_costs = costs.to_vec();
        }
        self
    }
}

impl ExplicitProblem {
    pub fn new(description: ExplicitDescription) -> Result<Self, MdpError> {
        let states: HashSet<&str> = description.states.iter().map(String::as_str).collect();
        let known = |name: &str| -> Result<(), MdpError> {
            if states.contains(name) {
                Ok(())
            } else {
                Err(MdpError::UnknownState(name.to_string()))
            }
        };

        known(&description.initial_state)?;
        for goal in &description.goals {
            known(goal)?;
        }
        if !(description.gamma > 0. && description.gamma <= 1.) {
            return Err(MdpError::MalformedProblem(format!(
                "discount factor {} is outside (0, 1]",
                description.gamma
            )));
        }

        let mut actions: Vec<String> = vec![];
        let mut edges = HashMap::new();
        let mut levels = 1;
        for transition in description.transitions {
            known(&transition.state)?;
            let negative = std::iter::once(&transition.cost)
                .chain(&transition.secondary_costs)
                .find(|&&cost| cost < 0.);
            if let Some(cost) = negative {
                return Err(MdpError::MalformedProblem(format!(
                    "negative cost {} for action {} in state {}",
                    cost, transition.action, transition.state
                )));
            }
            levels = levels.max(1 + transition.secondary_costs.len());
            let mut total = 0.;
            for outcome in &transition.outcomes {
                known(&outcome.state)?;
                total += outcome.probability;
            }
            if !transition.outcomes.is_empty() && (total - 1.).abs() > PROBABILITY_TOLERANCE {
                return Err(MdpError::MalformedProblem(format!(
                    "outcome probabilities of action {} in state {} sum to {}",
                    transition.action, transition.state, total
                )));
            }
            if !actions.contains(&transition.action) {
                actions.push(transition.action.clone());
            }
            let key = (transition.state, transition.action);
            if edges.contains_key(&key) {
                return Err(MdpError::MalformedProblem(format!(
                    "duplicate action {} in state {}",
                    key.1, key.0
                )));
            }
            edges.insert(
                key,
                ExplicitEdge {
                    cost: transition.cost,
                    secondary_costs: transition.secondary_costs,
                    outcomes: transition
                        .outcomes
                        .into_iter()
                        .map(|outcome| (outcome.state, outcome.probability))
                        .collect(),
                },
            );
        }

        Ok(Self {
            initial_state: description.initial_state,
            goals: description.goals.into_iter().collect(),
            actions,
            edges,
            gamma: description.gamma,
            levels,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, MdpError> {
        let description: ExplicitDescription = toml::from_str(text)?;
        Self::new(description)
    }

    pub fn from_path(path: &Path) -> Result<Self, MdpError> {
        let text = std::fs::read_to_string(path).map_err(|e| MdpError::io(path, e))?;
        Self::from_toml_str(&text)
    }
}

impl Problem for ExplicitProblem {
    type State = String;
    type Action = String;

    fn initial_state(&self) -> String {
        self.initial_state.clone()
    }

    fn actions(&self) -> &[String] {
        &self.actions
    }

    fn is_goal(&self, state: &String) -> bool {
        self.goals.contains(state)
    }

    fn applicable(&self, state: &String, action: &String) -> bool {
        self.edges.contains_key(&(state.clone(), action.clone()))
    }

    fn transition(&self, state: &String, action: &String) -> Vec<(String, f64)> {
        self.edges
            .get(&(state.clone(), action.clone()))
            .map(|edge| edge.outcomes.clone())
            .unwrap_or_default()
    }

    fn cost(&self, state: &String, action: &String) -> f64 {
        self.edges
            .get(&(state.clone(), action.clone()))
            .map_or(0., |edge| edge.cost)
    }

    fn num_levels(&self) -> usize {
        self.levels
    }

    fn level_cost(&self, state: &String, action: &String, level: usize) -> f64 {
        let Some(edge) = self.edges.get(&(state.clone(), action.clone())) else {
            return 0.;
        };
        match level {
            0 => edge.cost,
            _ => edge.secondary_costs.get(level - 1).copied().unwrap_or(0.),
        }
    }

    fn gamma(&self) -> f64 {
        self.gamma
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: &str = r#"
        states = ["a", "b", "c"]
        initial-state = "a"
        goals = ["c"]

        [[transitions]]
        state = "a"
        action = "go"
        cost = 1.0
        outcomes = [{ state = "b", probability = 1.0 }]

        [[transitions]]
        state = "b"
        action = "go"
        cost = 1.0
        outcomes = [{ state = "c", probability = 1.0 }]
    "#;

    #[test]
    fn parses_toml_description() {
        let problem = ExplicitProblem::from_toml_str(CHAIN).unwrap();
        assert_eq!(problem.initial_state(), "a");
        assert_eq!(problem.actions(), &["go".to_string()]);
        assert!(problem.is_goal(&"c".to_string()));
        assert!(problem.applicable(&"a".to_string(), &"go".to_string()));
        assert!(!problem.applicable(&"c".to_string(), &"go".to_string()));
        assert_eq!(
            problem.transition(&"a".to_string(), &"go".to_string()),
            vec![("b".to_string(), 1.)]
        );
        assert_eq!(problem.gamma(), 1.);
    }

    #[test]
    fn reads_description_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.toml");
        std::fs::write(&path, CHAIN).unwrap();
        let problem = ExplicitProblem::from_path(&path).unwrap();
        assert_eq!(problem.actions().len(), 1);
    }

    #[test]
    fn rejects_bad_probabilities() {
        let description = ExplicitDescription::new(&["a", "b"], "a", &["b"])
            .transition("a", "go", 1., &[("b", 0.5), ("a", 0.4)]);
        assert!(matches!(
            ExplicitProblem::new(description),
            Err(MdpError::MalformedProblem(_))
        ));
    }

    #[test]
    fn rejects_unknown_states_and_negative_costs() {
        let description =
            ExplicitDescription::new(&["a"], "a", &["a"]).transition("a", "go", 1., &[("z", 1.)]);
        assert!(matches!(
            ExplicitProblem::new(description),
            Err(MdpError::UnknownState(name)) if name == "z"
        ));

        let description =
            ExplicitDescription::new(&["a"], "a", &["a"]).transition("a", "go", -1., &[("a", 1.)]);
        assert!(ExplicitProblem::new(description).is_err());
    }

    #[test]
    fn reads_secondary_costs() {
        let problem = ExplicitProblem::from_toml_str(
            r#"
            states = ["a", "b"]
            initial-state = "a"
            goals = ["b"]

            [[transitions]]
            state = "a"
            action = "go"
            cost = 1.0
            secondary-costs = [4.0, 2.5]
            outcomes = [{ state = "b", probability = 1.0 }]

            [[transitions]]
            state = "a"
            action = "wait"
            cost = 1.0
            outcomes = [{ state = "a", probability = 1.0 }]
            "#,
        )
        .unwrap();
        let (a, go, wait) = ("a".to_string(), "go".to_string(), "wait".to_string());
        assert_eq!(problem.num_levels(), 3);
        assert_eq!(problem.level_cost(&a, &go, 0), 1.);
        assert_eq!(problem.level_cost(&a, &go, 2), 2.5);
        assert_eq!(problem.level_cost(&a, &wait, 1), 0.);
        assert_eq!(ExplicitProblem::from_toml_str(CHAIN).unwrap().num_levels(), 1);
    }

    #[test]
    fn rejects_negative_secondary_costs() {
        let description = ExplicitDescription::new(&["a", "b"], "a", &["b"])
            .transition("a", "go", 1., &[("b", 1.)])
            .secondary_costs(&[-2.]);
        assert!(matches!(
            ExplicitProblem::new(description),
            Err(MdpError::MalformedProblem(message)) if message.contains("-2")
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ExplicitProblem::from_path(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(MdpError::Io { .. })));
    }
}
