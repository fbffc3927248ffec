use crate::{
    error::MdpError,
    model::DEAD_END_COST,
    solvers::{
        DistanceFunction, HorizonFunction, ThtsActionSelection, ThtsBackup, ThtsOutcomeSelection,
        ThtsRecommendation, TransitionModifier,
    },
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Hyper-parameters for every solver, read from TOML. Each solver only looks
/// at the keys it understands; unset keys take their defaults.
///
/// ```toml
/// epsilon = 1e-4
/// seed = 17
/// horizon = 4
///
/// [thts]
/// backup = "partial-bellman"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SolverConfig {
    /// Residual tolerance for convergence.
    pub epsilon: f64,
    /// Maximum number of trials (or iterations, for sweeping solvers).
    pub max_trials: usize,
    /// Wall-clock limit of a single solve, in milliseconds.
    pub time_limit_ms: Option<u64>,
    pub memory_limit_mb: Option<usize>,
    /// Seed of the solver's random generator; system entropy without one.
    pub seed: Option<u64>,
    /// Look-ahead horizon of FLARES, Soft-FLARES, MLRTDP and SSiPP, and
    /// search depth of HOP.
    pub horizon: usize,
    /// Heuristic weight of LAO*.
    pub weight: f64,
    /// When set, SSiPP builds its short-sighted SSPs by trajectory
    /// probability instead of depth.
    pub rho: Option<f64>,
    /// Double the horizon until the initial state is fully solved. Soft-FLARES
    /// instead checks residuals without a horizon.
    pub optimal: bool,
    /// FLARES measures depth in log-probability rather than steps.
    pub use_probs_for_depth: bool,
    /// Label states of the full problem as SSiPP trials converge them. Without
    /// labels Soft-FLARES runs plain RTDP trials.
    pub labeled: bool,
    /// Initial upper bound of the bounded solvers.
    pub upper_bound: f64,
    pub tau: f64,
    /// Probability of bound-gap sampling when no successor has useful VPI.
    pub alpha: f64,
    /// Average successor gap above which VPI is not computed.
    pub beta: f64,
    /// Use plain transition sampling in VPI-RTDP.
    pub vanilla_sample: bool,
    pub max_rollouts: usize,
    /// Maximum rollout depth of UCT.
    pub cutoff: usize,
    /// UCB1 exploration constant.
    pub exploration: f64,
    /// Scale exploration by the Q-value being explored.
    pub use_qvalues_for_exploration: bool,
    pub auto_adjust_depth: bool,
    pub virtual_rollouts: usize,
    /// Depth of the THTS tree.
    pub max_depth: usize,
    /// How far above the best value of a lexicographic level an action may
    /// be and still compete on the next level.
    pub slack: f64,
    /// Determinised futures HOP averages over.
    pub samples: usize,
    pub thts: ThtsConfig,
    pub soft_flares: SoftFlaresConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ThtsConfig {
    pub action_selection: ThtsActionSelection,
    pub outcome_selection: ThtsOutcomeSelection,
    pub backup: ThtsBackup,
    pub recommendation: ThtsRecommendation,
    /// Node expansions allowed in one trial before it switches to leaf
    /// evaluation.
    pub max_expansions_per_trial: usize,
    /// Prior variance used by minimum-variance outcome selection for
    /// outcomes that have not been explicated yet.
    pub prior_variance: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SoftFlaresConfig {
    pub modifier: TransitionModifier,
    pub distance: DistanceFunction,
    pub horizon_function: HorizonFunction,
    /// Probability that a state at the horizon counts as unlabeled, and
    /// one minus that of a state at distance zero.
    pub alpha: f64,
    /// Probability that a residual check ignores the horizon, for the
    /// Bernoulli horizon function.
    pub psi: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            max_trials: 1_000_000,
            time_limit_ms: None,
            memory_limit_mb: None,
            seed: None,
            horizon: 3,
            weight: 1.,
            rho: None,
            optimal: false,
            use_probs_for_depth: false,
            labeled: true,
            upper_bound: DEAD_END_COST,
            tau: 10.,
            alpha: 1.,
            beta: 45.,
            vanilla_sample: false,
            max_rollouts: 1000,
            cutoff: 50,
            exploration: 0.,
            use_qvalues_for_exploration: true,
            auto_adjust_depth: false,
            virtual_rollouts: 0,
            max_depth: 50,
            slack: 0.,
            samples: 100,
            thts: ThtsConfig::default(),
            soft_flares: SoftFlaresConfig::default(),
        }
    }
}

impl Default for ThtsConfig {
    fn default() -> Self {
        Self {
            action_selection: ThtsActionSelection::Ucb1,
            outcome_selection: ThtsOutcomeSelection::TransitionFunction,
            backup: ThtsBackup::MonteCarlo,
            recommendation: ThtsRecommendation::BestValue,
            max_expansions_per_trial: usize::MAX,
            prior_variance: 100_000.,
        }
    }
}

impl Default for SoftFlaresConfig {
    fn default() -> Self {
        Self {
            modifier: TransitionModifier::Logistic,
            distance: DistanceFunction::Steps,
            horizon_function: HorizonFunction::Fixed,
            alpha: 0.01,
            psi: 0.,
        }
    }
}

impl SolverConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, MdpError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, MdpError> {
        let text = std::fs::read_to_string(path).map_err(|e| MdpError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_default() {
        assert_eq!(SolverConfig::from_toml_str("").unwrap(), SolverConfig::default());
    }

    #[test]
    fn reads_nested_thts_section() {
        let config = SolverConfig::from_toml_str(
            r#"
            epsilon = 0.01
            time-limit-ms = 250
            seed = 3

            [thts]
            backup = "partial-bellman"
            outcome-selection = "min-variance"
            "#,
        )
        .unwrap();
        assert_eq!(config.epsilon, 0.01);
        assert_eq!(config.time_limit(), Some(Duration::from_millis(250)));
        assert_eq!(config.seed, Some(3));
        assert_eq!(config.thts.backup, ThtsBackup::PartialBellman);
        assert_eq!(
            config.thts.outcome_selection,
            ThtsOutcomeSelection::MinVariance
        );
        assert_eq!(config.thts.recommendation, ThtsRecommendation::BestValue);
    }

    #[test]
    fn reads_soft_flares_section() {
        let config = SolverConfig::from_toml_str(
            r#"
            horizon = 5
            slack = 0.25

            [soft-flares]
            modifier = "exponential"
            distance = "plausibility"
            horizon-function = "bernoulli"
            psi = 0.3
            "#,
        )
        .unwrap();
        assert_eq!(config.horizon, 5);
        assert_eq!(config.slack, 0.25);
        assert_eq!(config.soft_flares.modifier, TransitionModifier::Exponential);
        assert_eq!(config.soft_flares.distance, DistanceFunction::Plausibility);
        assert_eq!(config.soft_flares.horizon_function, HorizonFunction::Bernoulli);
        assert_eq!(config.soft_flares.psi, 0.3);
        assert_eq!(config.soft_flares.alpha, 0.01);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            SolverConfig::from_toml_str("epsilonn = 1.0"),
            Err(MdpError::Config(_))
        ));
    }

    #[test]
    fn reads_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solver.toml");
        std::fs::write(&path, "horizon = 7\nweight = 2.0\n").unwrap();
        let config = SolverConfig::from_path(&path).unwrap();
        assert_eq!(config.horizon, 7);
        assert_eq!(config.weight, 2.);
    }
}
