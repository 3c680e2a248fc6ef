//! Configuration types for estimation, objective evaluation and optimization.

use std::str::FromStr;
use thiserror::Error;

use crate::models::SlotGrid;

/// Errors raised when parsing configuration names.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown fairness policy: {0}")]
    UnknownFairness(String),
    #[error("Unknown integration method: {0}")]
    UnknownIntegration(String),
    #[error("Unknown gradient method: {0}")]
    UnknownGradient(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How per-follower visibility is combined into one objective value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Fairness {
    /// Σ weight_i * visibility_i
    #[default]
    WeightedAverage,
    /// min_i visibility_i (weights ignored)
    WorstFollower,
}

impl FromStr for Fairness {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weighted" | "weighted_average" => Ok(Self::WeightedAverage),
            "worst" | "worst_follower" | "max_min" => Ok(Self::WorstFollower),
            other => Err(ConfigError::UnknownFairness(other.to_string())),
        }
    }
}

/// How the per-slot integral of the rank probability is evaluated.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Integration {
    /// Exact antiderivative via the incomplete gamma function.
    #[default]
    ClosedForm,
    /// Composite trapezoid rule with `samples` evenly spaced points.
    Trapezoid { samples: usize },
    /// Adaptive Simpson quadrature to an absolute `tolerance`.
    AdaptiveSimpson { tolerance: f64 },
}

impl FromStr for Integration {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed_form" | "exact" => Ok(Self::ClosedForm),
            "trapezoid" | "trapz" => Ok(Self::Trapezoid { samples: 101 }),
            "adaptive" | "quad" => Ok(Self::AdaptiveSimpson { tolerance: 1e-6 }),
            other => Err(ConfigError::UnknownIntegration(other.to_string())),
        }
    }
}

/// How the objective gradient is computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GradientMethod {
    /// Central differences (forward near zero); reference implementation.
    FiniteDifference,
    /// Forward/backward pass; top-1 only, other k fall back to differences.
    #[default]
    Analytic,
}

impl FromStr for GradientMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "finite_difference" | "numeric" => Ok(Self::FiniteDifference),
            "analytic" => Ok(Self::Analytic),
            other => Err(ConfigError::UnknownGradient(other.to_string())),
        }
    }
}

/// Configuration for the visibility objective.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectiveConfig {
    /// Feed depth that still counts as visible (rank <= k)
    pub k: usize,
    pub fairness: Fairness,
    pub integration: Integration,
    pub gradient: GradientMethod,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self {
            k: 1,
            fairness: Fairness::WeightedAverage,
            integration: Integration::ClosedForm,
            gradient: GradientMethod::Analytic,
        }
    }
}

impl ObjectiveConfig {
    pub fn top_k(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }
}

/// Configuration for projected gradient ascent.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerConfig {
    /// Stop once the accepted step is shorter than this
    pub threshold: f64,
    /// Initial step and shrink factor of the line search
    pub gamma: f64,
    /// Armijo sufficient-increase constant
    pub armijo: f64,
    /// Gradient multiplier before projecting onto the feasible set
    pub direction_scale: f64,
    pub max_iterations: usize,
    /// Logging verbosity (see `logging`)
    pub verbosity: u8,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            threshold: 1e-3,
            gamma: 0.8,
            armijo: 0.5,
            direction_scale: 1000.0,
            max_iterations: 50_000,
            verbosity: 0,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.gamma > 0.0 && self.gamma < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "gamma must lie in (0, 1), got {}",
                self.gamma
            )));
        }
        if self.threshold.is_nan() || self.threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "threshold must be positive, got {}",
                self.threshold
            )));
        }
        if self.direction_scale.is_nan() || self.direction_scale <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "direction_scale must be positive, got {}",
                self.direction_scale
            )));
        }
        Ok(())
    }
}

/// Configuration for Monte Carlo validation runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulationConfig {
    pub trials: usize,
    /// Fixed seed for reproducible runs; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            trials: 10_000,
            seed: None,
        }
    }
}

/// Configuration for learning follower profiles and planning a schedule.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannerConfig {
    /// Slot grid of one cycle
    pub grid: SlotGrid,
    /// Followers with a smaller total connection probability are dropped
    pub min_connection_mass: f64,
    pub objective: ObjectiveConfig,
    pub optimizer: OptimizerConfig,
    pub verbosity: u8,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            grid: SlotGrid::hourly(24),
            min_connection_mass: 0.1,
            objective: ObjectiveConfig::default(),
            optimizer: OptimizerConfig::default(),
            verbosity: 0,
        }
    }
}

/// Configuration for scoring schedules against follower activity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvaluationConfig {
    /// Feed depth that counts as visible
    pub k: usize,
    /// The score averages this many of the least visible followers
    pub least_visible: usize,
    /// Sampled realizations per schedule
    pub trials: usize,
    pub verbosity: u8,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            k: 1,
            least_visible: 10,
            trials: 10,
            verbosity: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimizer_defaults() {
        let config = OptimizerConfig::default();
        assert!((config.gamma - 0.8).abs() < 1e-12);
        assert!((config.armijo - 0.5).abs() < 1e-12);
        assert_eq!(config.max_iterations, 50_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_optimizer_rejects_bad_gamma() {
        let config = OptimizerConfig {
            gamma: 1.0,
            ..OptimizerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("max_min".parse::<Fairness>(), Ok(Fairness::WorstFollower));
        assert_eq!(
            "trapz".parse::<Integration>(),
            Ok(Integration::Trapezoid { samples: 101 })
        );
        assert_eq!(
            "numeric".parse::<GradientMethod>(),
            Ok(GradientMethod::FiniteDifference)
        );
        assert_eq!(
            "median".parse::<Fairness>(),
            Err(ConfigError::UnknownFairness("median".to_string()))
        );
    }

    #[test]
    fn test_planner_default_grid_is_daily() {
        let config = PlannerConfig::default();
        assert_eq!(config.grid.len(), 24);
        assert_eq!(config.objective.k, 1);
    }
}
