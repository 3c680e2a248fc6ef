//! Projected gradient ascent under a budget and per-slot ceilings.

mod projector;

pub use projector::{feasibility_tolerance, project};

use thiserror::Error;

use crate::config::{ConfigError, OptimizerConfig};
use crate::models::AllocationConstraints;
use crate::objective::Objective;
use crate::{log_debug, log_progress, log_steps};

/// Errors that can occur during optimization.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizeError {
    #[error("Constraints are infeasible: {0}")]
    ConstraintInfeasible(String),
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Invalid optimizer configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Why the optimizer stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Budget equals total capacity; the upper bounds were returned as is.
    Trivial,
    /// The accepted step fell below the threshold.
    Converged,
    /// No step along the projected direction improved the objective. With a
    /// gradient consistent with the objective this only happens once the
    /// objective turns non-finite or flat to rounding error along the step.
    Stalled,
    /// The iteration cap was reached; the last iterate is returned.
    IterationCap,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Trivial => "trivial",
            Termination::Converged => "converged",
            Termination::Stalled => "stalled",
            Termination::IterationCap => "iteration_cap",
        }
    }
}

/// Result of an optimization run.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizeResult {
    /// Rate per slot
    pub allocation: Vec<f64>,
    pub iterations: usize,
    /// Objective value at `allocation`
    pub objective: f64,
    pub termination: Termination,
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `x + step * direction`
fn advance(x: &[f64], direction: &[f64], step: f64) -> Vec<f64> {
    x.iter().zip(direction).map(|(xi, di)| xi + step * di).collect()
}

/// Maximize `objective` over `{x : 0 <= x <= u, Σx = budget}`.
///
/// Starts from the projection of `seed` (zeros when absent). Each iteration
/// moves towards the projection of `x + scale * ∇f(x)` with an Armijo
/// backtracking line search. A budget above the total capacity is an error;
/// a budget equal to it returns the upper bounds without iterating.
pub fn optimize<O: Objective + ?Sized>(
    objective: &O,
    constraints: &AllocationConstraints,
    seed: Option<&[f64]>,
    config: &OptimizerConfig,
) -> Result<OptimizeResult, OptimizeError> {
    config.validate()?;
    let verbosity = config.verbosity;

    let dimension = objective.dimension();
    if constraints.len() != dimension {
        return Err(OptimizeError::DimensionMismatch {
            expected: dimension,
            actual: constraints.len(),
        });
    }

    let budget = constraints.budget();
    let capacity = constraints.capacity();
    let tolerance = feasibility_tolerance(budget);
    if capacity < budget - tolerance {
        return Err(OptimizeError::ConstraintInfeasible(format!(
            "budget {} exceeds total capacity {}",
            budget, capacity
        )));
    }
    if (capacity - budget).abs() <= tolerance {
        log_progress!(verbosity, "Budget saturates every slot, returning upper bounds");
        let allocation = constraints.upper_bounds().to_vec();
        return Ok(OptimizeResult {
            objective: objective.value(&allocation),
            allocation,
            iterations: 0,
            termination: Termination::Trivial,
        });
    }

    let start = match seed {
        Some(seed) => seed.to_vec(),
        None => vec![0.0; dimension],
    };
    let mut x = project(&start, constraints)?;
    let mut value = objective.value(&x);
    log_progress!(
        verbosity,
        "Optimizing {} slots, budget {:.4}, initial objective {:.6}",
        dimension,
        budget,
        value
    );

    for iteration in 0..config.max_iterations {
        let gradient = objective.gradient(&x);
        log_debug!(verbosity, "  iteration {}: x = {:?}", iteration, x);
        log_debug!(verbosity, "  iteration {}: gradient = {:?}", iteration, gradient);

        let target = advance(&x, &gradient, config.direction_scale);
        let projected = project(&target, constraints)?;
        let direction: Vec<f64> = projected.iter().zip(&x).map(|(p, xi)| p - xi).collect();
        let slope = dot(&gradient, &direction);
        let direction_norm = norm(&direction);

        let mut step = config.gamma;
        let mut candidate = advance(&x, &direction, step);
        let mut gain = objective.value(&candidate) - value;
        while gain < config.armijo * step * slope && step * direction_norm > config.threshold {
            step *= config.gamma;
            candidate = advance(&x, &direction, step);
            gain = objective.value(&candidate) - value;
        }
        log_steps!(
            verbosity,
            "  iteration {}: step {:.3e}, length {:.3e}, gain {:.3e}",
            iteration,
            step,
            step * direction_norm,
            gain
        );

        if step * direction_norm < config.threshold {
            log_progress!(
                verbosity,
                "Converged after {} iterations, objective {:.6}",
                iteration,
                value
            );
            return Ok(OptimizeResult {
                allocation: x,
                iterations: iteration,
                objective: value,
                termination: Termination::Converged,
            });
        }
        if gain > 0.0 {
            x = candidate;
            value += gain;
        } else {
            log_progress!(
                verbosity,
                "No improving step after {} iterations, objective {:.6}",
                iteration,
                value
            );
            return Ok(OptimizeResult {
                allocation: x,
                iterations: iteration,
                objective: value,
                termination: Termination::Stalled,
            });
        }
    }

    log_progress!(
        verbosity,
        "Iteration cap {} reached, objective {:.6}",
        config.max_iterations,
        value
    );
    Ok(OptimizeResult {
        allocation: x,
        iterations: config.max_iterations,
        objective: value,
        termination: Termination::IterationCap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Concave quadratic `-Σ (x_i - target_i)^2`.
    struct Quadratic {
        target: Vec<f64>,
    }

    impl Objective for Quadratic {
        fn dimension(&self) -> usize {
            self.target.len()
        }

        fn value(&self, x: &[f64]) -> f64 {
            -x.iter()
                .zip(&self.target)
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
        }

        fn gradient(&self, x: &[f64]) -> Vec<f64> {
            x.iter().zip(&self.target).map(|(a, b)| -2.0 * (a - b)).collect()
        }
    }

    fn make_config() -> OptimizerConfig {
        OptimizerConfig {
            threshold: 1e-8,
            direction_scale: 1.0,
            ..OptimizerConfig::default()
        }
    }

    #[test]
    fn test_quadratic_reaches_projection_of_target() {
        let objective = Quadratic {
            target: vec![3.0, 1.0, -1.0],
        };
        let constraints = AllocationConstraints::new(2.0, vec![10.0, 10.0, 10.0]).unwrap();
        let result = optimize(&objective, &constraints, None, &make_config()).unwrap();

        let expected = project(&objective.target, &constraints).unwrap();
        for (a, e) in result.allocation.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-3, "{:?} vs {:?}", result.allocation, expected);
        }
        assert!(matches!(
            result.termination,
            Termination::Converged | Termination::Stalled
        ));
    }

    #[test]
    fn test_saturated_budget_is_trivial() {
        let objective = Quadratic {
            target: vec![0.0, 0.0],
        };
        let constraints = AllocationConstraints::new(3.0, vec![1.0, 2.0]).unwrap();
        let result = optimize(&objective, &constraints, None, &make_config()).unwrap();
        assert_eq!(result.allocation, vec![1.0, 2.0]);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.termination, Termination::Trivial);
        assert!((result.objective + 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_budget_above_capacity_fails() {
        let objective = Quadratic {
            target: vec![0.0, 0.0],
        };
        let constraints = AllocationConstraints::new(4.0, vec![1.0, 2.0]).unwrap();
        let result = optimize(&objective, &constraints, None, &make_config());
        assert!(matches!(result, Err(OptimizeError::ConstraintInfeasible(_))));
    }

    #[test]
    fn test_dimension_and_config_checks() {
        let objective = Quadratic {
            target: vec![0.0, 0.0],
        };
        let constraints = AllocationConstraints::new(1.0, vec![1.0, 1.0, 1.0]).unwrap();
        assert_eq!(
            optimize(&objective, &constraints, None, &make_config()),
            Err(OptimizeError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        );

        let constraints = AllocationConstraints::new(1.0, vec![1.0, 1.0]).unwrap();
        let config = OptimizerConfig {
            gamma: 0.0,
            ..make_config()
        };
        assert!(matches!(
            optimize(&objective, &constraints, None, &config),
            Err(OptimizeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_iteration_cap_returns_last_iterate() {
        let objective = Quadratic {
            target: vec![5.0, 0.0],
        };
        let constraints = AllocationConstraints::new(1.0, vec![1.0, 1.0]).unwrap();
        let config = OptimizerConfig {
            max_iterations: 1,
            ..make_config()
        };
        let result = optimize(&objective, &constraints, Some(&[0.0, 1.0][..]), &config).unwrap();
        assert_eq!(result.termination, Termination::IterationCap);
        assert_eq!(result.iterations, 1);
        let total: f64 = result.allocation.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(result.allocation[0] > 0.0);
    }

    /// `x_0` up to 0.6, undefined beyond.
    struct Cliff;

    impl Objective for Cliff {
        fn dimension(&self) -> usize {
            2
        }

        fn value(&self, x: &[f64]) -> f64 {
            if x[0] > 0.6 {
                f64::NAN
            } else {
                x[0]
            }
        }

        fn gradient(&self, _x: &[f64]) -> Vec<f64> {
            vec![1.0, 0.0]
        }
    }

    #[test]
    fn test_no_improving_step_stalls() {
        let constraints = AllocationConstraints::new(1.0, vec![1.0, 1.0]).unwrap();
        let result = optimize(&Cliff, &constraints, Some(&[0.5, 0.5][..]), &make_config()).unwrap();
        assert_eq!(result.termination, Termination::Stalled);
        assert_eq!(result.termination.as_str(), "stalled");
        assert_eq!(result.iterations, 0);
        assert_eq!(result.allocation, vec![0.5, 0.5]);
        assert_eq!(result.objective, 0.5);
    }

    #[test]
    fn test_warm_start_at_optimum_stops_immediately() {
        let objective = Quadratic {
            target: vec![0.5, 0.5],
        };
        let constraints = AllocationConstraints::new(1.0, vec![1.0, 1.0]).unwrap();
        let result = optimize(&objective, &constraints, Some(&[0.5, 0.5][..]), &make_config()).unwrap();
        assert_eq!(result.iterations, 0);
        assert_eq!(result.allocation, vec![0.5, 0.5]);
        assert_eq!(result.termination, Termination::Converged);
    }
}
