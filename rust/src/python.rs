//! Python bindings.

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

use chrono::NaiveDateTime;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::baseline::{self, SharePolicy};
use crate::config::{ObjectiveConfig, OptimizerConfig};
use crate::estimation;
use crate::models::{
    AllocationConstraints, ConnectionProbability, EventSequence, FollowerProfile,
    IntensityFunction, ObservationWindow, SlotGrid,
};
use crate::objective::{Objective, VisibilityObjective};
use crate::optimizer;
use crate::simulator;

fn value_error(err: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(err.to_string())
}

/// One follower's competing feed (PyO3 wrapper).
#[pyclass(name = "FollowerProfile")]
#[derive(Clone, Debug)]
pub struct PyFollowerProfile {
    #[pyo3(get, set)]
    pub wall_rates: Vec<f64>,
    #[pyo3(get, set)]
    pub connection_probability: Vec<f64>,
    #[pyo3(get, set)]
    pub weight: f64,
    /// Slot durations in hours; one-hour slots when absent
    #[pyo3(get, set)]
    pub durations: Option<Vec<f64>>,
}

#[pymethods]
impl PyFollowerProfile {
    #[new]
    #[pyo3(signature = (wall_rates, connection_probability=None, weight=1.0, durations=None))]
    fn new(
        wall_rates: Vec<f64>,
        connection_probability: Option<Vec<f64>>,
        weight: f64,
        durations: Option<Vec<f64>>,
    ) -> Self {
        let connection_probability =
            connection_probability.unwrap_or_else(|| vec![1.0; wall_rates.len()]);
        Self {
            wall_rates,
            connection_probability,
            weight,
            durations,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "FollowerProfile(slots={}, weight={})",
            self.wall_rates.len(),
            self.weight
        )
    }
}

impl PyFollowerProfile {
    fn to_profile(&self) -> PyResult<FollowerProfile> {
        let wall = match &self.durations {
            Some(durations) => {
                let grid = SlotGrid::new(durations.clone()).map_err(value_error)?;
                IntensityFunction::on_grid(self.wall_rates.clone(), grid)
            }
            None => IntensityFunction::from_rates(self.wall_rates.clone()),
        }
        .map_err(value_error)?;
        let connection = ConnectionProbability::new(self.connection_probability.clone())
            .map_err(value_error)?;
        FollowerProfile::new(wall, connection, self.weight).map_err(value_error)
    }
}

/// Optimizer configuration (PyO3 wrapper).
#[pyclass(name = "OptimizerConfig")]
#[derive(Clone, Debug)]
pub struct PyOptimizerConfig {
    #[pyo3(get, set)]
    pub threshold: f64,
    #[pyo3(get, set)]
    pub gamma: f64,
    #[pyo3(get, set)]
    pub armijo: f64,
    #[pyo3(get, set)]
    pub direction_scale: f64,
    #[pyo3(get, set)]
    pub max_iterations: usize,
    #[pyo3(get, set)]
    pub verbosity: u8,
}

#[pymethods]
impl PyOptimizerConfig {
    #[new]
    #[pyo3(signature = (threshold=None, gamma=None, armijo=None, direction_scale=None, max_iterations=None, verbosity=None))]
    fn new(
        threshold: Option<f64>,
        gamma: Option<f64>,
        armijo: Option<f64>,
        direction_scale: Option<f64>,
        max_iterations: Option<usize>,
        verbosity: Option<u8>,
    ) -> Self {
        let defaults = OptimizerConfig::default();
        Self {
            threshold: threshold.unwrap_or(defaults.threshold),
            gamma: gamma.unwrap_or(defaults.gamma),
            armijo: armijo.unwrap_or(defaults.armijo),
            direction_scale: direction_scale.unwrap_or(defaults.direction_scale),
            max_iterations: max_iterations.unwrap_or(defaults.max_iterations),
            verbosity: verbosity.unwrap_or(defaults.verbosity),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "OptimizerConfig(threshold={}, gamma={}, armijo={}, max_iterations={})",
            self.threshold, self.gamma, self.armijo, self.max_iterations
        )
    }
}

impl From<PyOptimizerConfig> for OptimizerConfig {
    fn from(config: PyOptimizerConfig) -> Self {
        Self {
            threshold: config.threshold,
            gamma: config.gamma,
            armijo: config.armijo,
            direction_scale: config.direction_scale,
            max_iterations: config.max_iterations,
            verbosity: config.verbosity,
        }
    }
}

fn build_objective(
    slots: usize,
    followers: &[PyFollowerProfile],
    k: usize,
    fairness: &str,
    integration: &str,
    gradient: &str,
) -> PyResult<VisibilityObjective> {
    let profiles = followers
        .iter()
        .map(PyFollowerProfile::to_profile)
        .collect::<PyResult<Vec<_>>>()?;
    let grid = profiles
        .first()
        .map(|p| p.wall_intensity().grid().clone())
        .unwrap_or_else(|| SlotGrid::hourly(slots));
    let config = ObjectiveConfig {
        k,
        fairness: fairness.parse().map_err(value_error)?,
        integration: integration.parse().map_err(value_error)?,
        gradient: gradient.parse().map_err(value_error)?,
    };
    VisibilityObjective::new(grid, profiles, config).map_err(value_error)
}

fn check_dimension(objective: &VisibilityObjective, rates: &[f64]) -> PyResult<()> {
    if rates.len() != objective.dimension() {
        return Err(value_error(format!(
            "Expected {} rates, got {}",
            objective.dimension(),
            rates.len()
        )));
    }
    Ok(())
}

/// Expected visible time of the broadcaster across followers.
///
/// # Raises
/// * ValueError on invalid profiles, unknown policy names or length mismatch
#[pyfunction]
#[pyo3(signature = (rates, followers, k=1, fairness="weighted", integration="closed_form"))]
fn expected_visibility(
    rates: Vec<f64>,
    followers: Vec<PyFollowerProfile>,
    k: usize,
    fairness: &str,
    integration: &str,
) -> PyResult<f64> {
    let objective = build_objective(rates.len(), &followers, k, fairness, integration, "analytic")?;
    check_dimension(&objective, &rates)?;
    Ok(objective.value(&rates))
}

/// Gradient of `expected_visibility` with respect to `rates`.
#[pyfunction]
#[pyo3(signature = (rates, followers, k=1, fairness="weighted", gradient="analytic"))]
fn visibility_gradient(
    rates: Vec<f64>,
    followers: Vec<PyFollowerProfile>,
    k: usize,
    fairness: &str,
    gradient: &str,
) -> PyResult<Vec<f64>> {
    let objective = build_objective(rates.len(), &followers, k, fairness, "closed_form", gradient)?;
    check_dimension(&objective, &rates)?;
    Ok(objective.gradient(&rates))
}

/// Optimize the broadcaster's rates.
///
/// # Returns
/// * (allocation, iterations, objective, termination)
///
/// # Raises
/// * ValueError if the budget exceeds the total capacity or inputs are invalid
#[pyfunction]
#[pyo3(signature = (followers, budget, upper_bounds, k=1, fairness="weighted", x0=None, config=None))]
fn optimize_schedule(
    followers: Vec<PyFollowerProfile>,
    budget: f64,
    upper_bounds: Vec<f64>,
    k: usize,
    fairness: &str,
    x0: Option<Vec<f64>>,
    config: Option<PyOptimizerConfig>,
) -> PyResult<(Vec<f64>, usize, f64, String)> {
    let objective = build_objective(
        upper_bounds.len(),
        &followers,
        k,
        fairness,
        "closed_form",
        "analytic",
    )?;
    let constraints = AllocationConstraints::new(budget, upper_bounds).map_err(value_error)?;
    let config: OptimizerConfig = config.map(Into::into).unwrap_or_default();
    let result = optimizer::optimize(&objective, &constraints, x0.as_deref(), &config)
        .map_err(value_error)?;
    Ok((
        result.allocation,
        result.iterations,
        result.objective,
        result.termination.as_str().to_string(),
    ))
}

/// Nearest point to `query` with entries in `[0, upper_bounds]` summing to `budget`.
#[pyfunction]
fn project(query: Vec<f64>, budget: f64, upper_bounds: Vec<f64>) -> PyResult<Vec<f64>> {
    let constraints = AllocationConstraints::new(budget, upper_bounds).map_err(value_error)?;
    optimizer::project(&query, &constraints).map_err(value_error)
}

/// Water-filling baseline; uniform shares unless `weights` is given.
#[pyfunction]
#[pyo3(signature = (budget, upper_bounds, weights=None))]
fn water_fill(budget: f64, upper_bounds: Vec<f64>, weights: Option<Vec<f64>>) -> PyResult<Vec<f64>> {
    let constraints = AllocationConstraints::new(budget, upper_bounds).map_err(value_error)?;
    let policy = match weights {
        Some(weights) => SharePolicy::Weighted(weights),
        None => SharePolicy::Uniform,
    };
    baseline::water_fill(&constraints, &policy).map_err(value_error)
}

/// Per-slot weights favouring slots with little competing activity.
#[pyfunction]
#[pyo3(signature = (followers, slots, online_scaled=false))]
fn inverse_competitor_weights(
    followers: Vec<PyFollowerProfile>,
    slots: usize,
    online_scaled: bool,
) -> PyResult<Vec<f64>> {
    let profiles = followers
        .iter()
        .map(PyFollowerProfile::to_profile)
        .collect::<PyResult<Vec<_>>>()?;
    Ok(baseline::inverse_competitor_weights(&profiles, slots, online_scaled))
}

/// Weighted time the newest of `mine` spends in the top-k against `theirs`.
#[pyfunction]
#[pyo3(signature = (mine, theirs, k, horizon, online_weight, initial_rank=None))]
fn time_in_top_k(
    mine: Vec<f64>,
    theirs: Vec<f64>,
    k: usize,
    horizon: f64,
    online_weight: Vec<f64>,
    initial_rank: Option<usize>,
) -> PyResult<f64> {
    let mine = EventSequence::new(mine).map_err(value_error)?;
    let theirs = EventSequence::new(theirs).map_err(value_error)?;
    Ok(simulator::time_in_top_k(
        &mine,
        &theirs,
        k,
        horizon,
        &online_weight,
        initial_rank,
    ))
}

/// Monte Carlo estimate of the time in top-k over one cycle of hourly rates.
///
/// # Returns
/// * (mean, standard deviation)
#[pyfunction]
#[pyo3(signature = (mine, theirs, k, online_weight, trials=10_000, seed=None))]
fn simulate_top_k(
    mine: Vec<f64>,
    theirs: Vec<f64>,
    k: usize,
    online_weight: Vec<f64>,
    trials: usize,
    seed: Option<u64>,
) -> PyResult<(f64, f64)> {
    let mine = IntensityFunction::from_rates(mine).map_err(value_error)?;
    let theirs = IntensityFunction::from_rates(theirs).map_err(value_error)?;
    let config = crate::config::SimulationConfig { trials, seed };
    let summary = simulator::simulate_with_config(&mine, &theirs, k, &online_weight, &config);
    Ok((summary.mean, summary.std_dev))
}

/// Hourly periodic intensity of `timestamps` observed in `[start, end)`.
#[pyfunction]
#[pyo3(signature = (timestamps, start, end, period_hours=24))]
fn estimate_intensity(
    timestamps: Vec<NaiveDateTime>,
    start: NaiveDateTime,
    end: NaiveDateTime,
    period_hours: usize,
) -> PyResult<Vec<f64>> {
    let window = ObservationWindow::from_dates(start, end).map_err(value_error)?;
    let events = EventSequence::from_datetimes(&timestamps);
    let grid = SlotGrid::hourly(period_hours);
    Ok(estimation::estimate_intensity(&events, &window, &grid)
        .rates()
        .to_vec())
}

/// Hourly connection probability of `timestamps` observed in `[start, end)`.
#[pyfunction]
#[pyo3(signature = (timestamps, start, end, period_hours=24))]
fn estimate_connection_probability(
    timestamps: Vec<NaiveDateTime>,
    start: NaiveDateTime,
    end: NaiveDateTime,
    period_hours: usize,
) -> PyResult<Vec<f64>> {
    let window = ObservationWindow::from_dates(start, end).map_err(value_error)?;
    let events = EventSequence::from_datetimes(&timestamps);
    let grid = SlotGrid::hourly(period_hours);
    Ok(
        estimation::estimate_connection_probability(&events, &window, &grid)
            .values()
            .to_vec(),
    )
}

/// The broadcast.rust Python module.
#[pymodule]
fn rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Data and config types
    m.add_class::<PyFollowerProfile>()?;
    m.add_class::<PyOptimizerConfig>()?;

    // Estimation
    m.add_function(wrap_pyfunction!(estimate_intensity, m)?)?;
    m.add_function(wrap_pyfunction!(estimate_connection_probability, m)?)?;

    // Objective and optimization
    m.add_function(wrap_pyfunction!(expected_visibility, m)?)?;
    m.add_function(wrap_pyfunction!(visibility_gradient, m)?)?;
    m.add_function(wrap_pyfunction!(optimize_schedule, m)?)?;
    m.add_function(wrap_pyfunction!(project, m)?)?;

    // Baselines and simulation
    m.add_function(wrap_pyfunction!(water_fill, m)?)?;
    m.add_function(wrap_pyfunction!(inverse_competitor_weights, m)?)?;
    m.add_function(wrap_pyfunction!(time_in_top_k, m)?)?;
    m.add_function(wrap_pyfunction!(simulate_top_k, m)?)?;

    Ok(())
}
