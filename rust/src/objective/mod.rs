//! Analytic visibility objective and its gradient.
//!
//! For each follower the expected online-weighted time in the top-k is
//! evaluated in closed form (see `closed_form`), and followers are combined
//! by a fairness policy.

mod closed_form;
mod gradient;

pub use closed_form::{expected_top_k, propagate, slot_integral, MIN_TOTAL_RATE};
pub use gradient::{finite_difference, top_one_gradient, FINITE_DIFFERENCE_STEP};

use thiserror::Error;

use closed_form::{check_initial_state, visible_time};
use crate::config::{Fairness, GradientMethod, ObjectiveConfig};
use crate::models::{FollowerProfile, SlotGrid};

/// Errors raised when building or evaluating an objective.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObjectiveError {
    #[error("Top-k depth must be positive, got {0}")]
    InvalidTopK(usize),
    #[error("Follower {follower} uses a different slot grid")]
    GridMismatch { follower: usize },
    #[error("Initial state must hold k probabilities in [0, 1]")]
    InvalidInitialState,
}

/// A differentiable function of the broadcaster's per-slot rates.
///
/// Callers pass vectors of length `dimension()`.
pub trait Objective {
    fn dimension(&self) -> usize;

    fn value(&self, rates: &[f64]) -> f64;

    fn gradient(&self, rates: &[f64]) -> Vec<f64>;
}

/// Expected visibility of a broadcaster across a set of followers.
#[derive(Debug, Clone)]
pub struct VisibilityObjective {
    grid: SlotGrid,
    followers: Vec<FollowerProfile>,
    config: ObjectiveConfig,
    initial: Vec<f64>,
}

impl VisibilityObjective {
    /// Every follower must share `grid`. An empty follower list is allowed
    /// and evaluates to zero everywhere.
    pub fn new(
        grid: SlotGrid,
        followers: Vec<FollowerProfile>,
        config: ObjectiveConfig,
    ) -> Result<Self, ObjectiveError> {
        if config.k == 0 {
            return Err(ObjectiveError::InvalidTopK(0));
        }
        if let Some(follower) = followers
            .iter()
            .position(|f| f.wall_intensity().grid() != &grid)
        {
            return Err(ObjectiveError::GridMismatch { follower });
        }
        let initial = vec![0.0; config.k];
        Ok(Self {
            grid,
            followers,
            config,
            initial,
        })
    }

    /// Start every follower's feed from the rank distribution `initial`
    /// instead of "not visible".
    pub fn with_initial_state(mut self, initial: Vec<f64>) -> Result<Self, ObjectiveError> {
        check_initial_state(&initial, self.config.k)?;
        self.initial = initial;
        Ok(self)
    }

    pub fn grid(&self) -> &SlotGrid {
        &self.grid
    }

    pub fn followers(&self) -> &[FollowerProfile] {
        &self.followers
    }

    pub fn config(&self) -> &ObjectiveConfig {
        &self.config
    }

    /// Expected visible time for each follower, in follower order.
    pub fn per_follower(&self, rates: &[f64]) -> Vec<f64> {
        self.followers
            .iter()
            .map(|follower| self.follower_value(rates, follower))
            .collect()
    }

    fn follower_value(&self, rates: &[f64], follower: &FollowerProfile) -> f64 {
        visible_time(
            rates,
            follower,
            self.initial.clone(),
            self.config.integration,
        )
    }

    fn follower_gradient(&self, rates: &[f64], follower: &FollowerProfile) -> Vec<f64> {
        match self.config.gradient {
            GradientMethod::Analytic if self.config.k == 1 => {
                top_one_gradient(rates, follower, self.initial[0])
            }
            _ => finite_difference(|x| self.follower_value(x, follower), rates),
        }
    }

    /// Index of the least visible follower; ties go to the first.
    fn worst_follower(&self, rates: &[f64]) -> Option<(usize, f64)> {
        self.per_follower(rates)
            .into_iter()
            .enumerate()
            .fold(None, |worst, (i, value)| match worst {
                Some((_, lowest)) if lowest <= value => worst,
                _ => Some((i, value)),
            })
    }
}

impl Objective for VisibilityObjective {
    fn dimension(&self) -> usize {
        self.grid.len()
    }

    fn value(&self, rates: &[f64]) -> f64 {
        match self.config.fairness {
            Fairness::WeightedAverage => self
                .followers
                .iter()
                .map(|f| f.weight() * self.follower_value(rates, f))
                .sum(),
            Fairness::WorstFollower => self
                .worst_follower(rates)
                .map_or(0.0, |(_, value)| value),
        }
    }

    fn gradient(&self, rates: &[f64]) -> Vec<f64> {
        let mut total = vec![0.0; rates.len()];
        match self.config.fairness {
            Fairness::WeightedAverage => {
                for follower in &self.followers {
                    let weight = follower.weight();
                    if weight == 0.0 {
                        continue;
                    }
                    let partial = self.follower_gradient(rates, follower);
                    for (sum, g) in total.iter_mut().zip(partial) {
                        *sum += weight * g;
                    }
                }
            }
            Fairness::WorstFollower => {
                if let Some((worst, _)) = self.worst_follower(rates) {
                    total = self.follower_gradient(rates, &self.followers[worst]);
                }
            }
        }
        total
    }
}
