//! Discrete-event simulation of competing posting processes.
//!
//! The simulator draws realizations of two intensity functions and measures,
//! exactly, how long the first stays within the top-k of the merged feed. It
//! exists to validate the closed-form objective in `objective`.

mod ranking;
mod sampling;

pub use ranking::{integrate_weight, time_in_top_k};
pub use sampling::{sample_from_intensity, sample_poisson, MIN_SAMPLING_RATE};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::statistics::Statistics;

use crate::config::SimulationConfig;
use crate::models::IntensityFunction;

/// Sample statistics of the simulated time in top-k.
#[derive(Clone, Debug, PartialEq)]
pub struct MonteCarloSummary {
    pub mean: f64,
    /// Population standard deviation across trials.
    pub std_dev: f64,
    pub trials: usize,
}

impl MonteCarloSummary {
    /// Standard error of the mean.
    pub fn std_error(&self) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }
        self.std_dev / (self.trials as f64).sqrt()
    }
}

/// Estimate the expected time in top-k by repeated simulation over one cycle.
///
/// Each trial samples both intensities independently from time zero and
/// evaluates `time_in_top_k` with the horizon set to the cycle length of
/// `mine` and the broadcaster initially outside the top-k.
pub fn simulate_top_k<R: Rng + ?Sized>(
    rng: &mut R,
    mine: &IntensityFunction,
    theirs: &IntensityFunction,
    k: usize,
    online_weight: &[f64],
    trials: usize,
) -> MonteCarloSummary {
    if trials == 0 {
        return MonteCarloSummary {
            mean: 0.0,
            std_dev: 0.0,
            trials: 0,
        };
    }

    let horizon = mine.period();
    let mut samples = Vec::with_capacity(trials);
    for _ in 0..trials {
        let ours = sample_from_intensity(&mut *rng, mine, 0.0);
        let competing = sample_from_intensity(&mut *rng, theirs, 0.0);
        samples.push(time_in_top_k(
            &ours,
            &competing,
            k,
            horizon,
            online_weight,
            None,
        ));
    }

    MonteCarloSummary {
        mean: samples.iter().mean(),
        std_dev: samples.iter().population_std_dev(),
        trials,
    }
}

/// `simulate_top_k` with trial count and seeding taken from `config`.
pub fn simulate_with_config(
    mine: &IntensityFunction,
    theirs: &IntensityFunction,
    k: usize,
    online_weight: &[f64],
    config: &SimulationConfig,
) -> MonteCarloSummary {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    simulate_top_k(&mut rng, mine, theirs, k, online_weight, config.trials)
}
