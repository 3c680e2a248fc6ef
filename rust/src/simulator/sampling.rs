//! Sampling realizations of piecewise-constant Poisson processes.

use rand::Rng;
use rand_distr::{Distribution, Exp};

use crate::models::{EventSequence, IntensityFunction};

/// Rates below this are treated as producing no arrivals.
pub const MIN_SAMPLING_RATE: f64 = 1e-7;

/// Sample a homogeneous Poisson process with `rate` events per hour on `[start, end)`.
///
/// Inter-arrival gaps are exponential with mean `1 / rate`. Rates below
/// `MIN_SAMPLING_RATE` (and non-finite rates) yield no arrivals.
pub fn sample_poisson<R: Rng + ?Sized>(rng: &mut R, rate: f64, start: f64, end: f64) -> Vec<f64> {
    if !rate.is_finite() || rate < MIN_SAMPLING_RATE {
        return Vec::new();
    }
    let Ok(gaps) = Exp::new(rate) else {
        return Vec::new();
    };

    let mut arrivals = Vec::new();
    let mut last_arrival = start;
    loop {
        last_arrival += gaps.sample(rng);
        if last_arrival >= end {
            break;
        }
        arrivals.push(last_arrival);
    }
    arrivals
}

/// Sample one cycle of `intensity`, starting at `start_time`.
///
/// Each slot is sampled independently and offset by the cumulative duration
/// of the slots before it.
pub fn sample_from_intensity<R: Rng + ?Sized>(
    rng: &mut R,
    intensity: &IntensityFunction,
    start_time: f64,
) -> EventSequence {
    let mut times = Vec::new();
    let mut slot_start = start_time;
    for (rate, duration) in intensity.slots() {
        times.extend(sample_poisson(rng, rate, slot_start, slot_start + duration));
        slot_start += duration;
    }
    EventSequence::from_sorted(times)
}
