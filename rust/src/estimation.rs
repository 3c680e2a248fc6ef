//! Empirical estimation of periodic intensity and connection probability.
//!
//! Both estimators fold absolute timestamps onto one cycle of the slot grid
//! and average over the number of whole cycles in the observation window.

use rustc_hash::FxHashSet;

use crate::models::{
    ConnectionProbability, EventSequence, IntensityFunction, ObservationWindow, SlotGrid,
};

/// Cycle slot of an absolute timestamp.
fn slot_of_event(time: f64, grid: &SlotGrid) -> usize {
    grid.slot_of(time.rem_euclid(grid.period()))
}

/// Estimate the periodic posting rate of `events` inside `window`.
///
/// rate_i = events in slot i / observed periods / duration of slot i
///
/// A window without events yields an all-zero intensity.
pub fn estimate_intensity(
    events: &EventSequence,
    window: &ObservationWindow,
    grid: &SlotGrid,
) -> IntensityFunction {
    let observed = events.window(window.start(), window.end());
    if observed.is_empty() {
        return IntensityFunction::zeros(grid);
    }

    let periods = window.observed_periods(grid.period()) as f64;
    let mut counts = vec![0usize; grid.len()];
    for &time in observed.times() {
        counts[slot_of_event(time, grid)] += 1;
    }

    let rates: Vec<f64> = counts
        .iter()
        .zip(grid.durations())
        .map(|(&count, &duration)| count as f64 / periods / duration)
        .collect();

    // Rates are finite and non-negative here.
    IntensityFunction::on_grid(rates, grid.clone())
        .unwrap_or_else(|_| IntensityFunction::zeros(grid))
}

/// Estimate the probability that the account is active in each slot.
///
/// p_i = periods with at least one event in slot i / observed periods,
/// capped at 1 when the window holds partial periods.
pub fn estimate_connection_probability(
    events: &EventSequence,
    window: &ObservationWindow,
    grid: &SlotGrid,
) -> ConnectionProbability {
    let observed = events.window(window.start(), window.end());
    if observed.is_empty() {
        return ConnectionProbability::zeros(grid.len());
    }

    let period = grid.period();
    let periods = window.observed_periods(period) as f64;
    let mut active_periods: Vec<FxHashSet<i64>> = vec![FxHashSet::default(); grid.len()];
    for &time in observed.times() {
        let period_id = (time / period).floor() as i64;
        active_periods[slot_of_event(time, grid)].insert(period_id);
    }

    let values: Vec<f64> = active_periods
        .iter()
        .map(|ids| (ids.len() as f64 / periods).min(1.0))
        .collect();

    ConnectionProbability::new(values)
        .unwrap_or_else(|_| ConnectionProbability::zeros(grid.len()))
}
