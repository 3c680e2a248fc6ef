//! Core data types for the visibility model.
//!
//! Times are expressed in hours. Absolute timestamps are hours since the unix
//! epoch; slot grids describe one repeating cycle (a day or a week).

use chrono::NaiveDateTime;
use std::ops::Range;
use thiserror::Error;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Identifier of an account in the external event store.
pub type AccountId = u64;

/// Errors raised when constructing model values from invalid input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Rate must be finite and non-negative, got {0}")]
    InvalidRate(f64),
    #[error("Slot duration must be finite and positive, got {0}")]
    InvalidDuration(f64),
    #[error("Probability must lie in [0, 1], got {0}")]
    InvalidProbability(f64),
    #[error("Follower weight must be finite and non-negative, got {0}")]
    InvalidWeight(f64),
    #[error("Budget must be finite and non-negative, got {0}")]
    InvalidBudget(f64),
    #[error("Timestamp is not a number")]
    NanTimestamp,
    #[error("Slot count mismatch: expected {expected}, got {actual}")]
    SlotCountMismatch { expected: usize, actual: usize },
    #[error("Slot grid is empty")]
    EmptyGrid,
    #[error("Invalid observation window [{start}, {end})")]
    InvalidWindow { start: f64, end: f64 },
}

fn check_rate(rate: f64) -> Result<f64, ModelError> {
    if rate.is_finite() && rate >= 0.0 {
        Ok(rate)
    } else {
        Err(ModelError::InvalidRate(rate))
    }
}

/// Convert a calendar timestamp to hours since the unix epoch (UTC).
pub fn hours_since_epoch(at: NaiveDateTime) -> f64 {
    at.and_utc().timestamp_millis() as f64 / MILLIS_PER_HOUR
}

/// Slot durations covering one cycle of length `period()`.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotGrid {
    durations: Vec<f64>,
}

impl SlotGrid {
    pub fn new(durations: Vec<f64>) -> Result<Self, ModelError> {
        if durations.is_empty() {
            return Err(ModelError::EmptyGrid);
        }
        if let Some(&bad) = durations.iter().find(|d| !(d.is_finite() && **d > 0.0)) {
            return Err(ModelError::InvalidDuration(bad));
        }
        Ok(Self { durations })
    }

    /// One-hour slots filling a period of `period_hours` hours (at least one slot).
    pub fn hourly(period_hours: usize) -> Self {
        Self {
            durations: vec![1.0; period_hours.max(1)],
        }
    }

    pub fn durations(&self) -> &[f64] {
        &self.durations
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    pub fn period(&self) -> f64 {
        self.durations.iter().sum()
    }

    /// Index of the slot containing `time_of_cycle`.
    ///
    /// Times at or past the end of the cycle fall into the last slot.
    pub fn slot_of(&self, time_of_cycle: f64) -> usize {
        let mut slot_end = 0.0;
        for (i, &duration) in self.durations.iter().enumerate() {
            slot_end += duration;
            if time_of_cycle < slot_end {
                return i;
            }
        }
        self.durations.len() - 1
    }
}

/// Piecewise-constant posting rate over one cycle.
///
/// Rates are events per hour; each rate holds for the matching slot duration.
#[derive(Clone, Debug, PartialEq)]
pub struct IntensityFunction {
    rates: Vec<f64>,
    grid: SlotGrid,
}

impl IntensityFunction {
    /// Build from `(rate, duration)` pairs.
    pub fn new(slots: Vec<(f64, f64)>) -> Result<Self, ModelError> {
        let (rates, durations): (Vec<f64>, Vec<f64>) = slots.into_iter().unzip();
        Self::on_grid(rates, SlotGrid::new(durations)?)
    }

    pub fn on_grid(rates: Vec<f64>, grid: SlotGrid) -> Result<Self, ModelError> {
        if rates.len() != grid.len() {
            return Err(ModelError::SlotCountMismatch {
                expected: grid.len(),
                actual: rates.len(),
            });
        }
        for &rate in &rates {
            check_rate(rate)?;
        }
        Ok(Self { rates, grid })
    }

    /// Rates over one-hour slots.
    pub fn from_rates(rates: Vec<f64>) -> Result<Self, ModelError> {
        if rates.is_empty() {
            return Err(ModelError::EmptyGrid);
        }
        let grid = SlotGrid::hourly(rates.len());
        Self::on_grid(rates, grid)
    }

    pub fn zeros(grid: &SlotGrid) -> Self {
        Self {
            rates: vec![0.0; grid.len()],
            grid: grid.clone(),
        }
    }

    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    pub fn durations(&self) -> &[f64] {
        self.grid.durations()
    }

    pub fn grid(&self) -> &SlotGrid {
        &self.grid
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn period(&self) -> f64 {
        self.grid.period()
    }

    pub fn total_rate(&self) -> f64 {
        self.rates.iter().sum()
    }

    /// Expected number of events in one cycle.
    pub fn expected_events(&self) -> f64 {
        self.slots().map(|(rate, duration)| rate * duration).sum()
    }

    pub fn is_zero(&self) -> bool {
        self.rates.iter().all(|&r| r == 0.0)
    }

    /// Iterate `(rate, duration)` pairs in cycle order.
    pub fn slots(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.rates.iter().copied().zip(self.durations().iter().copied())
    }

    /// Rate in effect at `time_of_cycle`.
    pub fn rate_at(&self, time_of_cycle: f64) -> f64 {
        self.rates[self.grid.slot_of(time_of_cycle)]
    }

    /// Same grid, new rates.
    pub fn with_rates(&self, rates: Vec<f64>) -> Result<Self, ModelError> {
        Self::on_grid(rates, self.grid.clone())
    }

    /// Contiguous sub-range of slots selected by cumulative duration.
    ///
    /// Slots are skipped until the cumulative time reaches `start`, then taken
    /// while the cumulative time is below `end`.
    pub fn slice(&self, start: f64, end: f64) -> Result<Self, ModelError> {
        let durations = self.durations();
        let mut elapsed = 0.0;
        let mut first = 0;
        while first < durations.len() && elapsed < start {
            elapsed += durations[first];
            first += 1;
        }
        let mut last = first;
        while last < durations.len() && elapsed < end {
            elapsed += durations[last];
            last += 1;
        }
        Self::on_grid(
            self.rates[first..last].to_vec(),
            SlotGrid::new(durations[first..last].to_vec())?,
        )
    }
}

/// Non-decreasing event timestamps in hours since the epoch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventSequence {
    times: Vec<f64>,
}

impl EventSequence {
    /// Build from unordered timestamps; the result is sorted.
    pub fn new(mut times: Vec<f64>) -> Result<Self, ModelError> {
        if times.iter().any(|t| t.is_nan()) {
            return Err(ModelError::NanTimestamp);
        }
        times.sort_by(f64::total_cmp);
        Ok(Self { times })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap timestamps the caller already produced in order.
    pub(crate) fn from_sorted(times: Vec<f64>) -> Self {
        debug_assert!(times.windows(2).all(|w| w[0] <= w[1]));
        Self { times }
    }

    pub fn from_unix_seconds(seconds: &[i64]) -> Self {
        let mut times: Vec<f64> = seconds.iter().map(|&s| s as f64 / 3600.0).collect();
        times.sort_by(f64::total_cmp);
        Self { times }
    }

    pub fn from_datetimes(stamps: &[NaiveDateTime]) -> Self {
        let mut times: Vec<f64> = stamps.iter().map(|&at| hours_since_epoch(at)).collect();
        times.sort_by(f64::total_cmp);
        Self { times }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Events in `[start, end)`.
    pub fn window(&self, start: f64, end: f64) -> Self {
        let lo = self.times.partition_point(|&t| t < start);
        let hi = self.times.partition_point(|&t| t < end).max(lo);
        Self {
            times: self.times[lo..hi].to_vec(),
        }
    }

    /// Shift every timestamp so that `origin` becomes time zero.
    pub fn relative_to(&self, origin: f64) -> Self {
        Self {
            times: self.times.iter().map(|t| t - origin).collect(),
        }
    }

    /// Union of two sequences, still sorted.
    pub fn merged(&self, other: &EventSequence) -> Self {
        let mut times = Vec::with_capacity(self.len() + other.len());
        let (mut i, mut j) = (0, 0);
        while i < self.times.len() && j < other.times.len() {
            if self.times[i] <= other.times[j] {
                times.push(self.times[i]);
                i += 1;
            } else {
                times.push(other.times[j]);
                j += 1;
            }
        }
        times.extend_from_slice(&self.times[i..]);
        times.extend_from_slice(&other.times[j..]);
        Self { times }
    }
}

/// Half-open observation window `[start, end)` in hours since the epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObservationWindow {
    start: f64,
    end: f64,
}

impl ObservationWindow {
    pub fn new(start: f64, end: f64) -> Result<Self, ModelError> {
        if !(start.is_finite() && end.is_finite() && start < end) {
            return Err(ModelError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn from_dates(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, ModelError> {
        Self::new(hours_since_epoch(start), hours_since_epoch(end))
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Whole periods of length `period` inside the window, at least one.
    pub fn observed_periods(&self, period: f64) -> usize {
        ((self.duration() / period).floor() as usize).max(1)
    }
}

/// Per-slot probability that a follower is looking at the feed.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionProbability {
    values: Vec<f64>,
}

impl ConnectionProbability {
    pub fn new(values: Vec<f64>) -> Result<Self, ModelError> {
        if let Some(&bad) = values
            .iter()
            .find(|v| !(v.is_finite() && (0.0..=1.0).contains(*v)))
        {
            return Err(ModelError::InvalidProbability(bad));
        }
        Ok(Self { values })
    }

    /// Always online.
    pub fn ones(len: usize) -> Self {
        Self {
            values: vec![1.0; len],
        }
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sum over all slots.
    pub fn mass(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.values.len());
        let start = range.start.min(end);
        Self {
            values: self.values[start..end].to_vec(),
        }
    }
}

/// One follower's competing feed and attention pattern.
#[derive(Clone, Debug, PartialEq)]
pub struct FollowerProfile {
    wall_intensity: IntensityFunction,
    connection_probability: ConnectionProbability,
    weight: f64,
}

impl FollowerProfile {
    pub fn new(
        wall_intensity: IntensityFunction,
        connection_probability: ConnectionProbability,
        weight: f64,
    ) -> Result<Self, ModelError> {
        if connection_probability.len() != wall_intensity.len() {
            return Err(ModelError::SlotCountMismatch {
                expected: wall_intensity.len(),
                actual: connection_probability.len(),
            });
        }
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(ModelError::InvalidWeight(weight));
        }
        Ok(Self {
            wall_intensity,
            connection_probability,
            weight,
        })
    }

    pub fn wall_intensity(&self) -> &IntensityFunction {
        &self.wall_intensity
    }

    pub fn connection_probability(&self) -> &ConnectionProbability {
        &self.connection_probability
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn with_weight(&self, weight: f64) -> Result<Self, ModelError> {
        Self::new(
            self.wall_intensity.clone(),
            self.connection_probability.clone(),
            weight,
        )
    }
}

/// Total posting budget and per-slot rate ceilings.
#[derive(Clone, Debug, PartialEq)]
pub struct AllocationConstraints {
    budget: f64,
    upper_bounds: Vec<f64>,
}

impl AllocationConstraints {
    pub fn new(budget: f64, upper_bounds: Vec<f64>) -> Result<Self, ModelError> {
        if !(budget.is_finite() && budget >= 0.0) {
            return Err(ModelError::InvalidBudget(budget));
        }
        for &bound in &upper_bounds {
            check_rate(bound)?;
        }
        Ok(Self {
            budget,
            upper_bounds,
        })
    }

    /// Like `new`, but a budget above the total capacity is lowered to it.
    pub fn saturating(budget: f64, upper_bounds: Vec<f64>) -> Result<Self, ModelError> {
        let constraints = Self::new(budget, upper_bounds)?;
        let capacity = constraints.capacity();
        Ok(Self {
            budget: constraints.budget.min(capacity),
            ..constraints
        })
    }

    pub fn budget(&self) -> f64 {
        self.budget
    }

    pub fn upper_bounds(&self) -> &[f64] {
        &self.upper_bounds
    }

    pub fn len(&self) -> usize {
        self.upper_bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upper_bounds.is_empty()
    }

    /// Sum of the per-slot ceilings.
    pub fn capacity(&self) -> f64 {
        self.upper_bounds.iter().sum()
    }
}
