//! Caller-owned cache of derived estimates.
//!
//! Estimating intensities and connection probabilities for every follower is
//! the expensive part of planning, and the same follower is often shared by
//! several broadcasters. The cache maps canonical argument tuples to computed
//! values; the values themselves stay plain immutable data.

use rustc_hash::FxHashMap;

use crate::estimation::{estimate_connection_probability, estimate_intensity};
use crate::models::{
    AccountId, ConnectionProbability, EventSequence, IntensityFunction, ObservationWindow,
    SlotGrid,
};

/// Canonical key: event stream name, window bounds and slot grid (bitwise).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EstimateKey {
    source: String,
    window: (u64, u64),
    grid: Vec<u64>,
}

impl EstimateKey {
    pub fn new(source: &str, window: &ObservationWindow, grid: &SlotGrid) -> Self {
        Self {
            source: source.to_string(),
            window: (window.start().to_bits(), window.end().to_bits()),
            grid: grid.durations().iter().map(|d| d.to_bits()).collect(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Cache of estimates and follower lists, owned by whoever drives planning.
#[derive(Debug, Default)]
pub struct EstimateCache {
    intensities: FxHashMap<EstimateKey, IntensityFunction>,
    connections: FxHashMap<EstimateKey, ConnectionProbability>,
    followers: FxHashMap<AccountId, Vec<AccountId>>,
    hits: usize,
    misses: usize,
}

impl EstimateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Periodic intensity of the stream `source`, fetching events only on a miss.
    pub fn intensity<E>(
        &mut self,
        source: &str,
        window: &ObservationWindow,
        grid: &SlotGrid,
        fetch: impl FnOnce() -> Result<EventSequence, E>,
    ) -> Result<IntensityFunction, E> {
        let key = EstimateKey::new(source, window, grid);
        if let Some(cached) = self.intensities.get(&key) {
            self.hits += 1;
            return Ok(cached.clone());
        }

        self.misses += 1;
        let events = fetch()?;
        let estimate = estimate_intensity(&events, window, grid);
        self.intensities.insert(key, estimate.clone());
        Ok(estimate)
    }

    /// Connection probability of the stream `source`, fetching events only on a miss.
    pub fn connection_probability<E>(
        &mut self,
        source: &str,
        window: &ObservationWindow,
        grid: &SlotGrid,
        fetch: impl FnOnce() -> Result<EventSequence, E>,
    ) -> Result<ConnectionProbability, E> {
        let key = EstimateKey::new(source, window, grid);
        if let Some(cached) = self.connections.get(&key) {
            self.hits += 1;
            return Ok(cached.clone());
        }

        self.misses += 1;
        let events = fetch()?;
        let estimate = estimate_connection_probability(&events, window, grid);
        self.connections.insert(key, estimate.clone());
        Ok(estimate)
    }

    /// Follower list of `account`, fetching only on a miss.
    pub fn followers<E>(
        &mut self,
        account: AccountId,
        fetch: impl FnOnce() -> Result<Vec<AccountId>, E>,
    ) -> Result<Vec<AccountId>, E> {
        if let Some(cached) = self.followers.get(&account) {
            self.hits += 1;
            return Ok(cached.clone());
        }

        self.misses += 1;
        let followers = fetch()?;
        self.followers.insert(account, followers.clone());
        Ok(followers)
    }

    /// Drop every estimate derived from `source`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_source(&mut self, source: &str) -> usize {
        let before = self.intensities.len() + self.connections.len();
        self.intensities.retain(|key, _| key.source() != source);
        self.connections.retain(|key, _| key.source() != source);
        before - (self.intensities.len() + self.connections.len())
    }

    pub fn clear(&mut self) {
        self.intensities.clear();
        self.connections.clear();
        self.followers.clear();
    }

    pub fn len(&self) -> usize {
        self.intensities.len() + self.connections.len() + self.followers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}
