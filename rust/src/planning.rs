//! Learning follower profiles from an event store and planning a schedule.
//!
//! The event store is reached only through `EventSource`; everything derived
//! from it goes through a caller-owned `EstimateCache`.

use rand::Rng;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::cache::EstimateCache;
use crate::config::{EvaluationConfig, PlannerConfig};
use crate::models::{
    AccountId, AllocationConstraints, EventSequence, FollowerProfile, IntensityFunction,
    ModelError, ObservationWindow,
};
use crate::objective::{Objective, ObjectiveError, VisibilityObjective};
use crate::optimizer::{optimize, OptimizeError, OptimizeResult};
use crate::simulator::{sample_from_intensity, time_in_top_k};
use crate::{log_progress, log_steps};

/// Errors reported by an event store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Unknown account: {0}")]
    UnknownAccount(AccountId),
    #[error("Event store failure: {0}")]
    Backend(String),
}

/// Errors that can occur while planning a schedule.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Objective(#[from] ObjectiveError),
    #[error(transparent)]
    Optimize(#[from] OptimizeError),
}

/// Read access to historical posting activity.
///
/// Times are hours since the epoch; ranges are half-open.
pub trait EventSource {
    /// Posts made by `account` in `[start, end)`.
    fn events_in_range(
        &self,
        account: AccountId,
        start: f64,
        end: f64,
    ) -> Result<EventSequence, SourceError>;

    /// Accounts following `account`.
    fn followers(&self, account: AccountId) -> Result<Vec<AccountId>, SourceError>;

    /// Posts shown on `follower`'s feed in `[start, end)`, leaving out those
    /// made by `excluded`.
    fn wall_events_excluding(
        &self,
        follower: AccountId,
        excluded: AccountId,
        start: f64,
        end: f64,
    ) -> Result<EventSequence, SourceError>;
}

/// Event store held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventSource {
    posts: FxHashMap<AccountId, EventSequence>,
    followers: FxHashMap<AccountId, Vec<AccountId>>,
    followees: FxHashMap<AccountId, Vec<AccountId>>,
}

impl InMemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `account` with its posts, replacing any previous posts.
    pub fn add_account(&mut self, account: AccountId, posts: EventSequence) {
        self.posts.insert(account, posts);
    }

    /// Record that `follower` follows `followee`.
    pub fn add_follow(&mut self, follower: AccountId, followee: AccountId) {
        self.posts.entry(follower).or_default();
        self.posts.entry(followee).or_default();
        let followers = self.followers.entry(followee).or_default();
        if !followers.contains(&follower) {
            followers.push(follower);
        }
        let followees = self.followees.entry(follower).or_default();
        if !followees.contains(&followee) {
            followees.push(followee);
        }
    }

    fn posts_of(&self, account: AccountId) -> Result<&EventSequence, SourceError> {
        self.posts
            .get(&account)
            .ok_or(SourceError::UnknownAccount(account))
    }
}

impl EventSource for InMemoryEventSource {
    fn events_in_range(
        &self,
        account: AccountId,
        start: f64,
        end: f64,
    ) -> Result<EventSequence, SourceError> {
        Ok(self.posts_of(account)?.window(start, end))
    }

    fn followers(&self, account: AccountId) -> Result<Vec<AccountId>, SourceError> {
        self.posts_of(account)?;
        let mut followers = self.followers.get(&account).cloned().unwrap_or_default();
        followers.sort_unstable();
        Ok(followers)
    }

    fn wall_events_excluding(
        &self,
        follower: AccountId,
        excluded: AccountId,
        start: f64,
        end: f64,
    ) -> Result<EventSequence, SourceError> {
        self.posts_of(follower)?;
        let mut wall = EventSequence::empty();
        for &followee in self.followees.get(&follower).into_iter().flatten() {
            if followee == excluded {
                continue;
            }
            wall = wall.merged(&self.posts_of(followee)?.window(start, end));
        }
        Ok(wall)
    }
}

fn posts_key(account: AccountId) -> String {
    format!("posts:{}", account)
}

fn wall_key(follower: AccountId, excluded: AccountId) -> String {
    format!("wall:{}:without:{}", follower, excluded)
}

/// Build one profile per follower of `broadcaster`.
///
/// Each follower weighs `1 / followers`; followers whose total connection
/// probability is below `min_connection_mass` are left out.
pub fn learn_profiles<S: EventSource + ?Sized>(
    source: &S,
    cache: &mut EstimateCache,
    broadcaster: AccountId,
    window: &ObservationWindow,
    config: &PlannerConfig,
) -> Result<Vec<FollowerProfile>, PlanError> {
    let grid = &config.grid;
    let followers = cache.followers(broadcaster, || source.followers(broadcaster))?;
    if followers.is_empty() {
        log_progress!(config.verbosity, "Account {} has no followers", broadcaster);
        return Ok(Vec::new());
    }
    let weight = 1.0 / followers.len() as f64;

    let mut profiles = Vec::with_capacity(followers.len());
    for (i, &follower) in followers.iter().enumerate() {
        log_steps!(
            config.verbosity,
            "  [{}/{}] learning follower {}",
            i + 1,
            followers.len(),
            follower
        );
        let connection =
            cache.connection_probability(&posts_key(follower), window, grid, || {
                source.events_in_range(follower, window.start(), window.end())
            })?;
        if connection.mass() < config.min_connection_mass {
            log_steps!(
                config.verbosity,
                "  follower {} dropped, connection mass {:.3}",
                follower,
                connection.mass()
            );
            continue;
        }
        let wall = cache.intensity(&wall_key(follower, broadcaster), window, grid, || {
            source.wall_events_excluding(follower, broadcaster, window.start(), window.end())
        })?;
        profiles.push(FollowerProfile::new(wall, connection, weight)?);
    }

    log_progress!(
        config.verbosity,
        "Learned {} of {} follower profiles",
        profiles.len(),
        followers.len()
    );
    Ok(profiles)
}

/// Per-slot ceilings `Σ_f w_f · r_f · λ_f` where `r_f` is the largest ratio
/// of the broadcaster's rate to the follower's wall rate over slots with wall
/// activity.
pub fn derive_upper_bounds(
    broadcaster: &IntensityFunction,
    profiles: &[FollowerProfile],
) -> Vec<f64> {
    let ours = broadcaster.rates();
    let mut bounds = vec![0.0; ours.len()];
    for profile in profiles {
        let wall = profile.wall_intensity().rates();
        let ratio = ours
            .iter()
            .zip(wall)
            .filter(|&(_, &theirs)| theirs != 0.0)
            .map(|(&mine, &theirs)| mine / theirs)
            .fold(0.0, f64::max);
        for (bound, &theirs) in bounds.iter_mut().zip(wall) {
            *bound += profile.weight() * ratio * theirs;
        }
    }
    bounds
}

/// What to plan for.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleRequest {
    pub broadcaster: AccountId,
    pub window: ObservationWindow,
    /// Total rate to spend; defaults to the broadcaster's learned total rate
    pub budget: Option<f64>,
    /// Per-slot ceilings; derived from follower activity when absent
    pub upper_bounds: Option<Vec<f64>>,
}

impl ScheduleRequest {
    pub fn new(broadcaster: AccountId, window: ObservationWindow) -> Self {
        Self {
            broadcaster,
            window,
            budget: None,
            upper_bounds: None,
        }
    }
}

/// Outcome of `plan_schedule`.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleReport {
    /// The broadcaster's current posting pattern
    pub learned: IntensityFunction,
    /// The recommended posting pattern
    pub optimized: IntensityFunction,
    pub constraints: AllocationConstraints,
    /// Followers that took part in the objective
    pub followers: usize,
    /// Objective value of `learned`
    pub learned_objective: f64,
    pub result: OptimizeResult,
}

impl ScheduleReport {
    /// Relative improvement of the optimized schedule over the learned one.
    pub fn improvement(&self) -> Option<f64> {
        if self.learned_objective > 0.0 {
            Some(self.result.objective / self.learned_objective - 1.0)
        } else {
            None
        }
    }
}

/// Learn the broadcaster and its followers over `request.window`, then
/// optimize the broadcaster's rates, warm-started from its learned rates.
///
/// A defaulted budget is lowered to the total capacity when it exceeds it;
/// an explicit budget above capacity is an error.
pub fn plan_schedule<S: EventSource + ?Sized>(
    source: &S,
    cache: &mut EstimateCache,
    request: &ScheduleRequest,
    config: &PlannerConfig,
) -> Result<ScheduleReport, PlanError> {
    let broadcaster = request.broadcaster;
    let window = &request.window;
    let learned = cache.intensity(&posts_key(broadcaster), window, &config.grid, || {
        source.events_in_range(broadcaster, window.start(), window.end())
    })?;
    let profiles = learn_profiles(source, cache, broadcaster, window, config)?;

    let upper_bounds = match &request.upper_bounds {
        Some(bounds) => bounds.clone(),
        None => derive_upper_bounds(&learned, &profiles),
    };
    let constraints = match request.budget {
        Some(budget) => AllocationConstraints::new(budget, upper_bounds)?,
        None => AllocationConstraints::saturating(learned.total_rate(), upper_bounds)?,
    };
    log_progress!(
        config.verbosity,
        "Planning account {}: budget {:.4}, capacity {:.4}",
        broadcaster,
        constraints.budget(),
        constraints.capacity()
    );

    let followers = profiles.len();
    let objective =
        VisibilityObjective::new(config.grid.clone(), profiles, config.objective.clone())?;
    let learned_objective = objective.value(learned.rates());
    let result = optimize(
        &objective,
        &constraints,
        Some(learned.rates()),
        &config.optimizer,
    )?;
    let optimized = learned.with_rates(result.allocation.iter().map(|r| r.max(0.0)).collect())?;

    log_progress!(
        config.verbosity,
        "Objective {:.6} -> {:.6} ({})",
        learned_objective,
        result.objective,
        result.termination.as_str()
    );
    Ok(ScheduleReport {
        learned,
        optimized,
        constraints,
        followers,
        learned_objective,
        result,
    })
}

/// Visibility scores of the current and a proposed schedule.
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluationReport {
    /// Score of the current schedule
    pub before: f64,
    /// Score of the proposed schedule, averaged over sampled realizations
    pub after: f64,
    /// Followers that took part in the score
    pub followers: usize,
}

impl EvaluationReport {
    /// `after / before`, when the current schedule was visible at all.
    pub fn ratio(&self) -> Option<f64> {
        if self.before > 0.0 {
            Some(self.after / self.before)
        } else {
            None
        }
    }
}

/// Mean of the `count` smallest values.
fn least_visible_mean(mut values: Vec<f64>, count: usize) -> f64 {
    values.sort_by(f64::total_cmp);
    let taken = count.min(values.len());
    if taken == 0 {
        return 0.0;
    }
    values[..taken].iter().sum::<f64>() / taken as f64
}

/// 1 for every hour in `[0, hours)` holding at least one of `events`.
fn active_hours(events: &EventSequence, hours: usize) -> Vec<f64> {
    let mut active = vec![0.0; hours];
    for &time in events.times() {
        if let Some(slot) = active.get_mut(time.floor() as usize) {
            *slot = 1.0;
        }
    }
    active
}

/// Connection probability of `profile` spread over one-hour buckets.
fn hourly_weights(profile: &FollowerProfile) -> Vec<f64> {
    let grid = profile.wall_intensity().grid();
    let values = profile.connection_probability().values();
    let hours = grid.period().ceil() as usize;
    (0..hours)
        .map(|hour| values[grid.slot_of(hour as f64 + 0.5)])
        .collect()
}

/// One realization of `intensity` repeated cycle after cycle over `[0, horizon)`.
fn sample_repeated<R: Rng + ?Sized>(
    rng: &mut R,
    intensity: &IntensityFunction,
    horizon: f64,
) -> EventSequence {
    let period = intensity.period();
    let mut times = Vec::new();
    let mut cycle_start = 0.0;
    while period > 0.0 && cycle_start < horizon {
        let cycle = sample_from_intensity(&mut *rng, intensity, cycle_start);
        times.extend(cycle.times().iter().copied().take_while(|&t| t < horizon));
        cycle_start += period;
    }
    EventSequence::from_sorted(times)
}

/// Score the broadcaster's real posts in `window` and realizations of
/// `proposed` against what its followers actually saw there.
///
/// Each follower's feed is its real wall in the window minus the
/// broadcaster's posts, and the follower counts as online during the hours
/// in which it posted itself. Followers that never posted in the window are
/// left out. A score is the mean visible time of the `least_visible`
/// followers. `proposed` is repeated from the start of the window, which
/// should fall on a cycle boundary.
pub fn evaluate_schedule<S: EventSource + ?Sized, R: Rng + ?Sized>(
    source: &S,
    broadcaster: AccountId,
    window: &ObservationWindow,
    proposed: &IntensityFunction,
    config: &EvaluationConfig,
    rng: &mut R,
) -> Result<EvaluationReport, PlanError> {
    let (origin, end) = (window.start(), window.end());
    let horizon = window.duration();
    let hours = horizon.ceil() as usize;
    let real = source
        .events_in_range(broadcaster, origin, end)?
        .relative_to(origin);

    let mut feeds = Vec::new();
    for follower in source.followers(broadcaster)? {
        let own = source.events_in_range(follower, origin, end)?.relative_to(origin);
        let online = active_hours(&own, hours);
        if online.iter().all(|&w| w == 0.0) {
            log_steps!(config.verbosity, "  follower {} inactive, skipped", follower);
            continue;
        }
        let wall = source
            .wall_events_excluding(follower, broadcaster, origin, end)?
            .relative_to(origin);
        feeds.push((wall, online));
    }

    let score = |mine: &EventSequence| {
        let visible = feeds
            .iter()
            .map(|(wall, online)| time_in_top_k(mine, wall, config.k, horizon, online, None))
            .collect();
        least_visible_mean(visible, config.least_visible)
    };
    let before = score(&real);
    let after = if config.trials == 0 {
        0.0
    } else {
        (0..config.trials)
            .map(|_| score(&sample_repeated(&mut *rng, proposed, horizon)))
            .sum::<f64>()
            / config.trials as f64
    };

    log_progress!(
        config.verbosity,
        "Account {} on {} followers: {:.4} -> {:.4}",
        broadcaster,
        feeds.len(),
        before,
        after
    );
    Ok(EvaluationReport {
        before,
        after,
        followers: feeds.len(),
    })
}

/// Score `current` and `proposed` over one cycle against walls sampled from
/// the learned `profiles`.
///
/// Every trial draws one realization of each schedule and one wall per
/// follower, shared by both schedules, and scores them as
/// `evaluate_schedule` does with the profile's connection probability as
/// the online weight. Both scores are averaged over the trials.
pub fn compare_by_simulation<R: Rng + ?Sized>(
    current: &IntensityFunction,
    proposed: &IntensityFunction,
    profiles: &[FollowerProfile],
    config: &EvaluationConfig,
    rng: &mut R,
) -> EvaluationReport {
    let horizon = current.period();
    let weights: Vec<Vec<f64>> = profiles.iter().map(hourly_weights).collect();

    let (mut before, mut after) = (0.0, 0.0);
    for _ in 0..config.trials {
        let current_run = sample_from_intensity(&mut *rng, current, 0.0);
        let proposed_run = sample_from_intensity(&mut *rng, proposed, 0.0);
        let mut visible_before = Vec::with_capacity(profiles.len());
        let mut visible_after = Vec::with_capacity(profiles.len());
        for (profile, online) in profiles.iter().zip(&weights) {
            let wall = sample_from_intensity(&mut *rng, profile.wall_intensity(), 0.0);
            visible_before.push(time_in_top_k(&current_run, &wall, config.k, horizon, online, None));
            visible_after.push(time_in_top_k(&proposed_run, &wall, config.k, horizon, online, None));
        }
        before += least_visible_mean(visible_before, config.least_visible);
        after += least_visible_mean(visible_after, config.least_visible);
    }
    if config.trials > 0 {
        before /= config.trials as f64;
        after /= config.trials as f64;
    }

    log_progress!(
        config.verbosity,
        "Simulated {} trials on {} followers: {:.4} -> {:.4}",
        config.trials,
        profiles.len(),
        before,
        after
    );
    EvaluationReport {
        before,
        after,
        followers: profiles.len(),
    }
}
