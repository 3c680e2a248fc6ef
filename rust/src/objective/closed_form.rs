//! Expected time in top-k for one follower.
//!
//! Inside a slot with constant rates the broadcaster's rank is a Markov
//! chain: the competitor (rate `b`) pushes it down one place, the broadcaster
//! (rate `c`) resets it to the top. `state[j]` is the probability of being at
//! rank `j + 1` or better, and has the closed form
//!
//! ```text
//! state_j(t) = β_j + e^{-st} Σ_{i<=j} (state_{j-i}(0) - β_{j-i}) (bt)^i / i!
//! ```
//!
//! with `s = b + c`, `p = c / s` and `β_j = 1 - (1 - p)^{j+1}`. Slots are
//! chained by carrying the end-of-slot state into the next slot.

use statrs::function::gamma::gamma_lr;

use super::ObjectiveError;
use crate::config::Integration;
use crate::models::FollowerProfile;

/// Combined rates below this are treated as "nothing happens".
pub const MIN_TOTAL_RATE: f64 = 1e-10;

const MAX_SIMPSON_DEPTH: u32 = 40;

/// Stationary probabilities `β_j = 1 - (1 - p)^{j+1}` for `j < k`.
fn stationary(k: usize, p: f64) -> Vec<f64> {
    let mut miss = 1.0;
    (0..k)
        .map(|_| {
            miss *= 1.0 - p;
            1.0 - miss
        })
        .collect()
}

/// Advance the rank distribution `state` by `t` hours at rates `b` (competitor)
/// and `c` (broadcaster).
pub fn propagate(state: &[f64], b: f64, c: f64, t: f64) -> Vec<f64> {
    let s = b + c;
    if s < MIN_TOTAL_RATE {
        return state.to_vec();
    }
    let beta = stationary(state.len(), c / s);
    let decay = (-s * t).exp();

    let mut poly = Vec::with_capacity(state.len());
    let mut term = 1.0;
    for i in 0..state.len() {
        if i > 0 {
            term *= t * b / i as f64;
        }
        poly.push(term);
    }

    (0..state.len())
        .map(|j| {
            let transient: f64 = (0..=j)
                .map(|i| (state[j - i] - beta[j - i]) * poly[i])
                .sum();
            transient * decay + beta[j]
        })
        .collect()
}

/// Exact `∫_0^duration state_{k-1}(t) dt`.
fn closed_form_integral(state: &[f64], b: f64, c: f64, duration: f64) -> f64 {
    let top = state.len() - 1;
    let s = b + c;
    if s < MIN_TOTAL_RATE {
        return state[top] * duration;
    }
    let beta = stationary(state.len(), c / s);

    // ∫ (bt)^i / i! e^{-st} dt = b^i / s^{i+1} P(i + 1, s·duration)
    let x = s * duration;
    let mut scale = 1.0 / s;
    let mut transient = 0.0;
    for i in 0..=top {
        if i > 0 {
            scale *= b / s;
        }
        transient += (state[top - i] - beta[top - i])
            * scale
            * gamma_lr((i + 1) as f64, x);
    }
    beta[top] * duration + transient
}

fn trapezoid(f: impl Fn(f64) -> f64, duration: f64, samples: usize) -> f64 {
    let intervals = samples.max(2) - 1;
    let step = duration / intervals as f64;
    let interior: f64 = (1..intervals).map(|i| f(i as f64 * step)).sum();
    step * (0.5 * (f(0.0) + f(duration)) + interior)
}

fn simpson(fa: f64, fm: f64, fb: f64, width: f64) -> f64 {
    width / 6.0 * (fa + 4.0 * fm + fb)
}

#[allow(clippy::too_many_arguments)]
fn adaptive_step(
    f: &impl Fn(f64) -> f64,
    a: f64,
    b: f64,
    fa: f64,
    fm: f64,
    fb: f64,
    whole: f64,
    tolerance: f64,
    depth: u32,
) -> f64 {
    let mid = 0.5 * (a + b);
    let left_mid = 0.5 * (a + mid);
    let right_mid = 0.5 * (mid + b);
    let flm = f(left_mid);
    let frm = f(right_mid);
    let left = simpson(fa, flm, fm, mid - a);
    let right = simpson(fm, frm, fb, b - mid);
    let delta = left + right - whole;

    if depth == 0 || delta.abs() <= 15.0 * tolerance {
        return left + right + delta / 15.0;
    }
    adaptive_step(f, a, mid, fa, flm, fm, left, tolerance / 2.0, depth - 1)
        + adaptive_step(f, mid, b, fm, frm, fb, right, tolerance / 2.0, depth - 1)
}

fn adaptive_simpson(f: impl Fn(f64) -> f64, duration: f64, tolerance: f64) -> f64 {
    let fa = f(0.0);
    let fm = f(0.5 * duration);
    let fb = f(duration);
    let whole = simpson(fa, fm, fb, duration);
    adaptive_step(
        &f,
        0.0,
        duration,
        fa,
        fm,
        fb,
        whole,
        tolerance,
        MAX_SIMPSON_DEPTH,
    )
}

/// `∫_0^duration` of the probability of being in the top-k, starting from `state`.
pub fn slot_integral(
    state: &[f64],
    b: f64,
    c: f64,
    duration: f64,
    integration: Integration,
) -> f64 {
    let Some(top) = state.len().checked_sub(1) else {
        return 0.0;
    };
    let at = |t: f64| propagate(state, b, c, t)[top];
    match integration {
        Integration::ClosedForm => closed_form_integral(state, b, c, duration),
        Integration::Trapezoid { samples } => trapezoid(at, duration, samples),
        Integration::AdaptiveSimpson { tolerance } => adaptive_simpson(at, duration, tolerance),
    }
}

/// Checks that `initial` holds `k` probabilities in [0, 1].
pub(crate) fn check_initial_state(initial: &[f64], k: usize) -> Result<(), ObjectiveError> {
    let valid = initial.len() == k
        && initial
            .iter()
            .all(|h| h.is_finite() && (0.0..=1.0).contains(h));
    if valid {
        Ok(())
    } else {
        Err(ObjectiveError::InvalidInitialState)
    }
}

/// Expected online-weighted time the broadcaster spends in `follower`'s top-k
/// over one cycle when posting at `rates`.
///
/// `initial` is the rank distribution at the start of the cycle and must
/// hold `k` probabilities; by default the broadcaster starts outside the
/// top-k. Slots beyond the shorter of `rates` and the follower's grid are
/// ignored. `k == 0` is never visible.
pub fn expected_top_k(
    rates: &[f64],
    follower: &FollowerProfile,
    k: usize,
    initial: Option<&[f64]>,
    integration: Integration,
) -> Result<f64, ObjectiveError> {
    if k == 0 {
        return Ok(0.0);
    }
    let start = match initial {
        Some(state) => {
            check_initial_state(state, k)?;
            state.to_vec()
        }
        None => vec![0.0; k],
    };
    Ok(visible_time(rates, follower, start, integration))
}

/// `expected_top_k` for a start state already known to be valid.
pub(crate) fn visible_time(
    rates: &[f64],
    follower: &FollowerProfile,
    start: Vec<f64>,
    integration: Integration,
) -> f64 {
    if rates.iter().all(|&c| c == 0.0) && start.iter().all(|&h| h == 0.0) {
        return 0.0;
    }

    let competitor = follower.wall_intensity();
    let online = follower.connection_probability().values();
    let (total, _) = rates
        .iter()
        .zip(competitor.slots())
        .zip(online)
        .fold(
            (0.0, start),
            |(total, state), ((&c, (b, duration)), &weight)| {
                let visible = slot_integral(&state, b, c, duration, integration);
                (total + weight * visible, propagate(&state, b, c, duration))
            },
        );
    total
}
