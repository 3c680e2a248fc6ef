//! Water-filling comparison allocators.
//!
//! The budget is poured into slots in rounds; every slot below its ceiling
//! takes its share of what is left, capped by its remaining room.

use crate::models::{AllocationConstraints, FollowerProfile, ModelError};

/// Competitor rates are floored at this value before inverting.
pub const MIN_COMPETITOR_RATE: f64 = 1e-4;

/// Pouring stops once less than this much budget remains.
const REMAINING_EPSILON: f64 = 1e-6;

const MAX_ROUNDS: usize = 1_000_000;

/// How each round's remaining budget is split across slots.
#[derive(Clone, Debug, PartialEq)]
pub enum SharePolicy {
    /// Every slot is offered `remaining / n`.
    Uniform,
    /// Slot `i` is offered `remaining * w_i` with `w` normalized once to sum to 1.
    Weighted(Vec<f64>),
}

/// Per-slot weights `Σ_f (π_f,i or 1) / max(λ_f,i, MIN_COMPETITOR_RATE)`.
///
/// Slots where followers see little competing content get more weight. With
/// `online_scaled` each follower's term is multiplied by its connection
/// probability.
pub fn inverse_competitor_weights(
    followers: &[FollowerProfile],
    slots: usize,
    online_scaled: bool,
) -> Vec<f64> {
    let mut weights = vec![0.0; slots];
    for follower in followers {
        let online = follower.connection_probability().values();
        let rates = follower.wall_intensity().rates();
        for (i, (weight, &rate)) in weights.iter_mut().zip(rates).enumerate() {
            let scale = if online_scaled { online[i] } else { 1.0 };
            *weight += scale / rate.max(MIN_COMPETITOR_RATE);
        }
    }
    weights
}

/// Distribute `min(budget, capacity)` across slots without exceeding any ceiling.
///
/// With weighted shares, slots that are not yet full but carry no weight never
/// receive anything; pouring then stops early and the rest of the budget stays
/// unallocated.
pub fn water_fill(
    constraints: &AllocationConstraints,
    policy: &SharePolicy,
) -> Result<Vec<f64>, ModelError> {
    let upper = constraints.upper_bounds();
    let n = upper.len();
    let shares: Vec<f64> = match policy {
        SharePolicy::Uniform => vec![1.0 / n.max(1) as f64; n],
        SharePolicy::Weighted(weights) => {
            if weights.len() != n {
                return Err(ModelError::SlotCountMismatch {
                    expected: n,
                    actual: weights.len(),
                });
            }
            if let Some(&bad) = weights.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
                return Err(ModelError::InvalidWeight(bad));
            }
            let total: f64 = weights.iter().sum();
            if total > 0.0 {
                weights.iter().map(|w| w / total).collect()
            } else {
                vec![0.0; n]
            }
        }
    };

    let mut allocation = vec![0.0; n];
    let mut remaining = constraints.budget().min(constraints.capacity());
    for _ in 0..MAX_ROUNDS {
        if remaining <= REMAINING_EPSILON {
            break;
        }
        let offered = remaining;
        let mut poured = 0.0;
        for ((x, &u), &share) in allocation.iter_mut().zip(upper).zip(&shares) {
            let room = u - *x;
            if room > REMAINING_EPSILON {
                let amount = (offered * share).min(room);
                *x += amount;
                poured += amount;
            }
        }
        remaining -= poured;
        if poured <= f64::EPSILON * offered {
            break;
        }
    }
    Ok(allocation)
}
