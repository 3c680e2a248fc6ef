//! Gradients of the expected visibility with respect to the broadcaster's rates.

use super::closed_form::MIN_TOTAL_RATE;
use crate::models::FollowerProfile;

/// Finite-difference step; components below it use a forward difference.
pub const FINITE_DIFFERENCE_STEP: f64 = 1e-4;

/// Below this `s·Δ` the derivative of `(1 - e^{-sΔ}) / s` uses its series.
const SERIES_CUTOFF: f64 = 1e-3;

/// Central-difference gradient of `f` at `x`.
///
/// Components smaller than the step use a one-sided forward difference so
/// that no rate is ever evaluated below zero.
pub fn finite_difference(f: impl Fn(&[f64]) -> f64, x: &[f64]) -> Vec<f64> {
    let step = FINITE_DIFFERENCE_STEP;
    let base = if x.iter().any(|&v| v < step) {
        f(x)
    } else {
        0.0
    };

    let mut point = x.to_vec();
    let mut gradient = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        let original = point[i];
        let slope = if original >= step {
            point[i] = original - step;
            let below = f(&point);
            point[i] = original + step;
            let above = f(&point);
            (above - below) / (2.0 * step)
        } else {
            point[i] = original + step;
            (f(&point) - base) / step
        };
        point[i] = original;
        gradient.push(slope);
    }
    gradient
}

/// Per-slot quantities of the top-1 forward pass.
#[derive(Debug, Clone, Copy)]
struct SlotTerms {
    /// Rank-1 probability at the end of the slot
    next: f64,
    /// ∂next/∂h
    carry: f64,
    /// ∂value/∂h
    value_per_state: f64,
    /// ∂value/∂c holding h fixed
    value_per_rate: f64,
    /// ∂next/∂c holding h fixed
    next_per_rate: f64,
}

fn slot_terms(h: f64, b: f64, c: f64, duration: f64, weight: f64) -> SlotTerms {
    let s = b + c;
    if s < MIN_TOTAL_RATE {
        // Limits as c -> 0 with no competitor activity.
        return SlotTerms {
            next: h,
            carry: 1.0,
            value_per_state: weight * duration,
            value_per_rate: weight * (1.0 - h) * duration * duration / 2.0,
            next_per_rate: (1.0 - h) * duration,
        };
    }

    let x = s * duration;
    let p = c / s;
    let q = (-x).exp();
    let one_minus_q = -(-x).exp_m1();
    let spread = one_minus_q / s;
    let spread_per_rate = if x < SERIES_CUTOFF {
        duration * duration * (-0.5 + x / 3.0 - x * x / 8.0)
    } else {
        duration * q / s - one_minus_q / (s * s)
    };
    let p_per_rate = b / (s * s);

    SlotTerms {
        next: p + (h - p) * q,
        carry: q,
        value_per_state: weight * spread,
        value_per_rate: weight * (p_per_rate * (duration - spread) + (h - p) * spread_per_rate),
        next_per_rate: p_per_rate * one_minus_q - (h - p) * duration * q,
    }
}

/// Exact gradient of the top-1 expectation for one follower.
///
/// A forward pass records how each slot's contribution and end state depend
/// on its own rate; a backward pass accumulates how the end state of slot `n`
/// feeds every later slot. `initial` is the rank-1 probability at the start
/// of the cycle.
pub fn top_one_gradient(rates: &[f64], follower: &FollowerProfile, initial: f64) -> Vec<f64> {
    let online = follower.connection_probability().values();
    let mut h = initial;
    let terms: Vec<SlotTerms> = rates
        .iter()
        .zip(follower.wall_intensity().slots())
        .zip(online)
        .map(|((&c, (b, duration)), &weight)| {
            let terms = slot_terms(h, b, c, duration, weight);
            h = terms.next;
            terms
        })
        .collect();

    let mut gradient = vec![0.0; rates.len()];
    let mut adjoint = 0.0;
    for (n, slot) in terms.iter().enumerate().rev() {
        gradient[n] = slot.value_per_rate + adjoint * slot.next_per_rate;
        adjoint = slot.value_per_state + slot.carry * adjoint;
    }
    gradient
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Integration;
    use crate::models::{ConnectionProbability, IntensityFunction};
    use crate::objective::closed_form::expected_top_k;

    fn make_follower(competitor: &[f64], online: &[f64]) -> FollowerProfile {
        FollowerProfile::new(
            IntensityFunction::from_rates(competitor.to_vec()).unwrap(),
            ConnectionProbability::new(online.to_vec()).unwrap(),
            1.0,
        )
        .unwrap()
    }

    fn numeric(rates: &[f64], follower: &FollowerProfile, initial: f64) -> Vec<f64> {
        finite_difference(
            |x| expected_top_k(x, follower, 1, Some(&[initial][..]), Integration::ClosedForm).unwrap(),
            rates,
        )
    }

    #[test]
    fn test_finite_difference_quadratic() {
        let gradient = finite_difference(|x| x.iter().map(|v| v * v).sum(), &[1.0, 0.5, 0.0]);
        assert!((gradient[0] - 2.0).abs() < 1e-8);
        assert!((gradient[1] - 1.0).abs() < 1e-8);
        // Forward difference at zero: ((1e-4)^2 - 0) / 1e-4
        assert!((gradient[2] - 1e-4).abs() < 1e-9);
    }

    #[test]
    fn test_analytic_matches_numeric() {
        let follower = make_follower(&[3.0, 0.5, 2.0, 6.0, 1.0], &[1.0, 0.4, 0.9, 0.2, 0.7]);
        let rates = [2.0, 0.3, 1.5, 4.0, 0.8];
        for initial in [0.0, 0.35, 1.0] {
            let analytic = top_one_gradient(&rates, &follower, initial);
            let reference = numeric(&rates, &follower, initial);
            for (a, r) in analytic.iter().zip(&reference) {
                assert!((a - r).abs() < 1e-4, "{} vs {}", a, r);
            }
        }
    }

    #[test]
    fn test_gradient_in_silent_slot() {
        let follower = make_follower(&[0.0], &[1.0]);
        let analytic = top_one_gradient(&[0.0], &follower, 0.0);
        assert!((analytic[0] - 0.5).abs() < 1e-12);
        let reference = numeric(&[0.0], &follower, 0.0);
        assert!((analytic[0] - reference[0]).abs() < 1e-4);
    }

    #[test]
    fn test_gradient_small_combined_rate() {
        let follower = make_follower(&[1e-6, 2.0], &[1.0, 1.0]);
        let rates = [1e-6, 1.0];
        let analytic = top_one_gradient(&rates, &follower, 0.2);
        let reference = numeric(&rates, &follower, 0.2);
        assert!((analytic[1] - reference[1]).abs() < 1e-4);
        assert!(analytic[0].is_finite());
    }

    #[test]
    fn test_posting_more_helps_when_offline_later() {
        let follower = make_follower(&[1.0, 1.0], &[1.0, 0.0]);
        let gradient = top_one_gradient(&[0.5, 0.5], &follower, 0.0);
        assert!(gradient[0] > 0.0);
        assert!(gradient[1].abs() < 1e-12);
    }
}
