//! Euclidean projection onto the capped budget set.
//!
//! The nearest point to `q` in `{x : 0 <= x <= u, Σx = budget}` solves the
//! quadratic program `min ½‖x‖² - q·x`. Its optimality conditions give
//! `x_i = clamp(q_i - τ, 0, u_i)` for a single multiplier `τ`, and the filled
//! amount is piecewise linear and non-increasing in `τ` with breakpoints at
//! `q_i - u_i` and `q_i`, so `τ` is found exactly by scanning breakpoints.

use super::OptimizeError;
use crate::models::AllocationConstraints;

/// Absolute slack allowed between the budget and the total capacity.
pub fn feasibility_tolerance(budget: f64) -> f64 {
    1e-9 * budget.max(1.0)
}

fn fill(query: &[f64], upper: &[f64], tau: f64) -> f64 {
    query
        .iter()
        .zip(upper)
        .map(|(&q, &u)| (q - tau).clamp(0.0, u))
        .sum()
}

/// Nearest feasible allocation to `query`.
///
/// Fails with `ConstraintInfeasible` when the budget exceeds the total
/// capacity or the query is not finite.
pub fn project(
    query: &[f64],
    constraints: &AllocationConstraints,
) -> Result<Vec<f64>, OptimizeError> {
    let upper = constraints.upper_bounds();
    if query.len() != upper.len() {
        return Err(OptimizeError::DimensionMismatch {
            expected: upper.len(),
            actual: query.len(),
        });
    }
    if let Some(bad) = query.iter().find(|q| !q.is_finite()) {
        return Err(OptimizeError::ConstraintInfeasible(format!(
            "projection query contains {}",
            bad
        )));
    }

    let budget = constraints.budget();
    let capacity = constraints.capacity();
    if budget > capacity + feasibility_tolerance(budget) {
        return Err(OptimizeError::ConstraintInfeasible(format!(
            "budget {} exceeds total capacity {}",
            budget, capacity
        )));
    }
    if budget >= capacity {
        return Ok(upper.to_vec());
    }

    let mut breakpoints: Vec<f64> = query
        .iter()
        .zip(upper)
        .flat_map(|(&q, &u)| [q - u, q])
        .collect();
    breakpoints.sort_by(f64::total_cmp);
    breakpoints.dedup();

    // fill(first) is the full capacity and fill(last) is zero, so the
    // budget is crossed on some segment in between.
    let Some((&first, rest)) = breakpoints.split_first() else {
        return Ok(Vec::new());
    };
    let (mut lo_tau, mut lo_fill) = (first, capacity);
    let mut tau = breakpoints[breakpoints.len() - 1];
    for &point in rest {
        let filled = fill(query, upper, point);
        if filled <= budget {
            tau = if lo_fill > filled {
                lo_tau + (lo_fill - budget) * (point - lo_tau) / (lo_fill - filled)
            } else {
                point
            };
            break;
        }
        lo_tau = point;
        lo_fill = filled;
    }

    Ok(query
        .iter()
        .zip(upper)
        .map(|(&q, &u)| (q - tau).clamp(0.0, u))
        .collect())
}
