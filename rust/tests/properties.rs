//! Property-based tests for the visibility model, projector and allocators.
//!
//! Uses proptest to check invariants across many random inputs.

use proptest::prelude::*;

use broadcast_rust::objective::{finite_difference, top_one_gradient};
use broadcast_rust::{
    estimate_intensity, expected_top_k, optimize, project, time_in_top_k, water_fill,
    AllocationConstraints, ConnectionProbability, EventSequence, FollowerProfile, Integration,
    IntensityFunction, ObservationWindow, ObjectiveConfig, OptimizerConfig, SharePolicy, SlotGrid,
    Termination, VisibilityObjective,
};

/// Tolerance on constraint satisfaction.
const CONSTRAINT_TOL: f64 = 1e-6;

fn make_follower(competitor: Vec<f64>, online: Vec<f64>) -> FollowerProfile {
    FollowerProfile::new(
        IntensityFunction::from_rates(competitor).unwrap(),
        ConnectionProbability::new(online).unwrap(),
        1.0,
    )
    .unwrap()
}

/// `(query, upper_bounds, budget fraction of capacity)`
fn projection_case() -> impl Strategy<Value = (Vec<f64>, Vec<f64>, f64)> {
    (1usize..8).prop_flat_map(|n| {
        (
            prop::collection::vec(-10.0..10.0f64, n),
            prop::collection::vec(0.0..5.0f64, n),
            0.0..=1.0f64,
        )
    })
}

/// `(broadcaster rates, competitor rates, online probability)` on `n` hourly slots.
fn follower_case(
    rate: std::ops::Range<f64>,
) -> impl Strategy<Value = (Vec<f64>, Vec<f64>, Vec<f64>)> {
    (1usize..8).prop_flat_map(move |n| {
        (
            prop::collection::vec(rate.clone(), n),
            prop::collection::vec(rate.clone(), n),
            prop::collection::vec(0.0..=1.0f64, n),
        )
    })
}

// ============================================================================
// Projector
// ============================================================================

proptest! {
    /// Output lies in the box and spends exactly the budget.
    #[test]
    fn projection_is_feasible((query, upper, fraction) in projection_case()) {
        let capacity: f64 = upper.iter().sum();
        let constraints = AllocationConstraints::new(fraction * capacity, upper.clone()).unwrap();
        let x = project(&query, &constraints).unwrap();

        for (&xi, &ui) in x.iter().zip(&upper) {
            prop_assert!(xi >= -CONSTRAINT_TOL && xi <= ui + CONSTRAINT_TOL, "{} not in [0, {}]", xi, ui);
        }
        let total: f64 = x.iter().sum();
        prop_assert!((total - constraints.budget()).abs() < CONSTRAINT_TOL, "sum {} != {}", total, constraints.budget());
    }

    /// No transfer of mass between two slots moves the output closer to the query.
    #[test]
    fn projection_is_nearest_point((query, upper, fraction) in projection_case()) {
        let capacity: f64 = upper.iter().sum();
        let constraints = AllocationConstraints::new(fraction * capacity, upper.clone()).unwrap();
        let x = project(&query, &constraints).unwrap();

        for i in 0..x.len() {
            for j in 0..x.len() {
                let can_grow = x[i] < upper[i] - 1e-9;
                let can_shrink = x[j] > 1e-9;
                if i != j && can_grow && can_shrink {
                    let pull_i = query[i] - x[i];
                    let pull_j = query[j] - x[j];
                    prop_assert!(pull_i <= pull_j + CONSTRAINT_TOL,
                        "moving mass from {} to {} improves: {} > {}", j, i, pull_i, pull_j);
                }
            }
        }
    }
}

// ============================================================================
// Water-filling
// ============================================================================

proptest! {
    /// Uniform shares stay within ceilings and spend min(budget, capacity).
    #[test]
    fn uniform_water_fill_spends_budget(
        upper in prop::collection::vec(0.0..5.0f64, 1..8),
        budget in 0.0..30.0f64,
    ) {
        let constraints = AllocationConstraints::new(budget, upper.clone()).unwrap();
        let x = water_fill(&constraints, &SharePolicy::Uniform).unwrap();
        for (&xi, &ui) in x.iter().zip(&upper) {
            prop_assert!(xi >= 0.0 && xi <= ui + 1e-12);
        }
        let target = budget.min(constraints.capacity());
        let total: f64 = x.iter().sum();
        prop_assert!((total - target).abs() < 1e-5, "sum {} != {}", total, target);
    }

    /// Positive weights never starve a slot, so the budget is spent.
    #[test]
    fn weighted_water_fill_spends_budget(
        (upper, weights) in (1usize..8).prop_flat_map(|n| (
            prop::collection::vec(0.0..5.0f64, n),
            prop::collection::vec(0.1..10.0f64, n),
        )),
        budget in 0.0..30.0f64,
    ) {
        let constraints = AllocationConstraints::new(budget, upper.clone()).unwrap();
        let x = water_fill(&constraints, &SharePolicy::Weighted(weights)).unwrap();
        for (&xi, &ui) in x.iter().zip(&upper) {
            prop_assert!(xi >= 0.0 && xi <= ui + 1e-12);
        }
        let target = budget.min(constraints.capacity());
        let total: f64 = x.iter().sum();
        prop_assert!((total - target).abs() < 1e-5, "sum {} != {}", total, target);
    }
}

// ============================================================================
// Objective
// ============================================================================

proptest! {
    /// A silent broadcaster is never visible, for any k.
    #[test]
    fn silent_broadcaster_has_zero_visibility(
        (_, competitor, online) in follower_case(0.0..10.0),
        k in 1usize..6,
    ) {
        let zeros = vec![0.0; competitor.len()];
        let follower = make_follower(competitor, online);
        prop_assert_eq!(expected_top_k(&zeros, &follower, k, None, Integration::ClosedForm).unwrap(), 0.0);
    }

    /// The analytic top-1 gradient agrees with central differences.
    #[test]
    fn analytic_gradient_matches_finite_differences(
        (rates, competitor, online) in follower_case(0.1..5.0),
        initial in 0.0..=1.0f64,
    ) {
        let follower = make_follower(competitor, online);
        let analytic = top_one_gradient(&rates, &follower, initial);
        let numeric = finite_difference(
            |x| expected_top_k(x, &follower, 1, Some(&[initial][..]), Integration::ClosedForm).unwrap(),
            &rates,
        );
        for (a, n) in analytic.iter().zip(&numeric) {
            prop_assert!((a - n).abs() < 1e-4, "analytic {} vs numeric {}", a, n);
        }
    }

    /// Quadrature and the exact integral agree to 1e-3 relative error.
    #[test]
    fn quadrature_matches_closed_form(
        (rates, competitor, online) in follower_case(0.1..3.0),
        k in 1usize..4,
    ) {
        let follower = make_follower(competitor, online);
        let exact = expected_top_k(&rates, &follower, k, None, Integration::ClosedForm).unwrap();
        prop_assume!(exact > 1e-6);
        for integration in [
            Integration::Trapezoid { samples: 101 },
            Integration::AdaptiveSimpson { tolerance: 1e-9 },
        ] {
            let approx = expected_top_k(&rates, &follower, k, None, integration).unwrap();
            prop_assert!((approx - exact).abs() <= 1e-3 * exact,
                "{:?}: {} vs {}", integration, approx, exact);
        }
    }

    /// Visibility never decreases as the feed gets deeper.
    #[test]
    fn visibility_grows_with_k((rates, competitor, online) in follower_case(0.0..5.0)) {
        let follower = make_follower(competitor, online);
        let mut previous = 0.0;
        for k in 1..5 {
            let value = expected_top_k(&rates, &follower, k, None, Integration::ClosedForm).unwrap();
            prop_assert!(value >= previous - 1e-12);
            previous = value;
        }
    }
}

// ============================================================================
// Simulator and estimation
// ============================================================================

proptest! {
    /// Extra broadcaster posts never reduce the time in top-k.
    #[test]
    fn time_in_top_k_is_monotonic(
        mine in prop::collection::vec(0.0..24.0f64, 0..10),
        extra in prop::collection::vec(0.0..24.0f64, 1..5),
        theirs in prop::collection::vec(0.0..24.0f64, 0..30),
        weights in prop::collection::vec(0.0..=1.0f64, 24),
        k in 1usize..4,
    ) {
        let competitor = EventSequence::new(theirs).unwrap();
        let before = EventSequence::new(mine.clone()).unwrap();
        let after = EventSequence::new(mine.into_iter().chain(extra).collect()).unwrap();

        let base = time_in_top_k(&before, &competitor, k, 24.0, &weights, None);
        let more = time_in_top_k(&after, &competitor, k, 24.0, &weights, None);
        prop_assert!(more >= base - 1e-9, "{} < {}", more, base);
        prop_assert!(more <= weights.iter().sum::<f64>() + 1e-9);
    }

    /// Over whole periods the estimate reproduces the event count.
    #[test]
    fn estimated_intensity_preserves_event_count(
        times in prop::collection::vec(0.0..72.0f64, 0..50),
    ) {
        let count = times.len();
        let events = EventSequence::new(times).unwrap();
        let window = ObservationWindow::new(0.0, 72.0).unwrap();
        let intensity = estimate_intensity(&events, &window, &SlotGrid::hourly(24));
        prop_assert!((intensity.expected_events() * 3.0 - count as f64).abs() < 1e-9);
    }
}

// ============================================================================
// Optimizer
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// When the budget fills every slot the upper bounds come back unchanged.
    #[test]
    fn saturated_budget_returns_upper_bounds(
        upper in prop::collection::vec(0.0..5.0f64, 3),
        excess in 0.0..10.0f64,
    ) {
        let budget = upper.iter().sum::<f64>() + excess;
        let constraints = AllocationConstraints::saturating(budget, upper.clone()).unwrap();
        let follower = make_follower(vec![1.0, 2.0, 3.0], vec![1.0; 3]);
        let objective = VisibilityObjective::new(
            SlotGrid::hourly(3),
            vec![follower],
            ObjectiveConfig::default(),
        )
        .unwrap();

        let result = optimize(&objective, &constraints, None, &OptimizerConfig::default()).unwrap();
        prop_assert_eq!(result.allocation, upper);
        prop_assert_eq!(result.termination, Termination::Trivial);
    }
}
