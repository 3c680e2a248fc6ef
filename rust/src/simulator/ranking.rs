//! Exact time-in-top-k of one event stream racing another.

use std::iter;

use crate::models::EventSequence;

fn bucket_weight(online_weight: &[f64], bucket: i64) -> f64 {
    if bucket < 0 {
        return 0.0;
    }
    online_weight.get(bucket as usize).copied().unwrap_or(0.0)
}

/// Integrate an hourly piecewise-constant weight over `[t1, t2)`.
///
/// Bucket `i` covers `[i, i + 1)`. Buckets outside `online_weight` weigh zero.
pub fn integrate_weight(t1: f64, t2: f64, online_weight: &[f64]) -> f64 {
    if t2 <= t1 {
        return 0.0;
    }
    let first = t1.floor() as i64;
    let last = t2.floor() as i64;
    if first == last {
        return (t2 - t1) * bucket_weight(online_weight, first);
    }

    let head = (first as f64 + 1.0 - t1) * bucket_weight(online_weight, first);
    let tail = (t2 - last as f64) * bucket_weight(online_weight, last);
    let lo = (first + 1).max(0) as usize;
    let hi = (last.max(0) as usize).min(online_weight.len());
    let middle: f64 = if lo < hi {
        online_weight[lo..hi].iter().sum()
    } else {
        0.0
    };
    head + middle + tail
}

/// Weighted time during `[0, horizon)` that the newest event of `mine` ranks
/// within the `k` most recent events of the merged stream.
///
/// An arrival in `mine` resets the rank to 1; an arrival in `theirs` pushes it
/// down by one. Events at or after `horizon` are ignored. When both streams
/// have an event at the same instant, the competitor's event is processed
/// first. `initial_rank` defaults to `k + 1` (not visible at time zero).
pub fn time_in_top_k(
    mine: &EventSequence,
    theirs: &EventSequence,
    k: usize,
    horizon: f64,
    online_weight: &[f64],
    initial_rank: Option<usize>,
) -> f64 {
    let with_sentinel = |events: &EventSequence| -> Vec<f64> {
        events
            .times()
            .iter()
            .copied()
            .take_while(|&t| t < horizon)
            .chain(iter::once(horizon))
            .collect()
    };
    let mine = with_sentinel(mine);
    let theirs = with_sentinel(theirs);
    let real_events = mine.len() + theirs.len() - 2;

    let mut rank = initial_rank.unwrap_or(k + 1);
    let mut time_on_top = 0.0;
    let mut last_event = 0.0;
    let (mut i, mut j) = (0, 0);

    while i + j < real_events {
        let ours = mine[i] < theirs[j];
        let at = if ours { mine[i] } else { theirs[j] };
        if rank <= k {
            time_on_top += integrate_weight(last_event, at, online_weight);
        }
        last_event = at;
        if ours {
            i += 1;
            rank = 1;
        } else {
            j += 1;
            rank = rank.saturating_add(1);
        }
    }
    if rank <= k {
        time_on_top += integrate_weight(last_event, horizon, online_weight);
    }

    time_on_top
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_events(times: &[f64]) -> EventSequence {
        EventSequence::new(times.to_vec()).unwrap()
    }

    #[test]
    fn test_integrate_within_one_bucket() {
        let weight = [0.3, 0.7, 0.45];
        assert!((integrate_weight(1.2, 1.7, &weight) - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_integrate_across_buckets() {
        let weight = [0.3, 0.7, 0.45];
        // 0.5 * 0.3 + 0.7 + 0.25 * 0.45
        let expected = 0.15 + 0.7 + 0.1125;
        assert!((integrate_weight(0.5, 2.25, &weight) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_integrate_past_weights_is_zero() {
        let weight = [1.0, 1.0];
        assert!((integrate_weight(1.5, 5.0, &weight) - 0.5).abs() < 1e-12);
        assert_eq!(integrate_weight(3.0, 2.0, &weight), 0.0);
        assert!((integrate_weight(-1.0, 0.5, &weight) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_single_post_without_competition() {
        let weight = [0.3, 0.7, 0.45];
        let time = time_in_top_k(
            &make_events(&[1.0]),
            &EventSequence::empty(),
            1,
            3.0,
            &weight,
            None,
        );
        assert!((time - 1.15).abs() < 1e-12);
    }

    #[test]
    fn test_competitor_pushes_out_of_top_k() {
        let weight = [1.0; 10];
        let mine = make_events(&[1.0]);
        let theirs = make_events(&[2.0, 4.0]);

        let top_one = time_in_top_k(&mine, &theirs, 1, 10.0, &weight, None);
        assert!((top_one - 1.0).abs() < 1e-12);

        let top_two = time_in_top_k(&mine, &theirs, 2, 10.0, &weight, None);
        assert!((top_two - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_tie_processes_competitor_first() {
        let weight = [1.0, 1.0];
        let time = time_in_top_k(
            &make_events(&[1.0]),
            &make_events(&[1.0]),
            1,
            2.0,
            &weight,
            None,
        );
        // Competitor then broadcaster at t=1 leaves the broadcaster on top.
        assert!((time - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_initial_rank_visible_from_start() {
        let weight = [1.0; 3];
        let time = time_in_top_k(
            &EventSequence::empty(),
            &make_events(&[2.0]),
            1,
            3.0,
            &weight,
            Some(1),
        );
        assert!((time - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_events_after_horizon_ignored() {
        let weight = [1.0; 10];
        let time = time_in_top_k(
            &make_events(&[1.0, 7.0]),
            &make_events(&[6.0]),
            1,
            5.0,
            &weight,
            None,
        );
        assert!((time - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_events_at_all() {
        let weight = [1.0; 4];
        let empty = EventSequence::empty();
        assert_eq!(time_in_top_k(&empty, &empty, 1, 4.0, &weight, None), 0.0);
        let visible = time_in_top_k(&empty, &empty, 1, 4.0, &weight, Some(1));
        assert!((visible - 4.0).abs() < 1e-12);
    }
}
