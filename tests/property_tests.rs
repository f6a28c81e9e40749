//! Property-based tests for the adaptive timing and scheduling core.

use mid_task::models::{Condition, HistoryScope, Valence};
use mid_task::rscore::{adjust, HistoryStore, OutcomeWindow};
use mid_task::scheduler::build_sequence;
use mid_task::staircase::Staircase;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn staircase_strategy() -> impl Strategy<Value = (u32, u32, u32, u32)> {
    (50u32..300, 1u32..300, 1u32..50).prop_flat_map(|(min, span, step)| {
        let max = min + span;
        (Just(min), Just(max), min..=max, Just(step))
    })
}

fn conditions(n: usize) -> Vec<Condition> {
    (0..n)
        .map(|i| Condition {
            label: format!("C{}", i),
            valence: Valence::Positive,
            magnitude: 1.0,
            points_on_hit: 10,
            points_on_miss: 0,
        })
        .collect()
}

proptest! {
    // Staircase never leaves [min, max]
    #[test]
    fn staircase_stays_in_bounds(
        (min, max, initial, step) in staircase_strategy(),
        outcomes in prop::collection::vec(any::<bool>(), 0..200)
    ) {
        let mut stair = Staircase::new(initial, min, max, step);
        for hit in outcomes {
            stair.update(hit);
            prop_assert!(stair.current() >= min && stair.current() <= max);
            prop_assert!(stair.consecutive_hits() < 2);
        }
    }

    // A miss never shortens the target, two hits never lengthen it
    #[test]
    fn staircase_moves_in_the_right_direction(
        (min, max, initial, step) in staircase_strategy()
    ) {
        let mut stair = Staircase::new(initial, min, max, step);
        let before = stair.current();
        stair.update(false);
        prop_assert!(stair.current() >= before);

        let before = stair.current();
        stair.update(true);
        stair.update(true);
        prop_assert!(stair.current() <= before);
    }

    // Each condition appears floor(n/k) or floor(n/k)+1 times, in total n
    #[test]
    fn schedule_is_balanced(k in 1usize..8, n in 0usize..200, seed in any::<u64>()) {
        let conds = conditions(k);
        let mut rng = StdRng::seed_from_u64(seed);
        let seq = build_sequence(&conds, n, &mut rng);
        prop_assert_eq!(seq.len(), n);

        let base = n / k;
        for (i, c) in conds.iter().enumerate() {
            let count = seq.iter().filter(|l| **l == c.label).count();
            let expected = base + usize::from(i < n % k);
            prop_assert_eq!(count, expected);
        }
    }

    // Scaling only shortens and respects the floor
    #[test]
    fn adjust_never_lengthens(
        target in 120u32..1000,
        rate in 0.0f64..=1.0,
        threshold in 0.0f64..=100.0,
        scale in 0.1f64..=1.0,
        floor in 0u32..120
    ) {
        let adjusted = adjust(target, Some(rate), threshold, scale, floor);
        prop_assert!(adjusted <= target);
        prop_assert!(adjusted >= floor);
        if rate * 100.0 <= threshold {
            prop_assert_eq!(adjusted, target);
        }
    }

    // The window rate is the hit share of the last `capacity` outcomes
    #[test]
    fn window_rate_matches_tail(
        capacity in 1usize..30,
        outcomes in prop::collection::vec(any::<bool>(), 1..100)
    ) {
        let mut window = OutcomeWindow::new(capacity);
        for &hit in &outcomes {
            window.record(hit);
        }
        let tail = &outcomes[outcomes.len().saturating_sub(capacity)..];
        let expected = tail.iter().filter(|h| **h).count() as f64 / tail.len() as f64;
        prop_assert!((window.rate().unwrap() - expected).abs() < 1e-12);
        prop_assert_eq!(window.len(), tail.len());
    }

    // Global scope shares one window across labels
    #[test]
    fn global_scope_ignores_label(outcomes in prop::collection::vec(any::<bool>(), 1..50)) {
        let mut store = HistoryStore::new(HistoryScope::Global, 20);
        for (i, &hit) in outcomes.iter().enumerate() {
            store.record(if i % 2 == 0 { "A" } else { "B" }, hit);
        }
        prop_assert_eq!(store.rate("A"), store.rate("B"));
    }
}
