// src/staircase.rs

use crate::constants::HITS_TO_STEP_DOWN;
use log::debug;

/// 1-up/2-down adaptive target duration for one condition.
///
/// A miss lengthens the target by one step immediately; two consecutive hits
/// shorten it by one step. The hit rate converges toward ~70.7%.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staircase {
    value_ms: u32,
    min_ms: u32,
    max_ms: u32,
    step_ms: u32,
    consecutive_hits: u32,
}

impl Staircase {
    pub fn new(initial_ms: u32, min_ms: u32, max_ms: u32, step_ms: u32) -> Self {
        Staircase {
            value_ms: initial_ms.clamp(min_ms, max_ms),
            min_ms,
            max_ms,
            step_ms,
            consecutive_hits: 0,
        }
    }

    pub fn current(&self) -> u32 {
        self.value_ms
    }

    pub fn consecutive_hits(&self) -> u32 {
        self.consecutive_hits
    }

    pub fn update(&mut self, hit: bool) {
        let old = self.value_ms;
        if hit {
            self.consecutive_hits += 1;
            if self.consecutive_hits >= HITS_TO_STEP_DOWN {
                self.value_ms = self.value_ms.saturating_sub(self.step_ms).max(self.min_ms);
                self.consecutive_hits = 0;
            }
        } else {
            self.value_ms = self.value_ms.saturating_add(self.step_ms).min(self.max_ms);
            self.consecutive_hits = 0;
        }
        debug!(
            "[Staircase] hit={} value {}ms -> {}ms (consecutive hits: {})",
            hit, old, self.value_ms, self.consecutive_hits
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stair() -> Staircase {
        Staircase::new(250, 120, 400, 10)
    }

    #[test]
    fn miss_hit_hit_miss_sequence() {
        let mut s = stair();
        let mut seen = vec![s.current()];
        for hit in [false, true, true, false] {
            s.update(hit);
            seen.push(s.current());
        }
        assert_eq!(seen, vec![250, 260, 260, 250, 260]);
    }

    #[test]
    fn single_hit_changes_nothing() {
        let mut s = stair();
        s.update(true);
        assert_eq!(s.current(), 250);
        assert_eq!(s.consecutive_hits(), 1);
    }

    #[test]
    fn miss_resets_pending_hit() {
        let mut s = stair();
        s.update(true);
        s.update(false);
        assert_eq!(s.current(), 260);
        assert_eq!(s.consecutive_hits(), 0);
        // The earlier hit no longer counts toward a step down.
        s.update(true);
        assert_eq!(s.current(), 260);
    }

    #[test]
    fn clamps_at_both_ends() {
        let mut s = Staircase::new(125, 120, 135, 10);
        s.update(true);
        s.update(true);
        assert_eq!(s.current(), 120);
        s.update(false);
        s.update(false);
        assert_eq!(s.current(), 135);
    }

    #[test]
    fn initial_value_is_clamped_into_range() {
        let s = Staircase::new(900, 120, 400, 10);
        assert_eq!(s.current(), 400);
    }
}
