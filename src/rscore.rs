// src/rscore.rs

use crate::constants::RSCORE_SCALE_EPSILON;
use crate::models::HistoryScope;
use log::debug;
use std::collections::{HashMap, VecDeque};

// --- Bounded Window ---

/// FIFO of the most recent hit/miss outcomes, oldest evicted at capacity.
#[derive(Debug, Clone)]
pub struct OutcomeWindow {
    capacity: usize,
    outcomes: VecDeque<bool>,
}

impl OutcomeWindow {
    pub fn new(capacity: usize) -> Self {
        OutcomeWindow {
            capacity,
            outcomes: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, hit: bool) {
        if self.capacity == 0 {
            return;
        }
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(hit);
    }

    /// Mean hit rate in `[0, 1]`, `None` while empty.
    pub fn rate(&self) -> Option<f64> {
        if self.outcomes.is_empty() {
            return None;
        }
        let hits = self.outcomes.iter().filter(|&&h| h).count();
        Some(hits as f64 / self.outcomes.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

// --- Keyed Store ---

/// Performance history keyed by condition. In global scope every label maps
/// to the single implicit key `None`, so reads and writes share one window.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    scope: HistoryScope,
    capacity: usize,
    windows: HashMap<Option<String>, OutcomeWindow>,
}

impl HistoryStore {
    pub fn new(scope: HistoryScope, capacity: usize) -> Self {
        HistoryStore {
            scope,
            capacity,
            windows: HashMap::new(),
        }
    }

    fn key(&self, label: &str) -> Option<String> {
        match self.scope {
            HistoryScope::Global => None,
            HistoryScope::PerCondition => Some(label.to_string()),
        }
    }

    pub fn record(&mut self, label: &str, hit: bool) {
        let key = self.key(label);
        let capacity = self.capacity;
        self.windows
            .entry(key)
            .or_insert_with(|| OutcomeWindow::new(capacity))
            .record(hit);
    }

    pub fn rate(&self, label: &str) -> Option<f64> {
        self.windows.get(&self.key(label)).and_then(|w| w.rate())
    }
}

// --- Adjustment ---

/// Shortens the staircase proposal when recent performance is above
/// `threshold` percent. An empty history (`rate == None`) never scales.
pub fn adjust(
    target_ms_pre: u32,
    rate: Option<f64>,
    threshold: f64,
    scale: f64,
    floor_ms: u32,
) -> u32 {
    let Some(rate) = rate else {
        return target_ms_pre;
    };
    let percent = rate * 100.0;
    if percent <= threshold {
        return target_ms_pre;
    }
    let scaled = (target_ms_pre as f64 * scale + RSCORE_SCALE_EPSILON).floor();
    let scaled = if scaled <= 0.0 { 0 } else { scaled.min(u32::MAX as f64) as u32 };
    let target = scaled.max(floor_ms);
    debug!(
        "[RScore] rate {:.1}% > {:.1}%: {}ms * {} -> {}ms",
        percent, threshold, target_ms_pre, scale, target
    );
    target
}
