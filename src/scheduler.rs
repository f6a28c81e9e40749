// src/scheduler.rs

use crate::models::Condition;
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;

/// Builds a shuffled block of `n_trials` condition labels, balanced as evenly
/// as possible. The first `n_trials % k` conditions (config order) receive
/// one extra trial.
pub fn build_sequence<R: Rng + ?Sized>(
    conditions: &[Condition],
    n_trials: usize,
    rng: &mut R,
) -> Vec<String> {
    if conditions.is_empty() || n_trials == 0 {
        return Vec::new();
    }

    let base = n_trials / conditions.len();
    let remainder = n_trials % conditions.len();

    let mut sequence = Vec::with_capacity(n_trials);
    for (i, condition) in conditions.iter().enumerate() {
        let count = base + usize::from(i < remainder);
        sequence.extend(std::iter::repeat(condition.label.clone()).take(count));
    }
    sequence.shuffle(rng);

    debug!(
        "[Scheduler] {} trials over {} conditions (base {}, +1 for first {})",
        n_trials,
        conditions.len(),
        base,
        remainder
    );
    sequence
}
