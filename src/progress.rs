//! Progress normalization.
//!
//! Every promise has a depth: the number of chain links between it and its
//! root producer. A promise of depth `d` spans `d + 1` slots, and its
//! progress is a single [0, 1] value over those slots. A `then` child of a
//! parent with `n` slots owns `n + 1` slots; the parent's progress fills the
//! first `n`, and the last one is filled by whatever promise the callback
//! hands back.
//!
//! Combinators weight each input by its slot count. Merge sums the weighted
//! contributions, race-like combinators take the furthest input.

use crate::error::Error;
use std::rc::Rc;

/// Something whose listeners can be handed a coalesced progress value
/// during a drain.
pub(crate) trait ProgressTarget {
    fn deliver_progress(self: Rc<Self>);
}

/// Number of slots a promise of the given depth spans.
pub(crate) fn slots(depth: u32) -> f64 {
    f64::from(depth) + 1.0
}

/// Maps a parent's normalized progress into its child's scale.
pub(crate) fn scale_to_child(parent_progress: f64, child_depth: u32) -> f64 {
    parent_progress * f64::from(child_depth) / slots(child_depth)
}

/// Maps an adopted promise's progress into the last slot of `child_depth`.
pub(crate) fn last_slot(adopted_progress: f64, child_depth: u32) -> f64 {
    (f64::from(child_depth) + adopted_progress) / slots(child_depth)
}

/// Validates a value handed to a producer's progress report.
pub(crate) fn check_report(value: f32) -> Result<f64, Error> {
    if (0.0..=1.0).contains(&value) {
        Ok(f64::from(value))
    } else {
        Err(Error::InvalidProgress(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Aggregation {
    /// Weighted sum over all inputs.
    Sum,
    /// The input that got furthest.
    Max,
}

/// Per-input progress of a combinator.
#[derive(Debug)]
pub(crate) struct ProgressAggregate {
    mode: Aggregation,
    weights: Vec<f64>,
    current: Vec<f64>,
    frozen: Vec<bool>,
    total: f64,
}

impl ProgressAggregate {
    pub(crate) fn new(depths: &[u32], mode: Aggregation) -> Self {
        let weights: Vec<f64> = depths.iter().copied().map(slots).collect();
        let total = weights.iter().sum();
        Self {
            mode,
            current: vec![0.0; weights.len()],
            frozen: vec![false; weights.len()],
            weights,
            total,
        }
    }

    /// Records input `index` at normalized `progress` and returns the
    /// aggregate. Frozen inputs and regressions are ignored.
    pub(crate) fn update(&mut self, index: usize, progress: f64) -> f64 {
        let slot = (self.current.get_mut(index), self.frozen.get(index));
        if let (Some(current), Some(false)) = slot {
            let progress = progress.clamp(0.0, 1.0);
            if progress > *current {
                *current = progress;
            }
        }
        self.value()
    }

    pub(crate) fn complete(&mut self, index: usize) -> f64 {
        let value = self.update(index, 1.0);
        self.freeze(index);
        value
    }

    /// Stops taking updates for `index`; its last value keeps counting.
    pub(crate) fn freeze(&mut self, index: usize) {
        if let Some(frozen) = self.frozen.get_mut(index) {
            *frozen = true;
        }
    }

    pub(crate) fn value(&self) -> f64 {
        match self.mode {
            Aggregation::Sum if self.total > 0.0 => {
                let done: f64 = self
                    .current
                    .iter()
                    .zip(&self.weights)
                    .map(|(progress, weight)| progress * weight)
                    .sum();
                (done / self.total).clamp(0.0, 1.0)
            }
            Aggregation::Sum => 0.0,
            Aggregation::Max => self.current.iter().copied().fold(0.0, f64::max),
        }
    }
}
