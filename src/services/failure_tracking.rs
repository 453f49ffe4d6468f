//! Per-trigger consecutive-failure counting (spec §3 "Runtime: probe loop
//! state", §4.8 failure semantics).
//!
//! A deliberately simplified derivative of a circuit-breaker failure
//! counter: these failure semantics need only a consecutive-failure
//! counter crossing a threshold to activate a fallback, and a success
//! resetting it to zero — no half-open/testing recovery state machine is
//! called for (see DESIGN.md).

use std::collections::HashMap;

/// Tracks consecutive probe failures per trigger index within one target's
/// probe loop.
#[derive(Debug, Default, Clone)]
pub struct FailureTracker {
    counts: HashMap<usize, u32>,
}

impl FailureTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a probe failure for `trigger_index`, returning the new
    /// consecutive count.
    pub fn record_failure(&mut self, trigger_index: usize) -> u32 {
        let count = self.counts.entry(trigger_index).or_insert(0);
        *count += 1;
        *count
    }

    /// Record a probe success, resetting `trigger_index`'s counter
    /// (spec §4.3 step 1, "success resets it").
    pub fn record_success(&mut self, trigger_index: usize) {
        self.counts.insert(trigger_index, 0);
    }

    #[must_use]
    pub fn consecutive_failures(&self, trigger_index: usize) -> u32 {
        self.counts.get(&trigger_index).copied().unwrap_or(0)
    }

    /// Whether `trigger_index` has crossed `threshold` consecutive
    /// failures (spec §4.3 step 2, §4.8 fallback activation).
    #[must_use]
    pub fn has_crossed(&self, trigger_index: usize, threshold: u32) -> bool {
        self.consecutive_failures(trigger_index) >= threshold
    }
}
