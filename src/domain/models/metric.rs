//! Derived metric specs and the runtime metric-store entry shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a trigger's numeric reading should be interpreted by the native
/// autoscaler: raw or divided across replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MetricType {
    /// The raw value is used as-is.
    Value,
    /// The value is divided by the current replica count before use.
    AverageValue,
}

/// Per-`(target, metric name)` spec, synthesized by the reconciler from a
/// target's triggers (spec §3, "Derived: metric spec"). Immutable between
/// reconciliations of the same target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetricSpec {
    /// Deterministic name: `s<index>-<type>-<discriminator>`.
    pub metric_name: String,
    pub target_value: f64,
    pub activation_threshold: f64,
    pub metric_type: MetricType,
    /// Copied from the trigger's fallback policy, if any, so the adapter
    /// can act on cache-miss without re-reading the target (spec §4.2).
    pub fallback_threshold: Option<u32>,
    pub fallback_replicas: Option<i32>,
}

/// Runtime entry held by the metric store (spec §3, "Runtime: metric store
/// entry"). Overwritten in place on every successful probe; never queued.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricStoreEntry {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub spec: DerivedMetricSpec,
}

impl MetricStoreEntry {
    /// Whether this entry is usable as a cached answer given `max_age`
    /// (the adapter's "2 × polling-interval" rule, spec §4.5 step 2).
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now.signed_duration_since(self.timestamp) <= max_age
    }
}

/// Derives the deterministic metric name for trigger `index` of type
/// `trigger_type` with discriminator `discriminator` (spec §4.2 step 5).
///
/// The discriminator must already be a stable, restart-safe slug (queue
/// name, stream id, etc.) — this function does not sanitize it beyond
/// lowercasing, since validation (spec §9) is responsible for rejecting
/// collisions before this name is used as a key.
#[must_use]
pub fn derive_metric_name(index: usize, trigger_type: &str, discriminator: &str) -> String {
    format!(
        "s{index}-{}-{}",
        trigger_type.to_ascii_lowercase(),
        discriminator.to_ascii_lowercase()
    )
}
