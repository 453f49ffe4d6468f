//! The process-wide metric store (component G, spec §4.4).
//!
//! An `RwLock`-guarded map paired with a broadcast channel subscribers
//! use to react to writes — here, the adapter's response cache
//! invalidates on every `Put`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};

use crate::domain::models::metric::{DerivedMetricSpec, MetricStoreEntry};
use crate::domain::models::target::ScaleTargetKey;

/// Notification emitted on every successful [`MetricStore::put`].
#[derive(Debug, Clone)]
pub struct MetricPutEvent {
    pub target: ScaleTargetKey,
    pub metric_name: String,
}

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// A process-wide map keyed by `(target, metric name)` (spec §4.4).
/// Staleness is not enforced here — callers (the adapter) decide based on
/// the entry's timestamp and the target's polling interval.
pub struct MetricStore {
    entries: Arc<RwLock<HashMap<(ScaleTargetKey, String), MetricStoreEntry>>>,
    events: broadcast::Sender<MetricPutEvent>,
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricStore {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            events: tx,
        }
    }

    /// Overwrite the entry for `(target, metric name)` (spec §4.4, `Put`).
    pub async fn put(
        &self,
        target: ScaleTargetKey,
        metric_name: String,
        value: f64,
        spec: DerivedMetricSpec,
        timestamp: DateTime<Utc>,
    ) {
        let event = MetricPutEvent {
            target: target.clone(),
            metric_name: metric_name.clone(),
        };
        {
            let mut entries = self.entries.write().await;
            entries.insert(
                (target, metric_name),
                MetricStoreEntry {
                    value,
                    timestamp,
                    spec,
                },
            );
        }
        // No subscribers is fine; the adapter may not have started yet.
        let _ = self.events.send(event);
    }

    /// Look up `(target, metric name)` (spec §4.4, `Get`).
    pub async fn get(&self, target: &ScaleTargetKey, metric_name: &str) -> Option<MetricStoreEntry> {
        let entries = self.entries.read().await;
        entries
            .get(&(target.clone(), metric_name.to_string()))
            .cloned()
    }

    /// Remove every entry for `target` (spec §4.4, `PurgeTarget`; spec
    /// invariant 5, deletion cascade).
    pub async fn purge_target(&self, target: &ScaleTargetKey) {
        let mut entries = self.entries.write().await;
        entries.retain(|(key, _), _| key != target);
    }

    /// Subscribe to `Put` notifications (spec §4.4, `Subscribe`).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MetricPutEvent> {
        self.events.subscribe()
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
