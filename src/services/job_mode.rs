//! Job mode (component I, spec §4.6).
//!
//! A queue-depth-driven pool shape, reduced to what run-to-completion
//! targets need: a pool of in-flight work items sized off a
//! probe-derived queue depth, with no persisted dependency-graph task
//! store behind it (there's nothing here to persist — completion is
//! observed and reported by whatever drives the work items, out of
//! scope per spec §4.6).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::target::ScaleTargetKey;

/// One in-flight unit of work tracked against a target's queue depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// What changed on a [`JobModeController::reconcile`] call: items newly
/// created this pass, and the pool's resulting size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDelta {
    pub created: Vec<WorkItem>,
    pub current_count: usize,
}

/// Maintains one work-item pool per run-to-completion target (spec §4.6).
/// No native autoscaler is generated for these targets; this is the
/// entirety of their scaling decision.
#[derive(Default)]
pub struct JobModeController {
    pools: RwLock<HashMap<ScaleTargetKey, Vec<WorkItem>>>,
}

impl JobModeController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate a tick's queue-depth reading into work-item creation
    /// (spec §4.6, "creating new items on depth increase"). Cooldown is
    /// the caller's responsibility (mirroring the probe loop's own
    /// cooldown gate on zero↔one decisions) — this only ever grows the
    /// pool, it never shrinks it; shrinkage happens exclusively through
    /// [`Self::complete`] as items finish on their own.
    pub async fn reconcile(
        &self,
        key: &ScaleTargetKey,
        queue_depth: f64,
        activation_threshold: f64,
        min_replicas: i32,
        max_replicas: i32,
    ) -> PoolDelta {
        let desired = if queue_depth > activation_threshold {
            (queue_depth.ceil() as i32).clamp(min_replicas.max(1), max_replicas)
        } else {
            min_replicas.max(0)
        };

        let mut pools = self.pools.write().await;
        let pool = pools.entry(key.clone()).or_default();
        let mut created = Vec::new();
        while (pool.len() as i32) < desired {
            let item = WorkItem {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
            };
            pool.push(item.clone());
            created.push(item);
        }
        PoolDelta {
            created,
            current_count: pool.len(),
        }
    }

    /// A work item finished on its own and exits the pool (spec §4.6,
    /// "letting completed items exit naturally"). A no-op if the item or
    /// target is already gone.
    pub async fn complete(&self, key: &ScaleTargetKey, item_id: Uuid) {
        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get_mut(key) {
            pool.retain(|item| item.id != item_id);
        }
    }

    #[must_use]
    pub async fn pool_size(&self, key: &ScaleTargetKey) -> usize {
        self.pools.read().await.get(key).map_or(0, Vec::len)
    }

    /// Deletion cascade counterpart (spec invariant 5): drop a
    /// terminating target's entire pool.
    pub async fn purge_target(&self, key: &ScaleTargetKey) {
        self.pools.write().await.remove(key);
    }
}
