//! The event shape the target watcher (D) consumes from the cluster and
//! turns into reconcile keys (spec §4.1). Kept as plain data so the
//! dedup/fan-out logic in `services::target_watcher` is testable with
//! synthetic events, without a live cluster.

use crate::domain::models::target::ScaleTargetKey;

/// A raw change notification from the target/trigger-auth watch streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A target descriptor was created or its spec changed. `generation`
    /// lets the watcher filter out status-only/annotation-only updates
    /// (spec §4.1, "filters out updates that touch only status fields").
    TargetChanged {
        key: ScaleTargetKey,
        trigger_auth_refs: Vec<String>,
        generation: i64,
    },
    /// A target descriptor was removed.
    TargetDeleted { key: ScaleTargetKey },
    /// A trigger-authentication descriptor changed; the watcher fans this
    /// out to every target referencing it (spec §4.1).
    AuthChanged { namespace: String, name: String },
}
