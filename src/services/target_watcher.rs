//! Target watcher (D): turns raw cluster change events into a deduplicated
//! reconcile-key queue, with per-key in-flight coalescing and
//! trigger-authentication fan-out (spec §4.1).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::models::target::ScaleTargetKey;
use crate::domain::ports::watch::WatchEvent;

#[derive(Default)]
struct WatcherState {
    /// Keys already enqueued and not yet dequeued; re-enqueuing one is a
    /// no-op (spec §4.1, "per-key in-flight coalescing").
    pending: HashSet<ScaleTargetKey>,
    /// Last-seen spec generation per target, used to drop status-only
    /// updates (spec §4.1, "filters out updates that touch only status
    /// fields").
    generations: HashMap<ScaleTargetKey, i64>,
    /// `(namespace, auth name) -> targets referencing it`, built up as
    /// target-changed events arrive, used for auth-change fan-out.
    auth_refs: HashMap<(String, String), HashSet<ScaleTargetKey>>,
}

/// Consumes a stream of [`WatchEvent`]s and produces a deduplicated
/// `ScaleTargetKey` queue for the reconciler.
pub struct TargetWatcherService {
    state: Mutex<WatcherState>,
    queue_tx: mpsc::Sender<ScaleTargetKey>,
    queue_rx: Mutex<mpsc::Receiver<ScaleTargetKey>>,
}

impl TargetWatcherService {
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);
        Self {
            state: Mutex::new(WatcherState::default()),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
        }
    }

    /// Drains `events` until the channel closes, enqueueing reconcile keys
    /// as it goes. Intended to run as a long-lived task alongside the
    /// reconciler's consume loop.
    pub async fn run(&self, mut events: mpsc::Receiver<WatchEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("target watcher event stream ended");
    }

    async fn handle_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::TargetChanged {
                key,
                trigger_auth_refs,
                generation,
            } => {
                let should_enqueue = {
                    let mut state = self.state.lock().expect("watcher state lock poisoned");
                    let prior = state.generations.insert(key.clone(), generation);
                    for refs in state.auth_refs.values_mut() {
                        refs.remove(&key);
                    }
                    for auth_name in trigger_auth_refs {
                        state
                            .auth_refs
                            .entry((key.namespace.clone(), auth_name))
                            .or_default()
                            .insert(key.clone());
                    }
                    prior != Some(generation)
                };
                if should_enqueue {
                    self.enqueue(key).await;
                }
            }
            WatchEvent::TargetDeleted { key } => {
                {
                    let mut state = self.state.lock().expect("watcher state lock poisoned");
                    state.generations.remove(&key);
                    for refs in state.auth_refs.values_mut() {
                        refs.remove(&key);
                    }
                }
                self.enqueue(key).await;
            }
            WatchEvent::AuthChanged { namespace, name } => {
                let referencing = {
                    let state = self.state.lock().expect("watcher state lock poisoned");
                    state
                        .auth_refs
                        .get(&(namespace, name))
                        .cloned()
                        .unwrap_or_default()
                };
                for key in referencing {
                    self.enqueue(key).await;
                }
            }
        }
    }

    async fn enqueue(&self, key: ScaleTargetKey) {
        let newly_pending = {
            let mut state = self.state.lock().expect("watcher state lock poisoned");
            state.pending.insert(key.clone())
        };
        if !newly_pending {
            return;
        }
        if self.queue_tx.send(key).await.is_err() {
            debug!("reconcile queue receiver dropped");
        }
    }

    /// Pulls the next reconcile key, clearing its pending marker so a
    /// change arriving mid-reconcile will enqueue it again.
    pub async fn recv(&self) -> Option<ScaleTargetKey> {
        let key = self.queue_rx.lock().expect("queue receiver lock poisoned").recv().await;
        if let Some(key) = &key {
            self.state
                .lock()
                .expect("watcher state lock poisoned")
                .pending
                .remove(key);
        }
        key
    }
}
