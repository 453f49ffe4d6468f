//! The cluster-facing half of the target watcher (D): two merged
//! `kube::runtime::watcher` streams (targets, trigger-auths) translated
//! into [`WatchEvent`]s. The dedup queue and auth fan-out logic live in
//! `services::target_watcher`, which consumes these events without
//! needing a cluster itself.

use futures::StreamExt;
use kube::runtime::watcher::{self, Config, Event};
use kube::{Api, Client, ResourceExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::ports::watch::WatchEvent;
use crate::infrastructure::k8s::crd::{key_from, ScaledTarget, ScaledTargetAuth};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Bridges the cluster's target/trigger-auth object streams onto the
/// domain-level [`WatchEvent`] channel.
pub struct TargetWatcher {
    client: Client,
    namespace: Option<String>,
}

impl TargetWatcher {
    #[must_use]
    pub const fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    fn target_api(&self) -> Api<ScaledTarget> {
        self.namespace.as_ref().map_or_else(
            || Api::all(self.client.clone()),
            |ns| Api::namespaced(self.client.clone(), ns),
        )
    }

    fn auth_api(&self) -> Api<ScaledTargetAuth> {
        self.namespace.as_ref().map_or_else(
            || Api::all(self.client.clone()),
            |ns| Api::namespaced(self.client.clone(), ns),
        )
    }

    /// Spawns the two watch streams and returns the merged event channel.
    /// Each watch task runs until the channel's receiver is dropped.
    #[must_use]
    pub fn run(self) -> mpsc::Receiver<WatchEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let target_tx = tx.clone();
        let target_api = self.target_api();
        tokio::spawn(async move {
            let mut stream = watcher::watcher(target_api, Config::default()).boxed();
            while let Some(event) = stream.next().await {
                match event {
                    Ok(Event::Apply(target) | Event::InitApply(target)) => {
                        if let Some(watch_event) = target_changed_event(&target) {
                            if target_tx.send(watch_event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Event::Delete(target)) => {
                        if let Ok(key) = key_from(target.namespace().as_deref(), Some(&target.name_any())) {
                            if target_tx.send(WatchEvent::TargetDeleted { key }).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Event::Init | Event::InitDone) => {}
                    Err(e) => warn!(error = %e, "target watch stream error"),
                }
            }
            debug!("target watch stream ended");
        });

        let auth_tx = tx;
        let auth_api = self.auth_api();
        tokio::spawn(async move {
            let mut stream = watcher::watcher(auth_api, Config::default()).boxed();
            while let Some(event) = stream.next().await {
                match event {
                    Ok(Event::Apply(auth) | Event::InitApply(auth)) => {
                        if let (Some(namespace), name) = (auth.namespace(), auth.name_any()) {
                            let event = WatchEvent::AuthChanged { namespace, name };
                            if auth_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Event::Delete(auth)) => {
                        if let (Some(namespace), name) = (auth.namespace(), auth.name_any()) {
                            let event = WatchEvent::AuthChanged { namespace, name };
                            if auth_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Event::Init | Event::InitDone) => {}
                    Err(e) => warn!(error = %e, "trigger-auth watch stream error"),
                }
            }
            debug!("trigger-auth watch stream ended");
        });

        rx
    }
}

fn target_changed_event(target: &ScaledTarget) -> Option<WatchEvent> {
    let key = key_from(target.namespace().as_deref(), Some(&target.name_any())).ok()?;
    let generation = target.meta().generation.unwrap_or(0);
    let trigger_auth_refs = target
        .spec
        .triggers
        .iter()
        .filter_map(|t| t.auth_ref.clone())
        .collect();
    Some(WatchEvent::TargetChanged {
        key,
        trigger_auth_refs,
        generation,
    })
}
