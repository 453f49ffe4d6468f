//! The reconciler (component E, spec §4.2).
//!
//! Combines a tick/state-transition shape with a per-target backoff-state
//! map and the `error_policy`/requeue pattern common to `kube`-based
//! controllers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::domain::errors::{Disposition, ScaleError};
use crate::domain::models::config::OperatorConfig;
use crate::domain::models::metric::{derive_metric_name, DerivedMetricSpec};
use crate::domain::models::target::{
    Condition, ConditionStatus, ConditionType, ScaleTargetKey, ScaleTargetSpec, ScaleTargetStatus,
};
use crate::domain::ports::orchestrator::{
    AutoscalerWriter, DesiredAutoscaler, PodTemplateReader, ReplicaController, TargetRepository,
    TriggerAuthRepository,
};
use crate::services::job_mode::JobModeController;
use crate::services::metric_store::MetricStore;
use crate::services::probe_loop::{LoadedProbe, ProbeLoop, ProbeLoopConfig};
use crate::services::probe_registry::ProbeRegistry;
use crate::services::secret_resolution::SecretResolverRegistry;

/// What a reconcile pass asked the caller to do next (mirrors `kube`'s
/// `Action::requeue`/`Action::await_change`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequeueAction {
    /// No known reason to revisit; wait for the next watch event.
    AwaitChange,
    /// Revisit after this duration.
    Requeue(Duration),
}

struct BackoffState {
    consecutive_failures: u32,
}

/// Identifies the configuration a running probe loop was spawned with, so
/// the reconciler can tell whether it must stop-and-respawn (spec §4.2
/// step 7).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LoopFingerprint(String);

impl LoopFingerprint {
    fn of(spec: &ScaleTargetSpec, resolved_auth_digest: &str) -> Self {
        let trigger_sig: Vec<String> = spec
            .triggers
            .iter()
            .map(|t| format!("{}:{}:{:?}", t.trigger_type, t.discriminator(), t.config))
            .collect();
        Self(format!(
            "{}|{:?}|{}",
            trigger_sig.join(","),
            spec.polling_interval,
            resolved_auth_digest
        ))
    }
}

struct RunningLoop {
    probe_loop: Arc<ProbeLoop>,
    handle: tokio::task::JoinHandle<()>,
    fingerprint: LoopFingerprint,
}

/// For each enqueued target key, computes desired derived objects, diffs
/// against observed state, applies changes, and starts/stops the
/// per-target probe loop (component E).
pub struct Reconciler {
    config: OperatorConfig,
    targets: Arc<dyn TargetRepository>,
    trigger_auths: Arc<dyn TriggerAuthRepository>,
    pod_templates: Arc<dyn PodTemplateReader>,
    secret_registry: Arc<SecretResolverRegistry>,
    probe_registry: Arc<ProbeRegistry>,
    autoscaler_writer: Arc<dyn AutoscalerWriter>,
    replica_controller: Arc<dyn ReplicaController>,
    metric_store: Arc<MetricStore>,
    job_mode: Arc<JobModeController>,
    loops: RwLock<HashMap<ScaleTargetKey, RunningLoop>>,
    backoff: RwLock<HashMap<ScaleTargetKey, BackoffState>>,
    /// Per-key locks so two reconciles of the same target never run
    /// concurrently, even if the driver spawns one per dequeued key
    /// (spec invariant 1, "reconciliation is serialized per target key").
    key_locks: Mutex<HashMap<ScaleTargetKey, Arc<Mutex<()>>>>,
}

impl Reconciler {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OperatorConfig,
        targets: Arc<dyn TargetRepository>,
        trigger_auths: Arc<dyn TriggerAuthRepository>,
        pod_templates: Arc<dyn PodTemplateReader>,
        secret_registry: Arc<SecretResolverRegistry>,
        probe_registry: Arc<ProbeRegistry>,
        autoscaler_writer: Arc<dyn AutoscalerWriter>,
        replica_controller: Arc<dyn ReplicaController>,
        metric_store: Arc<MetricStore>,
        job_mode: Arc<JobModeController>,
    ) -> Self {
        Self {
            config,
            targets,
            trigger_auths,
            pod_templates,
            secret_registry,
            probe_registry,
            autoscaler_writer,
            replica_controller,
            metric_store,
            job_mode,
            loops: RwLock::new(HashMap::new()),
            backoff: RwLock::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn key_lock(&self, key: &ScaleTargetKey) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Reconcile one target key (spec §4.2). On error, the caller should
    /// requeue according to `error.disposition()`.
    ///
    /// Holds a per-key lock for the duration of the call so a second
    /// reconcile for the same key arriving mid-pass waits rather than
    /// running concurrently (spec invariant 1).
    pub async fn reconcile(&self, key: &ScaleTargetKey) -> Result<RequeueAction, ScaleError> {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;
        self.reconcile_locked(key).await
    }

    async fn reconcile_locked(&self, key: &ScaleTargetKey) -> Result<RequeueAction, ScaleError> {
        let Some((spec, mut status)) = self.targets.get(key).await? else {
            // Step 1: absent -> tear down.
            self.teardown(key).await?;
            return Ok(RequeueAction::AwaitChange);
        };

        // Step 2: validate.
        if let Err(e) = spec.validate(key) {
            self.record_condition(
                &mut status,
                ConditionType::Ready,
                ConditionStatus::False,
                "ValidationFailed",
                &e.to_string(),
            );
            self.targets.write_status(key, &status).await?;
            return Err(e);
        }

        // Paused-replicas edge case: pin the derived autoscaler and skip
        // probe-loop registration (spec §4.2, "Paused annotation").
        if let Some(paused_at) = spec.paused_replicas {
            self.stop_loop(key).await;
            let desired = DesiredAutoscaler {
                min_replicas: paused_at,
                max_replicas: paused_at,
                metrics: self.derive_metric_specs(&spec),
            };
            self.apply_autoscaler(key, &desired).await?;
            self.record_condition(
                &mut status,
                ConditionType::Paused,
                ConditionStatus::True,
                "PausedByAnnotation",
                &format!("replicas pinned to {paused_at}"),
            );
            self.targets.write_status(key, &status).await?;
            self.reset_backoff(key).await;
            return Ok(RequeueAction::AwaitChange);
        }

        // Step 3: resolve scale-target.
        let current_replicas = match self
            .replica_controller
            .current_replicas(&spec.scale_target_ref, &key.namespace)
            .await?
        {
            Some(r) => r,
            None => {
                self.record_condition(
                    &mut status,
                    ConditionType::Ready,
                    ConditionStatus::False,
                    "TargetNotFound",
                    "scale target reference could not be resolved",
                );
                self.targets.write_status(key, &status).await?;
                return Err(ScaleError::TargetMissing {
                    namespace: key.namespace.clone(),
                    name: key.name.clone(),
                    workload: spec.scale_target_ref.name.clone(),
                });
            }
        };
        if status.original_replica_count.is_none() {
            status.original_replica_count = Some(current_replicas);
        }

        // Step 4: resolve trigger authentication.
        let pod_env = self
            .pod_templates
            .read_env(&spec.scale_target_ref, &key.namespace)
            .await
            .unwrap_or_default();
        let mut resolved_auths = Vec::with_capacity(spec.triggers.len());
        let mut auth_digest_parts = Vec::new();
        for trigger in &spec.triggers {
            let resolved = if let Some(auth_ref) = &trigger.auth_ref {
                let auth_spec = self
                    .trigger_auths
                    .get(&key.namespace, auth_ref)
                    .await?
                    .ok_or_else(|| {
                        ScaleError::Validation {
                            namespace: key.namespace.clone(),
                            name: key.name.clone(),
                            reason: format!("triggerAuthentication {auth_ref} not found"),
                        }
                    })?;
                self.secret_registry
                    .resolve_all(&auth_spec, &pod_env)
                    .await?
            } else {
                Default::default()
            };
            auth_digest_parts.push(format!("{:?}", resolved));
            resolved_auths.push(resolved);
        }
        let auth_digest = auth_digest_parts.join(";");

        // Step 5: compute desired derived native autoscaler.
        let is_scalable = self
            .replica_controller
            .is_scalable(&spec.scale_target_ref)
            .await?;
        let metrics = self.derive_metric_specs(&spec);

        if is_scalable && !matches!(spec.mode, crate::domain::models::target::Mode::RunToCompletion) {
            let active_or_unknown_min = spec.active_floor();
            let min_replicas = spec.idle_replicas.unwrap_or(active_or_unknown_min);
            let desired = DesiredAutoscaler {
                min_replicas,
                max_replicas: spec.max_replicas,
                metrics: metrics.clone(),
            };
            // Step 6: diff/apply.
            self.apply_autoscaler(key, &desired).await?;
        } else if !is_scalable {
            self.record_condition(
                &mut status,
                ConditionType::Ready,
                ConditionStatus::Unknown,
                "Unscalable",
                "scale target kind does not expose the scale subresource; running in advisory mode",
            );
        }

        status.external_metric_names = metrics.iter().map(|m| m.metric_name.clone()).collect();

        // Step 7: register or refresh the probe loop.
        let fingerprint = LoopFingerprint::of(&spec, &auth_digest);
        self.ensure_loop(key, &spec, &metrics, resolved_auths, fingerprint)
            .await?;

        // Step 8: record conditions.
        self.record_condition(
            &mut status,
            ConditionType::Ready,
            ConditionStatus::True,
            "Reconciled",
            "target reconciled successfully",
        );
        self.targets.write_status(key, &status).await?;
        self.reset_backoff(key).await;

        Ok(RequeueAction::AwaitChange)
    }

    fn derive_metric_specs(&self, spec: &ScaleTargetSpec) -> Vec<DerivedMetricSpec> {
        spec.triggers
            .iter()
            .enumerate()
            .map(|(index, trigger)| {
                let metric_name =
                    derive_metric_name(index, &trigger.trigger_type, &trigger.discriminator());
                let fallback = trigger.fallback.or(spec.fallback);
                DerivedMetricSpec {
                    metric_name,
                    target_value: trigger.target_value(),
                    activation_threshold: trigger.activation_threshold(),
                    metric_type: trigger.metric_type,
                    fallback_threshold: fallback.map(|f| f.failure_threshold),
                    fallback_replicas: fallback.map(|f| f.replicas),
                }
            })
            .collect()
    }

    async fn apply_autoscaler(
        &self,
        key: &ScaleTargetKey,
        desired: &DesiredAutoscaler,
    ) -> Result<(), ScaleError> {
        if let Some(observed) = self.autoscaler_writer.get(key).await? {
            if !observed.owned_by_this_operator {
                return Err(ScaleError::OwnershipConflict {
                    namespace: key.namespace.clone(),
                    name: key.name.clone(),
                });
            }
            if observed.min_replicas == desired.min_replicas
                && observed.max_replicas == desired.max_replicas
                && observed.metric_names
                    == desired
                        .metrics
                        .iter()
                        .map(|m| m.metric_name.clone())
                        .collect::<Vec<_>>()
            {
                return Ok(()); // idempotent: no write needed.
            }
        }
        self.autoscaler_writer.apply(key, desired).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn ensure_loop(
        &self,
        key: &ScaleTargetKey,
        spec: &ScaleTargetSpec,
        metrics: &[DerivedMetricSpec],
        resolved_auths: Vec<crate::domain::models::trigger_auth::ResolvedAuth>,
        fingerprint: LoopFingerprint,
    ) -> Result<(), ScaleError> {
        {
            let loops = self.loops.read().await;
            if let Some(running) = loops.get(key) {
                if running.fingerprint == fingerprint {
                    return Ok(()); // unchanged: nothing to do.
                }
            }
        }

        self.stop_loop(key).await;

        let mut loaded_probes = Vec::with_capacity(spec.triggers.len());
        for (index, (trigger, resolved_auth)) in
            spec.triggers.iter().zip(resolved_auths.iter()).enumerate()
        {
            let metric_spec = &metrics[index];
            let probe = self
                .probe_registry
                .construct(
                    &trigger.trigger_type,
                    crate::domain::ports::probe::ProbeConstructArgs {
                        config: &trigger.config,
                        resolved_auth,
                        pod_identity_hint: None,
                        metric_name: metric_spec.metric_name.clone(),
                        metric_type: metric_spec.metric_type,
                        activation_threshold: metric_spec.activation_threshold,
                        target_value: metric_spec.target_value,
                    },
                )
                .await?;
            loaded_probes.push(LoadedProbe {
                trigger_index: index,
                metric_name: metric_spec.metric_name.clone(),
                probe,
                fallback: trigger.fallback,
            });
        }

        let probe_timeout = Duration::from_secs(self.config.default_probe_timeout_secs)
            .min(spec.polling_interval / 2);
        let job_mode = matches!(spec.mode, crate::domain::models::target::Mode::RunToCompletion)
            .then(|| self.job_mode.clone());
        let probe_loop = ProbeLoop::new(
            ProbeLoopConfig {
                key: key.clone(),
                scale_target_ref: spec.scale_target_ref.clone(),
                polling_interval: spec.polling_interval,
                cooldown_period: spec.cooldown_period,
                min_replicas: spec.min_replicas,
                max_replicas: spec.max_replicas,
                idle_replicas: spec.idle_replicas,
                probe_call_timeout: probe_timeout,
                mode: spec.mode,
            },
            loaded_probes,
            self.metric_store.clone(),
            self.replica_controller.clone(),
            job_mode,
        );
        let handle = probe_loop.clone().start();

        let mut loops = self.loops.write().await;
        loops.insert(
            key.clone(),
            RunningLoop {
                probe_loop,
                handle,
                fingerprint,
            },
        );
        Ok(())
    }

    async fn stop_loop(&self, key: &ScaleTargetKey) {
        let running = { self.loops.write().await.remove(key) };
        if let Some(running) = running {
            running.probe_loop.stop().await;
            running.handle.abort();
        }
    }

    /// Deletion cascade (spec invariant 5): stop the loop, delete the
    /// derived autoscaler, purge metric-store entries — in that order
    /// (see DESIGN.md's decision on bi-directional deletion ordering).
    async fn teardown(&self, key: &ScaleTargetKey) -> Result<(), ScaleError> {
        self.stop_loop(key).await;
        self.autoscaler_writer.delete(key).await?;
        self.metric_store.purge_target(key).await;
        self.job_mode.purge_target(key).await;
        self.backoff.write().await.remove(key);
        self.key_locks.lock().await.remove(key);
        Ok(())
    }

    fn record_condition(
        &self,
        status: &mut ScaleTargetStatus,
        condition_type: ConditionType,
        condition_status: ConditionStatus,
        reason: &str,
        message: &str,
    ) {
        let now = Utc::now();
        if let Some(existing) = status
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            if existing.status != condition_status {
                existing.last_transition_time = now;
            }
            existing.status = condition_status;
            existing.reason = reason.to_string();
            existing.message = message.to_string();
        } else {
            status.conditions.push(Condition {
                condition_type,
                status: condition_status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
            });
        }
    }

    async fn reset_backoff(&self, key: &ScaleTargetKey) {
        self.backoff.write().await.remove(key);
    }

    /// The next backoff delay for a failing key, per spec §7's
    /// "exponential backoff with a cap ... resets on any successful
    /// reconcile".
    pub async fn next_backoff(&self, key: &ScaleTargetKey) -> Duration {
        let mut backoff = self.backoff.write().await;
        let state = backoff.entry(key.clone()).or_insert(BackoffState {
            consecutive_failures: 0,
        });
        state.consecutive_failures += 1;
        let delay_ms = self
            .config
            .backoff_initial_ms
            .saturating_mul(1u64 << state.consecutive_failures.min(20))
            .min(self.config.backoff_max_ms);
        Duration::from_millis(delay_ms)
    }

    /// Maps an error to the requeue behavior a controller driver should
    /// apply (spec §7's disposition table).
    #[must_use]
    pub fn error_policy(error: &ScaleError) -> RequeueAction {
        match error.disposition() {
            Disposition::Terminal => RequeueAction::AwaitChange,
            Disposition::RetriableImmediate => RequeueAction::Requeue(Duration::from_millis(100)),
            Disposition::RetriableBackoff => RequeueAction::Requeue(Duration::from_secs(5)),
        }
    }
}
