//! The external-metrics adapter (component H, spec §4.5).
//!
//! Unlike the reconciler, this never writes to the orchestrator — it only
//! reads targets and returns numbers (spec §4.5). Grounded in the same
//! on-demand probe-construction shape as the reconciler's auth-resolution
//! and probe-factory steps, adapted from a standing loop to a single
//! synchronous query per call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::errors::{ProbeError, ScaleError, SecretError};
use crate::domain::models::config::AdapterConfig;
use crate::domain::models::metric::{derive_metric_name, DerivedMetricSpec, MetricType};
use crate::domain::models::target::{ScaleTargetKey, ScaleTargetRef, TriggerSpec};
use crate::domain::ports::orchestrator::{
    PodTemplateReader, ReplicaController, TargetRepository, TriggerAuthRepository,
};
use crate::domain::ports::probe::ProbeConstructArgs;
use crate::services::failure_tracking::FailureTracker;
use crate::services::metric_store::MetricStore;
use crate::services::probe_registry::ProbeRegistry;
use crate::services::secret_resolution::SecretResolverRegistry;

/// One external-metrics query (spec §4.5, "queries of shape
/// `(namespace, target-name, metric-name, label-selector)`").
#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub namespace: String,
    pub target_name: String,
    pub metric_name: String,
    /// Carried through from the HTTP request for parity with the native
    /// autoscaler's query shape. Metric names are already unique within a
    /// target (spec §9, discriminator-collision rejection), so nothing
    /// here needs the selector to disambiguate a lookup.
    pub label_selector: Option<String>,
}

/// Failures this service can return, distinguished by whether the HTTP
/// boundary should answer 404 or 503 (spec §6).
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("target {namespace}/{name} not found")]
    TargetNotFound { namespace: String, name: String },

    #[error("target {namespace}/{name} does not declare metric {metric_name}")]
    MetricNotFound {
        namespace: String,
        name: String,
        metric_name: String,
    },

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Authentication(#[from] SecretError),

    #[error(transparent)]
    Scale(#[from] ScaleError),
}

impl AdapterError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::TargetNotFound { .. } | Self::MetricNotFound { .. })
    }
}

/// Serves on-demand metric queries for the native autoscaler (component
/// H). Holds its own on-demand failure counters, separate from the probe
/// loop's: the adapter runs in its own process with no access to the
/// operator's in-memory loop state, so a fallback threshold here is
/// crossed only by consecutive on-demand failures for the same trigger.
pub struct MetricsAdapter {
    config: AdapterConfig,
    targets: Arc<dyn TargetRepository>,
    trigger_auths: Arc<dyn TriggerAuthRepository>,
    pod_templates: Arc<dyn PodTemplateReader>,
    secret_registry: Arc<SecretResolverRegistry>,
    probe_registry: Arc<ProbeRegistry>,
    replica_controller: Arc<dyn ReplicaController>,
    metric_store: Arc<MetricStore>,
    failures: RwLock<HashMap<(ScaleTargetKey, usize), FailureTracker>>,
}

impl MetricsAdapter {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AdapterConfig,
        targets: Arc<dyn TargetRepository>,
        trigger_auths: Arc<dyn TriggerAuthRepository>,
        pod_templates: Arc<dyn PodTemplateReader>,
        secret_registry: Arc<SecretResolverRegistry>,
        probe_registry: Arc<ProbeRegistry>,
        replica_controller: Arc<dyn ReplicaController>,
        metric_store: Arc<MetricStore>,
    ) -> Self {
        Self {
            config,
            targets,
            trigger_auths,
            pod_templates,
            secret_registry,
            probe_registry,
            replica_controller,
            metric_store,
            failures: RwLock::new(HashMap::new()),
        }
    }

    /// Answer one query (spec §4.5's 5-step algorithm).
    pub async fn query(&self, query: &MetricQuery) -> Result<f64, AdapterError> {
        let key = ScaleTargetKey {
            namespace: query.namespace.clone(),
            name: query.target_name.clone(),
        };

        // Step 1: look up the target and the trigger that derives this
        // metric name. A stale metric name left over from an edited spec
        // falls through the same `None` arm as a query for a name that
        // never existed.
        let Some((spec, _status)) = self.targets.get(&key).await? else {
            return Err(AdapterError::TargetNotFound {
                namespace: key.namespace,
                name: key.name,
            });
        };
        let Some((index, trigger)) = find_trigger(&spec.triggers, &query.metric_name) else {
            return Err(AdapterError::MetricNotFound {
                namespace: key.namespace,
                name: key.name,
                metric_name: query.metric_name.clone(),
            });
        };
        let metric_type = trigger.metric_type;
        let fallback = trigger.fallback.or(spec.fallback);

        // Step 2: cache hit.
        if trigger.use_cached_metrics {
            if let Some(entry) = self.metric_store.get(&key, &query.metric_name).await {
                let max_age_ms =
                    spec.polling_interval.as_millis() as f64 * self.config.cache_staleness_multiplier;
                let max_age = chrono::Duration::milliseconds(max_age_ms as i64);
                if entry.is_fresh(Utc::now(), max_age) {
                    return self
                        .report(metric_type, entry.value, &spec.scale_target_ref, &key.namespace)
                        .await;
                }
            }
        }

        // Step 3: construct the probe on demand and invoke it.
        let derived = DerivedMetricSpec {
            metric_name: query.metric_name.clone(),
            target_value: trigger.target_value(),
            activation_threshold: trigger.activation_threshold(),
            metric_type,
            fallback_threshold: fallback.map(|f| f.failure_threshold),
            fallback_replicas: fallback.map(|f| f.replicas),
        };

        match self.probe_reading(&key, &spec.scale_target_ref, trigger, &derived).await {
            Ok(value) => {
                self.metric_store
                    .put(key.clone(), query.metric_name.clone(), value, derived, Utc::now())
                    .await;
                self.reset_failures(&key, index).await;
                self.report(metric_type, value, &spec.scale_target_ref, &key.namespace).await
            }
            Err(err) => {
                // Step 4: fallback once the on-demand failure count has
                // crossed the trigger's threshold.
                let consecutive = self.record_failure(&key, index).await;
                if let Some(policy) = fallback {
                    if consecutive >= policy.failure_threshold {
                        return self
                            .report(
                                metric_type,
                                f64::from(policy.replicas),
                                &spec.scale_target_ref,
                                &key.namespace,
                            )
                            .await;
                    }
                }
                Err(err)
            }
        }
    }

    async fn probe_reading(
        &self,
        key: &ScaleTargetKey,
        scale_target_ref: &ScaleTargetRef,
        trigger: &TriggerSpec,
        derived: &DerivedMetricSpec,
    ) -> Result<f64, AdapterError> {
        let pod_env = self
            .pod_templates
            .read_env(scale_target_ref, &key.namespace)
            .await
            .unwrap_or_default();
        let resolved_auth = if let Some(auth_ref) = &trigger.auth_ref {
            let auth_spec = self
                .trigger_auths
                .get(&key.namespace, auth_ref)
                .await?
                .ok_or_else(|| ScaleError::Validation {
                    namespace: key.namespace.clone(),
                    name: key.name.clone(),
                    reason: format!("triggerAuthentication {auth_ref} not found"),
                })?;
            self.secret_registry.resolve_all(&auth_spec, &pod_env).await?
        } else {
            Default::default()
        };

        let probe = self
            .probe_registry
            .construct(
                &trigger.trigger_type,
                ProbeConstructArgs {
                    config: &trigger.config,
                    resolved_auth: &resolved_auth,
                    pod_identity_hint: None,
                    metric_name: derived.metric_name.clone(),
                    metric_type: derived.metric_type,
                    activation_threshold: derived.activation_threshold,
                    target_value: derived.target_value,
                },
            )
            .await?;

        let timeout = Duration::from_secs(self.config.probe_timeout_secs);
        let reading = tokio::time::timeout(timeout, probe.metrics_and_activity())
            .await
            .map_err(|_| ProbeError::Timeout(timeout))??;
        probe.close().await;
        Ok(reading.value)
    }

    /// Step 5: report in the declared metric type.
    async fn report(
        &self,
        metric_type: MetricType,
        value: f64,
        scale_target_ref: &ScaleTargetRef,
        namespace: &str,
    ) -> Result<f64, AdapterError> {
        match metric_type {
            MetricType::Value => Ok(value),
            MetricType::AverageValue => {
                let replicas = self
                    .replica_controller
                    .current_replicas(scale_target_ref, namespace)
                    .await?
                    .unwrap_or(1)
                    .max(1);
                Ok(value / f64::from(replicas))
            }
        }
    }

    async fn record_failure(&self, key: &ScaleTargetKey, index: usize) -> u32 {
        let mut failures = self.failures.write().await;
        failures
            .entry((key.clone(), index))
            .or_default()
            .record_failure(index)
    }

    async fn reset_failures(&self, key: &ScaleTargetKey, index: usize) {
        let mut failures = self.failures.write().await;
        if let Some(tracker) = failures.get_mut(&(key.clone(), index)) {
            tracker.record_success(index);
        }
    }
}

fn find_trigger<'s>(triggers: &'s [TriggerSpec], metric_name: &str) -> Option<(usize, &'s TriggerSpec)> {
    triggers.iter().enumerate().find(|(index, trigger)| {
        derive_metric_name(*index, &trigger.trigger_type, &trigger.discriminator()) == metric_name
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::target::{FallbackPolicy, Mode, ScaleTargetRef, ScaleTargetSpec, ScaleTargetStatus};
    use crate::domain::models::trigger_auth::ResolvedAuth;
    use crate::domain::ports::probe::{Probe, ProbeFactory, ProbeReading};
    use crate::services::probe_registry::LoadedProbeFactory;
    use async_trait::async_trait;

    fn key() -> ScaleTargetKey {
        ScaleTargetKey {
            namespace: "default".into(),
            name: "orders".into(),
        }
    }

    fn trigger(use_cached_metrics: bool, fallback: Option<FallbackPolicy>) -> TriggerSpec {
        let mut config = serde_json::Map::new();
        config.insert("queueName".into(), "orders".into());
        config.insert("targetValue".into(), 10.0.into());
        TriggerSpec {
            trigger_type: "kafka".into(),
            config,
            auth_ref: None,
            metric_type: MetricType::AverageValue,
            use_cached_metrics,
            fallback,
        }
    }

    fn spec(trigger_spec: TriggerSpec) -> ScaleTargetSpec {
        ScaleTargetSpec {
            scale_target_ref: ScaleTargetRef {
                api_version: "apps/v1".into(),
                kind: "Deployment".into(),
                name: "orders-worker".into(),
            },
            polling_interval: Duration::from_secs(30),
            cooldown_period: Duration::from_secs(300),
            min_replicas: 0,
            max_replicas: 10,
            idle_replicas: None,
            paused_replicas: None,
            triggers: vec![trigger_spec],
            fallback: None,
            mode: Mode::LongRunning,
        }
    }

    struct StubTargets(ScaleTargetSpec);
    #[async_trait]
    impl TargetRepository for StubTargets {
        async fn get(
            &self,
            _key: &ScaleTargetKey,
        ) -> Result<Option<(ScaleTargetSpec, ScaleTargetStatus)>, ScaleError> {
            Ok(Some((self.0.clone(), ScaleTargetStatus::default())))
        }
        async fn write_status(
            &self,
            _key: &ScaleTargetKey,
            _status: &ScaleTargetStatus,
        ) -> Result<(), ScaleError> {
            Ok(())
        }
    }

    struct NoAuths;
    #[async_trait]
    impl TriggerAuthRepository for NoAuths {
        async fn get(
            &self,
            _namespace: &str,
            _name: &str,
        ) -> Result<Option<crate::domain::models::trigger_auth::TriggerAuthSpec>, ScaleError> {
            Ok(None)
        }
    }

    struct EmptyPodTemplates;
    #[async_trait]
    impl PodTemplateReader for EmptyPodTemplates {
        async fn read_env(
            &self,
            _target_ref: &ScaleTargetRef,
            _namespace: &str,
        ) -> Result<crate::services::secret_resolution::PodEnvironment, ScaleError> {
            Ok(Default::default())
        }
    }

    struct FixedReplicas(i32);
    #[async_trait]
    impl ReplicaController for FixedReplicas {
        async fn current_replicas(
            &self,
            _target_ref: &ScaleTargetRef,
            _namespace: &str,
        ) -> Result<Option<i32>, ScaleError> {
            Ok(Some(self.0))
        }
        async fn set_replicas(
            &self,
            _target_ref: &ScaleTargetRef,
            _namespace: &str,
            _replicas: i32,
        ) -> Result<(), ScaleError> {
            Ok(())
        }
        async fn is_scalable(&self, _target_ref: &ScaleTargetRef) -> Result<bool, ScaleError> {
            Ok(true)
        }
    }

    struct FixedValueProbe {
        spec: DerivedMetricSpec,
        value: f64,
    }
    #[async_trait]
    impl Probe for FixedValueProbe {
        fn metric_spec(&self) -> &DerivedMetricSpec {
            &self.spec
        }
        async fn is_active(&self) -> Result<bool, ProbeError> {
            Ok(true)
        }
        async fn metrics_and_activity(&self) -> Result<ProbeReading, ProbeError> {
            Ok(ProbeReading {
                value: self.value,
                active: true,
            })
        }
        async fn close(&self) {}
    }

    struct FixedValueFactory(f64);
    #[async_trait]
    impl ProbeFactory for FixedValueFactory {
        async fn construct(
            &self,
            args: ProbeConstructArgs<'_>,
        ) -> Result<Box<dyn Probe>, ProbeError> {
            Ok(Box::new(FixedValueProbe {
                spec: DerivedMetricSpec {
                    metric_name: args.metric_name,
                    target_value: args.target_value,
                    activation_threshold: args.activation_threshold,
                    metric_type: args.metric_type,
                    fallback_threshold: None,
                    fallback_replicas: None,
                },
                value: self.0,
            }))
        }
    }

    struct AlwaysFailsFactory;
    #[async_trait]
    impl ProbeFactory for AlwaysFailsFactory {
        async fn construct(
            &self,
            _args: ProbeConstructArgs<'_>,
        ) -> Result<Box<dyn Probe>, ProbeError> {
            Err(ProbeError::Unreachable("stub backend down".into()))
        }
    }

    fn adapter(
        target_spec: ScaleTargetSpec,
        probe_factory: Arc<dyn ProbeFactory>,
        replicas: i32,
        metric_store: Arc<MetricStore>,
    ) -> MetricsAdapter {
        MetricsAdapter::new(
            AdapterConfig::default(),
            Arc::new(StubTargets(target_spec)),
            Arc::new(NoAuths),
            Arc::new(EmptyPodTemplates),
            Arc::new(SecretResolverRegistry::new(vec![])),
            Arc::new(ProbeRegistry::from_loaded(vec![LoadedProbeFactory {
                trigger_type: "kafka".into(),
                factory: probe_factory,
            }])),
            Arc::new(FixedReplicas(replicas)),
            metric_store,
        )
    }

    #[tokio::test]
    async fn on_demand_probe_divides_average_value_by_replicas() {
        let target_spec = spec(trigger(false, None));
        let adapter = adapter(
            target_spec,
            Arc::new(FixedValueFactory(20.0)),
            2,
            Arc::new(MetricStore::new()),
        );
        let value = adapter
            .query(&MetricQuery {
                namespace: "default".into(),
                target_name: "orders".into(),
                metric_name: "s0-kafka-orders".into(),
                label_selector: None,
            })
            .await
            .unwrap();
        assert_eq!(value, 10.0);
    }

    #[tokio::test]
    async fn unknown_target_is_not_found() {
        struct Missing;
        #[async_trait]
        impl TargetRepository for Missing {
            async fn get(
                &self,
                _key: &ScaleTargetKey,
            ) -> Result<Option<(ScaleTargetSpec, ScaleTargetStatus)>, ScaleError> {
                Ok(None)
            }
            async fn write_status(
                &self,
                _key: &ScaleTargetKey,
                _status: &ScaleTargetStatus,
            ) -> Result<(), ScaleError> {
                Ok(())
            }
        }
        let adapter = MetricsAdapter::new(
            AdapterConfig::default(),
            Arc::new(Missing),
            Arc::new(NoAuths),
            Arc::new(EmptyPodTemplates),
            Arc::new(SecretResolverRegistry::new(vec![])),
            Arc::new(ProbeRegistry::from_loaded(vec![])),
            Arc::new(FixedReplicas(1)),
            Arc::new(MetricStore::new()),
        );
        let err = adapter
            .query(&MetricQuery {
                namespace: "default".into(),
                target_name: "ghost".into(),
                metric_name: "s0-kafka-orders".into(),
                label_selector: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn stale_metric_name_is_not_found() {
        let target_spec = spec(trigger(false, None));
        let adapter = adapter(
            target_spec,
            Arc::new(FixedValueFactory(1.0)),
            1,
            Arc::new(MetricStore::new()),
        );
        let err = adapter
            .query(&MetricQuery {
                namespace: "default".into(),
                target_name: "orders".into(),
                metric_name: "s9-renamed-metric".into(),
                label_selector: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::MetricNotFound { .. }));
    }

    #[tokio::test]
    async fn fresh_cached_reading_is_reused_without_a_probe_call() {
        let target_spec = spec(trigger(true, None));
        let store = Arc::new(MetricStore::new());
        let derived = DerivedMetricSpec {
            metric_name: "s0-kafka-orders".into(),
            target_value: 10.0,
            activation_threshold: 0.0,
            metric_type: MetricType::AverageValue,
            fallback_threshold: None,
            fallback_replicas: None,
        };
        store
            .put(key(), "s0-kafka-orders".into(), 40.0, derived, Utc::now())
            .await;
        let adapter = adapter(target_spec, Arc::new(AlwaysFailsFactory), 2, store);
        let value = adapter
            .query(&MetricQuery {
                namespace: "default".into(),
                target_name: "orders".into(),
                metric_name: "s0-kafka-orders".into(),
                label_selector: None,
            })
            .await
            .unwrap();
        assert_eq!(value, 20.0);
    }

    #[tokio::test]
    async fn stale_cached_reading_falls_through_to_a_live_probe_call() {
        let target_spec = spec(trigger(true, None));
        let store = Arc::new(MetricStore::new());
        let derived = DerivedMetricSpec {
            metric_name: "s0-kafka-orders".into(),
            target_value: 10.0,
            activation_threshold: 0.0,
            metric_type: MetricType::AverageValue,
            fallback_threshold: None,
            fallback_replicas: None,
        };
        store
            .put(
                key(),
                "s0-kafka-orders".into(),
                999.0,
                derived,
                Utc::now() - chrono::Duration::hours(1),
            )
            .await;
        let adapter = adapter(target_spec, Arc::new(FixedValueFactory(4.0)), 2, store);
        let value = adapter
            .query(&MetricQuery {
                namespace: "default".into(),
                target_name: "orders".into(),
                metric_name: "s0-kafka-orders".into(),
                label_selector: None,
            })
            .await
            .unwrap();
        assert_eq!(value, 2.0);
    }

    #[tokio::test]
    async fn probe_failure_below_threshold_is_an_error() {
        let policy = FallbackPolicy {
            failure_threshold: 3,
            replicas: 5,
        };
        let target_spec = spec(trigger(false, Some(policy)));
        let adapter = adapter(
            target_spec,
            Arc::new(AlwaysFailsFactory),
            1,
            Arc::new(MetricStore::new()),
        );
        let err = adapter
            .query(&MetricQuery {
                namespace: "default".into(),
                target_name: "orders".into(),
                metric_name: "s0-kafka-orders".into(),
                label_selector: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Probe(_)));
    }

    #[tokio::test]
    async fn probe_failure_past_threshold_reports_fallback_replicas() {
        let policy = FallbackPolicy {
            failure_threshold: 2,
            replicas: 5,
        };
        let target_spec = spec(trigger(false, Some(policy)));
        let adapter = adapter(
            target_spec,
            Arc::new(AlwaysFailsFactory),
            1,
            Arc::new(MetricStore::new()),
        );
        let query = MetricQuery {
            namespace: "default".into(),
            target_name: "orders".into(),
            metric_name: "s0-kafka-orders".into(),
            label_selector: None,
        };
        assert!(adapter.query(&query).await.is_err());
        // metric_type is AverageValue with 1 replica, so fallback reports
        // replicas / replicas = 1.0 on the second, threshold-crossing call.
        let value = adapter.query(&query).await.unwrap();
        assert_eq!(value, 5.0);
    }
}
