//! End-to-end scenarios driving a real `Reconciler` against in-memory
//! stub ports, the same stub pattern used in the unit tests of
//! `services::metrics_adapter` and `services::probe_loop`, but wired
//! together so a probe loop actually runs and mutates replica state.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use scaletide::domain::errors::{ProbeError, ScaleError};
use scaletide::domain::models::config::OperatorConfig;
use scaletide::domain::models::metric::{DerivedMetricSpec, MetricType};
use scaletide::domain::models::target::{
    ConditionStatus, ConditionType, Mode, ScaleTargetKey, ScaleTargetRef, ScaleTargetSpec,
    ScaleTargetStatus, TriggerSpec,
};
use scaletide::domain::ports::orchestrator::{
    AutoscalerWriter, DesiredAutoscaler, ObservedAutoscaler, PodTemplateReader, ReplicaController,
    TargetRepository, TriggerAuthRepository,
};
use scaletide::domain::ports::probe::{Probe, ProbeConstructArgs, ProbeFactory, ProbeReading};
use scaletide::services::job_mode::JobModeController;
use scaletide::services::metric_store::MetricStore;
use scaletide::services::probe_registry::{LoadedProbeFactory, ProbeRegistry};
use scaletide::services::reconciler::Reconciler;
use scaletide::services::secret_resolution::SecretResolverRegistry;

fn key() -> ScaleTargetKey {
    ScaleTargetKey {
        namespace: "default".into(),
        name: "orders".into(),
    }
}

fn scale_target_ref() -> ScaleTargetRef {
    ScaleTargetRef {
        api_version: "apps/v1".into(),
        kind: "Deployment".into(),
        name: "orders-worker".into(),
    }
}

fn trigger() -> TriggerSpec {
    let mut config = serde_json::Map::new();
    config.insert("queueName".into(), "orders".into());
    config.insert("targetValue".into(), 10.0.into());
    config.insert("activationThreshold".into(), 1.0.into());
    TriggerSpec {
        trigger_type: "controllable".into(),
        config,
        auth_ref: None,
        metric_type: MetricType::AverageValue,
        use_cached_metrics: false,
        fallback: None,
    }
}

fn base_spec(polling_interval: Duration, cooldown_period: Duration) -> ScaleTargetSpec {
    ScaleTargetSpec {
        scale_target_ref: scale_target_ref(),
        polling_interval,
        cooldown_period,
        min_replicas: 0,
        max_replicas: 10,
        idle_replicas: None,
        paused_replicas: None,
        triggers: vec![trigger()],
        fallback: None,
        mode: Mode::LongRunning,
    }
}

/// A probe whose activity and value can be flipped mid-test, to drive a
/// running probe loop through a cold-start-then-cooldown sequence
/// without needing to reconstruct it.
struct ControllableProbe {
    spec: DerivedMetricSpec,
    active: Arc<AtomicBool>,
    value_bits: Arc<AtomicU64>,
}

#[async_trait]
impl Probe for ControllableProbe {
    fn metric_spec(&self) -> &DerivedMetricSpec {
        &self.spec
    }
    async fn is_active(&self) -> Result<bool, ProbeError> {
        Ok(self.active.load(Ordering::SeqCst))
    }
    async fn metrics_and_activity(&self) -> Result<ProbeReading, ProbeError> {
        Ok(ProbeReading {
            value: f64::from_bits(self.value_bits.load(Ordering::SeqCst)),
            active: self.active.load(Ordering::SeqCst),
        })
    }
    async fn close(&self) {}
}

struct ControllableFactory {
    active: Arc<AtomicBool>,
    value_bits: Arc<AtomicU64>,
}

#[async_trait]
impl ProbeFactory for ControllableFactory {
    async fn construct(&self, args: ProbeConstructArgs<'_>) -> Result<Box<dyn Probe>, ProbeError> {
        Ok(Box::new(ControllableProbe {
            spec: DerivedMetricSpec {
                metric_name: args.metric_name,
                target_value: args.target_value,
                activation_threshold: args.activation_threshold,
                metric_type: args.metric_type,
                fallback_threshold: None,
                fallback_replicas: None,
            },
            active: self.active.clone(),
            value_bits: self.value_bits.clone(),
        }))
    }
}

/// A `TargetRepository` backed by a swappable slot, so a test can
/// simulate deletion by clearing it mid-run, and records every status
/// write for inspection.
struct StubTargets {
    state: RwLock<Option<(ScaleTargetSpec, ScaleTargetStatus)>>,
    statuses_written: RwLock<Vec<ScaleTargetStatus>>,
    /// Artificial delay inside `get`, to widen the window for a
    /// concurrency test to observe an overlapping reconcile pass.
    get_delay: Duration,
    in_get: AtomicUsize,
    max_concurrent_gets: AtomicUsize,
}

impl StubTargets {
    fn new(spec: ScaleTargetSpec) -> Self {
        Self::new_with_get_delay(spec, Duration::from_secs(0))
    }

    fn new_with_get_delay(spec: ScaleTargetSpec, get_delay: Duration) -> Self {
        Self {
            state: RwLock::new(Some((spec, ScaleTargetStatus::default()))),
            statuses_written: RwLock::new(Vec::new()),
            get_delay,
            in_get: AtomicUsize::new(0),
            max_concurrent_gets: AtomicUsize::new(0),
        }
    }

    async fn delete(&self) {
        *self.state.write().await = None;
    }

    async fn last_status(&self) -> ScaleTargetStatus {
        self.statuses_written
            .read()
            .await
            .last()
            .cloned()
            .expect("at least one status write")
    }
}

#[async_trait]
impl TargetRepository for StubTargets {
    async fn get(
        &self,
        _key: &ScaleTargetKey,
    ) -> Result<Option<(ScaleTargetSpec, ScaleTargetStatus)>, ScaleError> {
        let concurrent = self.in_get.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_gets.fetch_max(concurrent, Ordering::SeqCst);
        if !self.get_delay.is_zero() {
            tokio::time::sleep(self.get_delay).await;
        }
        let result = Ok(self.state.read().await.clone());
        self.in_get.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn write_status(
        &self,
        _key: &ScaleTargetKey,
        status: &ScaleTargetStatus,
    ) -> Result<(), ScaleError> {
        self.statuses_written.write().await.push(status.clone());
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
    ) -> Result<Option<scaletide::domain::models::trigger_auth::TriggerAuthSpec>, ScaleError> {
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
    ) -> Result<scaletide::services::secret_resolution::PodEnvironment, ScaleError> {
        Ok(Default::default())
    }
}

struct FakeReplicaController {
    replicas: AtomicI32,
}

#[async_trait]
impl ReplicaController for FakeReplicaController {
    async fn current_replicas(
        &self,
        _target_ref: &ScaleTargetRef,
        _namespace: &str,
    ) -> Result<Option<i32>, ScaleError> {
        Ok(Some(self.replicas.load(Ordering::SeqCst)))
    }
    async fn set_replicas(
        &self,
        _target_ref: &ScaleTargetRef,
        _namespace: &str,
        replicas: i32,
    ) -> Result<(), ScaleError> {
        self.replicas.store(replicas, Ordering::SeqCst);
        Ok(())
    }
    async fn is_scalable(&self, _target_ref: &ScaleTargetRef) -> Result<bool, ScaleError> {
        Ok(true)
    }
}

/// Records every `apply`/`delete` call and plays back the last applied
/// state as `get`'s observed autoscaler, so the reconciler's idempotent-
/// write check can be exercised against a real round trip.
struct RecordingAutoscalerWriter {
    observed: RwLock<Option<ObservedAutoscaler>>,
    apply_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl RecordingAutoscalerWriter {
    fn new() -> Self {
        Self {
            observed: RwLock::new(None),
            apply_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AutoscalerWriter for RecordingAutoscalerWriter {
    async fn get(&self, _key: &ScaleTargetKey) -> Result<Option<ObservedAutoscaler>, ScaleError> {
        Ok(self.observed.read().await.clone())
    }
    async fn apply(
        &self,
        _key: &ScaleTargetKey,
        desired: &DesiredAutoscaler,
    ) -> Result<(), ScaleError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        self.observed.write().await.replace(ObservedAutoscaler {
            min_replicas: desired.min_replicas,
            max_replicas: desired.max_replicas,
            metric_names: desired.metrics.iter().map(|m| m.metric_name.clone()).collect(),
            owned_by_this_operator: true,
        });
        Ok(())
    }
    async fn delete(&self, _key: &ScaleTargetKey) -> Result<(), ScaleError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.observed.write().await.take();
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn build_reconciler(
    targets: Arc<StubTargets>,
    autoscaler_writer: Arc<RecordingAutoscalerWriter>,
    replica_controller: Arc<FakeReplicaController>,
    active: Arc<AtomicBool>,
    value_bits: Arc<AtomicU64>,
) -> Reconciler {
    Reconciler::new(
        OperatorConfig::default(),
        targets,
        Arc::new(NoAuths),
        Arc::new(EmptyPodTemplates),
        Arc::new(SecretResolverRegistry::new(vec![])),
        Arc::new(ProbeRegistry::from_loaded(vec![LoadedProbeFactory {
            trigger_type: "controllable".into(),
            factory: Arc::new(ControllableFactory { active, value_bits }),
        }])),
        autoscaler_writer,
        replica_controller,
        Arc::new(MetricStore::new()),
        Arc::new(JobModeController::new()),
    )
}

#[tokio::test]
async fn cold_start_derives_autoscaler_and_scales_zero_to_one() {
    let spec = base_spec(Duration::from_millis(10), Duration::from_secs(60));
    let targets = Arc::new(StubTargets::new(spec));
    let autoscaler_writer = Arc::new(RecordingAutoscalerWriter::new());
    let replica_controller = Arc::new(FakeReplicaController {
        replicas: AtomicI32::new(0),
    });
    let active = Arc::new(AtomicBool::new(true));
    let value_bits = Arc::new(AtomicU64::new(5.0_f64.to_bits()));

    let reconciler = build_reconciler(
        targets.clone(),
        autoscaler_writer.clone(),
        replica_controller.clone(),
        active,
        value_bits,
    );

    reconciler.reconcile(&key()).await.unwrap();

    // min_replicas=0 derives an active floor of 1 on the autoscaler
    // (spec §4.2 step 5), independent of whatever the probe loop does.
    let observed = autoscaler_writer.observed.read().await.clone().unwrap();
    assert_eq!(observed.min_replicas, 1);
    assert_eq!(observed.max_replicas, 10);
    assert_eq!(autoscaler_writer.apply_calls.load(Ordering::SeqCst), 1);

    // Give the spawned probe loop a few ticks to see activity and flip
    // replicas zero to one (spec invariant 2).
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(replica_controller.replicas.load(Ordering::SeqCst), 1);

    let status = targets.last_status().await;
    let ready = status
        .conditions
        .iter()
        .find(|c| c.condition_type == ConditionType::Ready)
        .unwrap();
    assert_eq!(ready.status, ConditionStatus::True);
}

#[tokio::test]
async fn second_reconcile_with_unchanged_spec_is_idempotent() {
    let spec = base_spec(Duration::from_secs(30), Duration::from_secs(300));
    let targets = Arc::new(StubTargets::new(spec));
    let autoscaler_writer = Arc::new(RecordingAutoscalerWriter::new());
    let replica_controller = Arc::new(FakeReplicaController {
        replicas: AtomicI32::new(1),
    });
    let active = Arc::new(AtomicBool::new(true));
    let value_bits = Arc::new(AtomicU64::new(5.0_f64.to_bits()));

    let reconciler = build_reconciler(
        targets,
        autoscaler_writer.clone(),
        replica_controller,
        active,
        value_bits,
    );

    reconciler.reconcile(&key()).await.unwrap();
    reconciler.reconcile(&key()).await.unwrap();

    // Same spec, same observed state on the second pass: no second write
    // (spec §8, "zero orchestrator writes on the second reconcile pass").
    assert_eq!(autoscaler_writer.apply_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scales_to_zero_after_activity_stops_and_cooldown_elapses() {
    let spec = base_spec(Duration::from_millis(10), Duration::from_millis(30));
    let targets = Arc::new(StubTargets::new(spec));
    let autoscaler_writer = Arc::new(RecordingAutoscalerWriter::new());
    let replica_controller = Arc::new(FakeReplicaController {
        replicas: AtomicI32::new(0),
    });
    let active = Arc::new(AtomicBool::new(true));
    let value_bits = Arc::new(AtomicU64::new(5.0_f64.to_bits()));

    let reconciler = build_reconciler(
        targets,
        autoscaler_writer,
        replica_controller.clone(),
        active.clone(),
        value_bits,
    );

    reconciler.reconcile(&key()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(replica_controller.replicas.load(Ordering::SeqCst), 1);

    // Activity stops; once the cooldown period has elapsed with no
    // activity the loop scales back to zero (spec §4.3, zero↔one).
    active.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(replica_controller.replicas.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn paused_target_pins_replicas_and_skips_the_probe_loop() {
    let mut spec = base_spec(Duration::from_millis(10), Duration::from_secs(60));
    spec.paused_replicas = Some(3);
    let targets = Arc::new(StubTargets::new(spec));
    let autoscaler_writer = Arc::new(RecordingAutoscalerWriter::new());
    let replica_controller = Arc::new(FakeReplicaController {
        replicas: AtomicI32::new(0),
    });
    let active = Arc::new(AtomicBool::new(true));
    let value_bits = Arc::new(AtomicU64::new(5.0_f64.to_bits()));

    let reconciler = build_reconciler(
        targets.clone(),
        autoscaler_writer.clone(),
        replica_controller.clone(),
        active,
        value_bits,
    );

    reconciler.reconcile(&key()).await.unwrap();

    let observed = autoscaler_writer.observed.read().await.clone().unwrap();
    assert_eq!(observed.min_replicas, 3);
    assert_eq!(observed.max_replicas, 3);

    let status = targets.last_status().await;
    let paused = status
        .conditions
        .iter()
        .find(|c| c.condition_type == ConditionType::Paused)
        .unwrap();
    assert_eq!(paused.status, ConditionStatus::True);

    // No probe loop means nothing ever touches replicas, even though the
    // probe is configured active.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(replica_controller.replicas.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deleting_the_target_tears_down_the_loop_and_the_derived_autoscaler() {
    let spec = base_spec(Duration::from_millis(10), Duration::from_secs(60));
    let targets = Arc::new(StubTargets::new(spec));
    let autoscaler_writer = Arc::new(RecordingAutoscalerWriter::new());
    let replica_controller = Arc::new(FakeReplicaController {
        replicas: AtomicI32::new(0),
    });
    let active = Arc::new(AtomicBool::new(true));
    let value_bits = Arc::new(AtomicU64::new(5.0_f64.to_bits()));

    let reconciler = build_reconciler(
        targets.clone(),
        autoscaler_writer.clone(),
        replica_controller.clone(),
        active,
        value_bits,
    );

    reconciler.reconcile(&key()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(replica_controller.replicas.load(Ordering::SeqCst), 1);

    targets.delete().await;
    reconciler.reconcile(&key()).await.unwrap();

    assert_eq!(autoscaler_writer.delete_calls.load(Ordering::SeqCst), 1);
    assert!(autoscaler_writer.observed.read().await.is_none());

    // The loop is stopped; replicas stay at whatever they were left at
    // and are never touched again even after another full poll interval.
    let replicas_at_teardown = replica_controller.replicas.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        replica_controller.replicas.load(Ordering::SeqCst),
        replicas_at_teardown
    );
}

#[tokio::test]
async fn concurrent_reconciles_of_the_same_key_never_overlap() {
    let spec = base_spec(Duration::from_secs(30), Duration::from_secs(300));
    let targets = Arc::new(StubTargets::new_with_get_delay(spec, Duration::from_millis(40)));
    let autoscaler_writer = Arc::new(RecordingAutoscalerWriter::new());
    let replica_controller = Arc::new(FakeReplicaController {
        replicas: AtomicI32::new(0),
    });
    let active = Arc::new(AtomicBool::new(true));
    let value_bits = Arc::new(AtomicU64::new(5.0_f64.to_bits()));

    let reconciler = Arc::new(build_reconciler(
        targets.clone(),
        autoscaler_writer,
        replica_controller,
        active,
        value_bits,
    ));

    // Two reconciles for the same key dispatched at once, the way the
    // watcher's dispatch loop would spawn one per dequeued key (spec
    // invariant 1, "reconciliation is serialized per target key"). Both
    // must read-then-write without ever being inside the pass together.
    let first = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.reconcile(&key()).await }
    });
    let second = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.reconcile(&key()).await }
    });

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(targets.max_concurrent_gets.load(Ordering::SeqCst), 1);
}
