//! The probe loop (component F, spec §4.3).
//!
//! An `Arc<AtomicBool>` running flag, a `tokio::spawn`'d loop that
//! selects between a fixed-interval tick and an early wake (here, a
//! "poke" — spec §9), and a per-tick snapshot-then-mutate-then-publish
//! sequence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};

use crate::domain::errors::ScaleError;
use crate::domain::models::metric::DerivedMetricSpec;
use crate::domain::models::target::{FallbackPolicy, Mode, ScaleTargetKey, ScaleTargetRef};
use crate::domain::ports::orchestrator::ReplicaController;
use crate::domain::ports::probe::Probe;
use crate::services::failure_tracking::FailureTracker;
use crate::services::job_mode::JobModeController;
use crate::services::metric_store::MetricStore;

/// One trigger's constructed probe plus the pieces of its spec the loop
/// needs outside the probe's own `metric_spec()` (spec §4.3 step 2).
pub struct LoadedProbe {
    pub trigger_index: usize,
    pub metric_name: String,
    pub probe: Box<dyn Probe>,
    pub fallback: Option<FallbackPolicy>,
}

/// Static configuration for one target's probe loop, fixed for the
/// loop's lifetime — any change here means stop-and-respawn (spec §4.2
/// step 7).
pub struct ProbeLoopConfig {
    pub key: ScaleTargetKey,
    pub scale_target_ref: ScaleTargetRef,
    pub polling_interval: Duration,
    pub cooldown_period: Duration,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub idle_replicas: Option<i32>,
    pub probe_call_timeout: Duration,
    /// Long-running targets drive replicas directly; run-to-completion
    /// targets drive a work-item pool instead (spec §4.6).
    pub mode: Mode,
}

/// Mutable state carried between ticks (spec §3, "Runtime: probe loop
/// state").
#[derive(Debug, Clone)]
struct LoopState {
    last_active: Option<DateTime<Utc>>,
    failures: FailureTracker,
    /// Last successful activity reading per trigger index, retained
    /// across failing ticks below the trigger's fallback threshold
    /// (spec §4.3 step 1, "last-known-good retained").
    last_known_active: HashMap<usize, bool>,
}

impl Default for LoopState {
    fn default() -> Self {
        Self {
            last_active: None,
            failures: FailureTracker::new(),
            last_known_active: HashMap::new(),
        }
    }
}

/// Emitted once per tick for external telemetry (spec §4.3 step 5).
/// Telemetry *exporters* are out of scope; this is logged via `tracing`.
#[derive(Debug, Clone)]
pub struct TickObservation {
    pub key: ScaleTargetKey,
    pub aggregate_active: bool,
    pub replicas_before: i32,
    pub replicas_after: i32,
}

/// One target's probe loop. Owns all its probes exclusively and closes
/// them on stop (spec §4.3).
pub struct ProbeLoop {
    config: ProbeLoopConfig,
    probes: Vec<LoadedProbe>,
    metric_store: Arc<MetricStore>,
    replica_controller: Arc<dyn ReplicaController>,
    job_mode: Option<Arc<JobModeController>>,
    state: RwLock<LoopState>,
    running: Arc<AtomicBool>,
    poke_tx: mpsc::Sender<()>,
    poke_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl ProbeLoop {
    #[must_use]
    pub fn new(
        config: ProbeLoopConfig,
        probes: Vec<LoadedProbe>,
        metric_store: Arc<MetricStore>,
        replica_controller: Arc<dyn ReplicaController>,
        job_mode: Option<Arc<JobModeController>>,
    ) -> Arc<Self> {
        let (poke_tx, poke_rx) = mpsc::channel(1);
        Arc::new(Self {
            config,
            probes,
            metric_store,
            replica_controller,
            job_mode,
            state: RwLock::new(LoopState::default()),
            running: Arc::new(AtomicBool::new(false)),
            poke_tx,
            poke_rx: tokio::sync::Mutex::new(poke_rx),
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// A store-read observer saw demand at replicas=0; wake the loop
    /// early instead of waiting out the rest of the polling interval
    /// (spec §9, "a `poke` is issued when a store-read observer sees
    /// demand at replicas=0").
    pub fn poke(&self) {
        let _ = self.poke_tx.try_send(());
    }

    /// Spawn the tick loop. Returns its `JoinHandle`.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let this = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.polling_interval);
            // A pending tick observes its stop flag before starting work
            // (spec §4.3, "Cancellation").
            let mut poke_rx = this.poke_rx.lock().await;
            while this.running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = interval.tick() => {}
                    Some(()) = poke_rx.recv() => {}
                    else => break,
                }
                if !this.running.load(Ordering::SeqCst) {
                    break;
                }
                // If a previous tick is still logically in flight this
                // would be skipped; since `run_tick` is awaited inline on
                // this single task, overlap cannot happen by
                // construction (spec §5, "probes are never queued").
                this.run_tick().await;
            }
        })
    }

    /// Stop the loop and release every probe's resources (spec §4.3,
    /// "owns all probe handles and closes them on stop").
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        for loaded in &self.probes {
            loaded.probe.close().await;
        }
    }

    async fn run_tick(&self) {
        let now = Utc::now();
        let mut readings: HashMap<String, (f64, DerivedMetricSpec)> = HashMap::new();
        let mut any_active = false;

        let mut state = self.state.write().await;
        for loaded in &self.probes {
            let result = tokio::time::timeout(
                self.config.probe_call_timeout,
                loaded.probe.metrics_and_activity(),
            )
            .await;

            match result {
                Ok(Ok(reading)) => {
                    state.failures.record_success(loaded.trigger_index);
                    state.last_known_active.insert(loaded.trigger_index, reading.active);
                    readings.insert(
                        loaded.metric_name.clone(),
                        (reading.value, loaded.probe.metric_spec().clone()),
                    );
                    if reading.active {
                        any_active = true;
                    }
                }
                Ok(Err(_)) | Err(_) => {
                    // Timeout and probe error are both counted the same
                    // way (spec §4.3, "its error is treated like any
                    // other failure").
                    let consecutive = state.failures.record_failure(loaded.trigger_index);
                    let contributes_active = if fallback_should_apply(loaded.fallback.as_ref(), consecutive) {
                        false
                    } else {
                        state
                            .last_known_active
                            .get(&loaded.trigger_index)
                            .copied()
                            .unwrap_or(false)
                    };
                    if contributes_active {
                        any_active = true;
                    }
                }
            }
        }

        if any_active {
            state.last_active = Some(now);
        }

        drop(state);

        let queue_depth: f64 = readings.values().map(|(value, _)| *value).sum();
        let activation_threshold = readings
            .values()
            .map(|(_, spec)| spec.activation_threshold)
            .fold(0.0_f64, f64::max);

        for (metric_name, (value, spec)) in readings {
            self.metric_store
                .put(self.config.key.clone(), metric_name, value, spec, now)
                .await;
        }

        match self.config.mode {
            Mode::LongRunning => self.drive_replica_decision(any_active, now).await,
            Mode::RunToCompletion => {
                self.drive_job_mode_decision(queue_depth, activation_threshold).await;
            }
        }
    }

    /// Run-to-completion targets have no derived HPA and no zero↔one
    /// replica decision; the probe loop only ever feeds the tick's
    /// aggregated queue-depth reading into the work-item pool (spec §4.6).
    async fn drive_job_mode_decision(&self, queue_depth: f64, activation_threshold: f64) {
        let Some(job_mode) = self.job_mode.as_ref() else {
            tracing::warn!(
                target: "probe_loop",
                namespace = %self.config.key.namespace,
                name = %self.config.key.name,
                "run-to-completion target has no job mode controller attached"
            );
            return;
        };

        let delta = job_mode
            .reconcile(
                &self.config.key,
                queue_depth,
                activation_threshold,
                self.config.min_replicas,
                self.config.max_replicas,
            )
            .await;

        tracing::info!(
            target: "probe_loop",
            namespace = %self.config.key.namespace,
            name = %self.config.key.name,
            queue_depth,
            created = delta.created.len(),
            pool_size = delta.current_count,
            "job mode pool reconciled"
        );
    }

    async fn drive_replica_decision(&self, aggregate_active: bool, now: DateTime<Utc>) {
        let current = match self
            .replica_controller
            .current_replicas(&self.config.scale_target_ref, &self.config.key.namespace)
            .await
        {
            Ok(Some(replicas)) => replicas,
            _ => return,
        };

        let state = self.state.read().await;
        let last_active = state.last_active;
        drop(state);

        let desired = if current == 0 && aggregate_active {
            Some(std::cmp::max(1, self.config.min_replicas))
        } else if current > 0 && !aggregate_active && self.config.min_replicas == 0 {
            let cooldown_elapsed = last_active.is_none_or(|last| {
                now.signed_duration_since(last)
                    >= chrono::Duration::from_std(self.config.cooldown_period)
                        .unwrap_or(chrono::TimeDelta::MAX)
            });
            if cooldown_elapsed {
                Some(self.config.idle_replicas.unwrap_or(0))
            } else if current < self.config.min_replicas {
                Some(self.config.min_replicas)
            } else {
                None
            }
        } else if current < self.config.min_replicas {
            Some(self.config.min_replicas)
        } else {
            None
        };

        let mut replicas_after = current;
        if let Some(desired) = desired {
            if desired != current {
                if self
                    .replica_controller
                    .set_replicas(&self.config.scale_target_ref, &self.config.key.namespace, desired)
                    .await
                    .is_ok()
                {
                    replicas_after = desired;
                }
            }
        }

        let observation = TickObservation {
            key: self.config.key.clone(),
            aggregate_active,
            replicas_before: current,
            replicas_after,
        };
        tracing::info!(
            target: "probe_loop",
            namespace = %observation.key.namespace,
            name = %observation.key.name,
            aggregate_active = observation.aggregate_active,
            replicas_before = observation.replicas_before,
            replicas_after = observation.replicas_after,
            "probe loop tick observed"
        );
    }
}

/// Validates whether a trigger's fallback policy should contribute its
/// fallback value rather than last-known-good (spec §4.8, §4.3 step 2).
#[must_use]
pub fn fallback_should_apply(fallback: Option<&FallbackPolicy>, consecutive_failures: u32) -> bool {
    fallback.is_some_and(|f| consecutive_failures >= f.failure_threshold)
}
