//! Application services for the autoscaler: the pieces that sit between
//! the domain model and the Kubernetes-facing infrastructure layer.

pub mod failure_tracking;
pub mod job_mode;
pub mod metric_store;
pub mod metrics_adapter;
pub mod probe_loop;
pub mod probe_registry;
pub mod reconciler;
pub mod secret_resolution;
pub mod target_watcher;

pub use failure_tracking::FailureTracker;
pub use job_mode::{JobModeController, WorkItem};
pub use metric_store::{MetricPutEvent, MetricStore};
pub use metrics_adapter::{AdapterError, MetricQuery, MetricsAdapter};
pub use probe_loop::{fallback_should_apply, LoadedProbe, ProbeLoop, ProbeLoopConfig, TickObservation};
pub use probe_registry::{LoadedProbeFactory, ProbeRegistry};
pub use reconciler::{Reconciler, RequeueAction};
pub use secret_resolution::{PodEnvironment, SecretResolverRegistry};
pub use target_watcher::TargetWatcherService;
