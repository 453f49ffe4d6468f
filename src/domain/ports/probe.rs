//! The probe port (component A) — the boundary to the out-of-scope probe
//! catalogue, shaped like an ingestion/egress adapter pair collapsed into
//! the single contract spec §6 names.

use async_trait::async_trait;

use crate::domain::errors::ProbeError;
use crate::domain::models::metric::DerivedMetricSpec;

/// A single reading from a probe: its numeric value and whether the
/// trigger counts as "active" (spec §4.1, `GetMetricsAndActivity`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReading {
    pub value: f64,
    pub active: bool,
}

/// The runtime object that answers "is this trigger active?" and "what is
/// its metric value?" (spec GLOSSARY). Constructed by the probe factory
/// (component C) from a trigger's configuration, resolved authentication
/// map, and pod-identity hint.
#[async_trait]
pub trait Probe: Send + Sync {
    /// The metric spec this probe exposes for native-autoscaler scaling
    /// (spec §6, `GetMetricSpecForScaling`).
    fn metric_spec(&self) -> &DerivedMetricSpec;

    /// Whether the trigger is currently active (spec §4.3 step 1a).
    async fn is_active(&self) -> Result<bool, ProbeError>;

    /// The current reading and activity signal together (spec §4.3 step
    /// 1b / §4.1).
    async fn metrics_and_activity(&self) -> Result<ProbeReading, ProbeError>;

    /// Release any held resources (connections, subscriptions). Called
    /// once by the probe loop on stop (spec §4.3, "owns all probe handles
    /// and closes them on stop").
    async fn close(&self);
}

/// The arguments needed to construct one probe instance, gathered by the
/// reconciler before it calls the factory (component C, spec §6
/// "construct").
pub struct ProbeConstructArgs<'a> {
    pub config: &'a serde_json::Map<String, serde_json::Value>,
    pub resolved_auth: &'a crate::domain::models::trigger_auth::ResolvedAuth,
    pub pod_identity_hint: Option<&'a str>,
    pub metric_name: String,
    pub metric_type: crate::domain::models::metric::MetricType,
    pub activation_threshold: f64,
    pub target_value: f64,
}

/// Constructs probes of one specific trigger type. A single registration
/// per type is the entirety of what's needed to teach the system a new
/// probe (spec §9, "adding a new probe type is a single registration,
/// never a core edit").
#[async_trait]
pub trait ProbeFactory: Send + Sync {
    async fn construct(&self, args: ProbeConstructArgs<'_>) -> Result<Box<dyn Probe>, ProbeError>;
}
