//! Domain models
//!
//! Pure domain entities for the autoscaler: target descriptors, trigger
//! authentication, and the metrics derived from them. Framework-agnostic —
//! no `kube` or `k8s-openapi` types appear here; those live at the
//! `infrastructure::k8s` boundary and convert into these types.

pub mod config;
pub mod metric;
pub mod target;
pub mod trigger_auth;

pub use config::{AdapterConfig, OperatorConfig};
pub use metric::{derive_metric_name, DerivedMetricSpec, MetricStoreEntry};
pub use target::{
    Condition, ConditionStatus, ConditionType, FallbackPolicy, Mode, ScaleTargetKey,
    ScaleTargetRef, ScaleTargetSpec, ScaleTargetStatus, TriggerSpec,
};
pub use trigger_auth::{ParameterSource, ResolvedAuth, TriggerAuthSpec};
