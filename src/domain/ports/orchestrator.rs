//! Ports onto the orchestrator's object store: the replica-count surface
//! the probe loop mutates directly, and the derived native-autoscaler
//! surface the reconciler owns. Kept separate from `infrastructure::k8s`
//! so the reconciler and probe loop are testable without a live cluster.

use async_trait::async_trait;

use crate::domain::errors::ScaleError;
use crate::domain::models::metric::DerivedMetricSpec;
use crate::domain::models::target::{ScaleTargetKey, ScaleTargetRef, ScaleTargetSpec, ScaleTargetStatus};
use crate::domain::models::trigger_auth::TriggerAuthSpec;
use crate::services::secret_resolution::PodEnvironment;

/// Reads and writes a scale target's replica count directly — the
/// privileged zero↔one path only the probe loop uses (spec invariant 2).
#[async_trait]
pub trait ReplicaController: Send + Sync {
    /// Current replica count of the referenced object, or `None` if the
    /// object is missing (spec §4.2 step 3, `TargetNotFound`).
    async fn current_replicas(
        &self,
        target_ref: &ScaleTargetRef,
        namespace: &str,
    ) -> Result<Option<i32>, ScaleError>;

    async fn set_replicas(
        &self,
        target_ref: &ScaleTargetRef,
        namespace: &str,
        replicas: i32,
    ) -> Result<(), ScaleError>;

    /// Whether `target_ref`'s kind exposes the generic scale subresource
    /// (spec §4.2, "Scale-target kind is non-scalable" edge case).
    async fn is_scalable(&self, target_ref: &ScaleTargetRef) -> Result<bool, ScaleError>;
}

/// The derived native horizontal autoscaler the reconciler owns
/// (spec §3, "Derived: native horizontal autoscaler").
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredAutoscaler {
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub metrics: Vec<DerivedMetricSpec>,
}

/// What's currently observed for a target's derived autoscaler, including
/// whether this operator owns it (spec §4.2 step 6, `NotOwned`).
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedAutoscaler {
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub metric_names: Vec<String>,
    pub owned_by_this_operator: bool,
}

/// Creates, diffs, and deletes the derived native autoscaler object
/// (spec §4.2 steps 5-6).
#[async_trait]
pub trait AutoscalerWriter: Send + Sync {
    async fn get(&self, key: &ScaleTargetKey) -> Result<Option<ObservedAutoscaler>, ScaleError>;

    async fn apply(
        &self,
        key: &ScaleTargetKey,
        desired: &DesiredAutoscaler,
    ) -> Result<(), ScaleError>;

    async fn delete(&self, key: &ScaleTargetKey) -> Result<(), ScaleError>;
}

/// Reads target descriptors and writes their status surface (spec §6).
#[async_trait]
pub trait TargetRepository: Send + Sync {
    async fn get(
        &self,
        key: &ScaleTargetKey,
    ) -> Result<Option<(ScaleTargetSpec, ScaleTargetStatus)>, ScaleError>;

    async fn write_status(
        &self,
        key: &ScaleTargetKey,
        status: &ScaleTargetStatus,
    ) -> Result<(), ScaleError>;
}

/// Reads trigger-authentication descriptors by name (component B input).
#[async_trait]
pub trait TriggerAuthRepository: Send + Sync {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TriggerAuthSpec>, ScaleError>;
}

/// Walks a scale target's pod template for `Env`-sourced authentication
/// parameters (spec §4.2 step 4).
#[async_trait]
pub trait PodTemplateReader: Send + Sync {
    async fn read_env(
        &self,
        target_ref: &ScaleTargetRef,
        namespace: &str,
    ) -> Result<PodEnvironment, ScaleError>;
}
