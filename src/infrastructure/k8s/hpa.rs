//! Adapters onto the cluster: replica-count control via the generic
//! `scale` subresource (spec invariant 2), the derived
//! `HorizontalPodAutoscaler` (spec §3), and target/trigger-auth/pod-env
//! reads (spec §4.2 steps 3-4).

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v1::Scale;
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec, MetricSpec,
    MetricTarget, ObjectMetricSource,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, Patch, PatchParams};
use kube::core::{DynamicObject, GroupVersionKind, ObjectMeta};
use kube::discovery::pinned_kind;
use kube::{Client, ResourceExt};

use crate::domain::errors::ScaleError;
use crate::domain::models::target::{ScaleTargetKey, ScaleTargetRef, ScaleTargetSpec, ScaleTargetStatus};
use crate::domain::models::trigger_auth::TriggerAuthSpec;
use crate::domain::ports::orchestrator::{
    AutoscalerWriter, DesiredAutoscaler, ObservedAutoscaler, PodTemplateReader, ReplicaController,
    TargetRepository, TriggerAuthRepository,
};
use crate::infrastructure::k8s::crd::{read_paused_replicas_annotation, ScaledTarget, ScaledTargetAuth};
use crate::services::secret_resolution::PodEnvironment;

const FIELD_MANAGER: &str = "scaletide";
const OWNED_BY_LABEL: &str = "scaletide.io/managed-by";

fn gvk_of(target_ref: &ScaleTargetRef) -> Result<GroupVersionKind, ScaleError> {
    let (group, version) = target_ref
        .api_version
        .split_once('/')
        .map_or(("", target_ref.api_version.as_str()), |(g, v)| (g, v));
    Ok(GroupVersionKind::gvk(group, version, &target_ref.kind))
}

/// Controls replica counts through the generic `/scale` subresource, so
/// one implementation serves Deployments, StatefulSets, and any other
/// kind that exposes it (spec §4.2 step 3, "Scale-target kind is
/// non-scalable" edge case).
pub struct ScaleSubresourceController {
    client: Client,
}

impl ScaleSubresourceController {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    async fn scale_api(
        &self,
        target_ref: &ScaleTargetRef,
        namespace: &str,
    ) -> Result<Api<DynamicObject>, ScaleError> {
        let gvk = gvk_of(target_ref)?;
        let (ar, _caps) = pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| ScaleError::Kubernetes(format!("failed to discover {gvk:?}: {e}")))?;
        Ok(Api::namespaced_with(self.client.clone(), namespace, &ar))
    }
}

#[async_trait]
impl ReplicaController for ScaleSubresourceController {
    async fn current_replicas(
        &self,
        target_ref: &ScaleTargetRef,
        namespace: &str,
    ) -> Result<Option<i32>, ScaleError> {
        let api = self.scale_api(target_ref, namespace).await?;
        match api.get_scale(&target_ref.name).await {
            Ok(scale) => Ok(scale.spec.and_then(|s| s.replicas).or(Some(0))),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
            Err(e) => Err(ScaleError::Kubernetes(format!(
                "failed to read scale for {}/{}: {e}",
                namespace, target_ref.name
            ))),
        }
    }

    async fn set_replicas(
        &self,
        target_ref: &ScaleTargetRef,
        namespace: &str,
        replicas: i32,
    ) -> Result<(), ScaleError> {
        let api = self.scale_api(target_ref, namespace).await?;
        let patch = Scale {
            metadata: ObjectMeta {
                name: Some(target_ref.name.clone()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(k8s_openapi::api::autoscaling::v1::ScaleSpec {
                replicas: Some(replicas),
            }),
            ..Default::default()
        };
        api.patch_scale(
            &target_ref.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Apply(&patch),
        )
        .await
        .map_err(|e| {
            ScaleError::Kubernetes(format!(
                "failed to set replicas for {}/{}: {e}",
                namespace, target_ref.name
            ))
        })?;
        Ok(())
    }

    async fn is_scalable(&self, target_ref: &ScaleTargetRef) -> Result<bool, ScaleError> {
        let gvk = gvk_of(target_ref)?;
        match pinned_kind(&self.client, &gvk).await {
            Ok((_ar, caps)) => Ok(caps.subresources.iter().any(|r| r.plural == "scale")),
            Err(e) => Err(ScaleError::Kubernetes(format!(
                "failed to discover {gvk:?}: {e}"
            ))),
        }
    }
}

/// Creates, diffs, and deletes the derived `HorizontalPodAutoscaler`
/// (spec §4.2 steps 5-6, §3 "Derived: native horizontal autoscaler").
pub struct HpaWriter {
    client: Client,
}

impl HpaWriter {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<HorizontalPodAutoscaler> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn derived_name(key: &ScaleTargetKey) -> String {
        format!("{}-scaletide", key.name)
    }
}

#[async_trait]
impl AutoscalerWriter for HpaWriter {
    async fn get(&self, key: &ScaleTargetKey) -> Result<Option<ObservedAutoscaler>, ScaleError> {
        let api = self.api(&key.namespace);
        match api.get(&Self::derived_name(key)).await {
            Ok(hpa) => {
                let owned = hpa
                    .labels()
                    .get(OWNED_BY_LABEL)
                    .is_some_and(|v| v == "scaletide");
                let spec = hpa.spec.unwrap_or_default();
                Ok(Some(ObservedAutoscaler {
                    min_replicas: spec.min_replicas.unwrap_or(1),
                    max_replicas: spec.max_replicas,
                    metric_names: spec
                        .metrics
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|m| m.object.map(|o| o.metric.name))
                        .collect(),
                    owned_by_this_operator: owned,
                }))
            }
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
            Err(e) => Err(ScaleError::Kubernetes(format!(
                "failed to read HPA for {key}: {e}"
            ))),
        }
    }

    async fn apply(&self, key: &ScaleTargetKey, desired: &DesiredAutoscaler) -> Result<(), ScaleError> {
        let api = self.api(&key.namespace);
        let name = Self::derived_name(key);

        let metrics = desired
            .metrics
            .iter()
            .map(|m| MetricSpec {
                type_: "Object".to_string(),
                object: Some(ObjectMetricSource {
                    described_object: CrossVersionObjectReference {
                        api_version: Some("scaletide.io/v1".to_string()),
                        kind: "ScaledTarget".to_string(),
                        name: key.name.clone(),
                    },
                    metric: k8s_openapi::api::autoscaling::v2::MetricIdentifier {
                        name: m.metric_name.clone(),
                        selector: None,
                    },
                    target: MetricTarget {
                        type_: metric_target_type(m.metric_type).to_string(),
                        value: matches!(m.metric_type, crate::domain::models::metric::MetricType::Value)
                            .then(|| Quantity(m.target_value.to_string())),
                        average_value: matches!(
                            m.metric_type,
                            crate::domain::models::metric::MetricType::AverageValue
                        )
                        .then(|| Quantity(m.target_value.to_string())),
                        average_utilization: None,
                    },
                }),
                ..Default::default()
            })
            .collect();

        let mut labels = std::collections::BTreeMap::new();
        labels.insert(OWNED_BY_LABEL.to_string(), "scaletide".to_string());

        let hpa = HorizontalPodAutoscaler {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(key.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(HorizontalPodAutoscalerSpec {
                scale_target_ref: CrossVersionObjectReference {
                    api_version: Some("scaletide.io/v1".to_string()),
                    kind: "ScaledTarget".to_string(),
                    name: key.name.clone(),
                },
                min_replicas: Some(desired.min_replicas),
                max_replicas: desired.max_replicas,
                metrics: Some(metrics),
                ..Default::default()
            }),
            ..Default::default()
        };

        api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&hpa))
            .await
            .map_err(|e| ScaleError::Kubernetes(format!("failed to apply HPA for {key}: {e}")))?;
        Ok(())
    }

    async fn delete(&self, key: &ScaleTargetKey) -> Result<(), ScaleError> {
        let api = self.api(&key.namespace);
        match api.delete(&Self::derived_name(key), &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
            Err(e) => Err(ScaleError::Kubernetes(format!(
                "failed to delete HPA for {key}: {e}"
            ))),
        }
    }
}

const fn metric_target_type(metric_type: crate::domain::models::metric::MetricType) -> &'static str {
    match metric_type {
        crate::domain::models::metric::MetricType::Value => "Value",
        crate::domain::models::metric::MetricType::AverageValue => "AverageValue",
    }
}

/// Reads `ScaledTarget` descriptors and writes their status subresource
/// (spec §6).
pub struct ScaledTargetRepository {
    client: Client,
    default_polling_interval_secs: u64,
    default_cooldown_secs: u64,
}

impl ScaledTargetRepository {
    #[must_use]
    pub const fn new(client: Client, default_polling_interval_secs: u64, default_cooldown_secs: u64) -> Self {
        Self {
            client,
            default_polling_interval_secs,
            default_cooldown_secs,
        }
    }

    fn api(&self, namespace: &str) -> Api<ScaledTarget> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl TargetRepository for ScaledTargetRepository {
    async fn get(
        &self,
        key: &ScaleTargetKey,
    ) -> Result<Option<(ScaleTargetSpec, ScaleTargetStatus)>, ScaleError> {
        let api = self.api(&key.namespace);
        match api.get(&key.name).await {
            Ok(resource) => {
                let paused = read_paused_replicas_annotation(resource.annotations());
                let spec = resource.spec.clone().into_domain(
                    self.default_polling_interval_secs,
                    self.default_cooldown_secs,
                    paused,
                );
                let status = resource.status.map_or_else(ScaleTargetStatus::default, |s| s.into_domain());
                Ok(Some((spec, status)))
            }
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
            Err(e) => Err(ScaleError::Kubernetes(format!(
                "failed to read ScaledTarget {key}: {e}"
            ))),
        }
    }

    async fn write_status(&self, key: &ScaleTargetKey, status: &ScaleTargetStatus) -> Result<(), ScaleError> {
        let api = self.api(&key.namespace);
        let wire = status.clone().into_wire();
        let patch = serde_json::json!({ "status": wire });
        api.patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ScaleError::Kubernetes(format!("failed to write status for {key}: {e}")))?;
        Ok(())
    }
}

/// Reads `ScaledTargetAuth` descriptors by name (component B input).
pub struct ScaledTargetAuthRepository {
    client: Client,
}

impl ScaledTargetAuthRepository {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TriggerAuthRepository for ScaledTargetAuthRepository {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<TriggerAuthSpec>, ScaleError> {
        let api: Api<ScaledTargetAuth> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(resource) => Ok(Some(resource.spec.into_domain(namespace, name))),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
            Err(e) => Err(ScaleError::Kubernetes(format!(
                "failed to read ScaledTargetAuth {namespace}/{name}: {e}"
            ))),
        }
    }
}

/// Walks a scale target's pod template for `Env`-sourced parameters
/// (spec §4.2 step 4). Works generically across Deployment/StatefulSet-
/// shaped kinds by reading `.spec.template.spec.containers` out of the
/// dynamic object, since that path is shared by every common workload
/// kind exposing the scale subresource.
pub struct DynamicPodTemplateReader {
    client: Client,
}

impl DynamicPodTemplateReader {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodTemplateReader for DynamicPodTemplateReader {
    async fn read_env(&self, target_ref: &ScaleTargetRef, namespace: &str) -> Result<PodEnvironment, ScaleError> {
        let gvk = gvk_of(target_ref)?;
        let (ar, _caps) = pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| ScaleError::Kubernetes(format!("failed to discover {gvk:?}: {e}")))?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let object = api
            .get(&target_ref.name)
            .await
            .map_err(|e| ScaleError::Kubernetes(format!("failed to read pod template for {target_ref:?}: {e}")))?;

        let containers = object
            .data
            .pointer("/spec/template/spec/containers")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut env: PodEnvironment = HashMap::new();
        for container in containers {
            let name = container
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let mut vars = HashMap::new();
            if let Some(entries) = container.get("env").and_then(|v| v.as_array()) {
                for entry in entries {
                    if let (Some(k), Some(v)) = (
                        entry.get("name").and_then(|v| v.as_str()),
                        entry.get("value").and_then(|v| v.as_str()),
                    ) {
                        vars.insert(k.to_string(), v.to_string());
                    }
                }
            }
            env.insert(name, vars);
        }
        Ok(env)
    }
}
