//! Custom resource definitions: the wire shape of a target descriptor and
//! a trigger-authentication descriptor (spec §3, §6), plus the
//! conversions onto the framework-agnostic domain model.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::domain::errors::ScaleError;
use crate::domain::models::metric::MetricType;
use crate::domain::models::target::{
    Condition, ConditionStatus, ConditionType, FallbackPolicy, Mode, ScaleTargetKey,
    ScaleTargetRef, ScaleTargetSpec, ScaleTargetStatus, TriggerSpec,
};
use crate::domain::models::trigger_auth::{ParameterSource, TriggerAuthSpec};

/// `ScaledTarget` — the wire representation of a target descriptor
/// (spec §3).
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "scaletide.io",
    version = "v1",
    kind = "ScaledTarget",
    plural = "scaledtargets",
    shortname = "st",
    namespaced,
    status = "ScaledTargetStatusWire",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ScaledTargetSpecWire {
    pub scale_target_ref: ScaleTargetRefWire,
    #[serde(default)]
    pub polling_interval_seconds: Option<u64>,
    #[serde(default)]
    pub cooldown_period_seconds: Option<u64>,
    #[serde(default)]
    pub min_replica_count: i32,
    #[serde(default = "default_max_replicas_wire")]
    pub max_replica_count: i32,
    pub idle_replica_count: Option<i32>,
    pub triggers: Vec<TriggerSpecWire>,
    pub fallback: Option<FallbackPolicyWire>,
    #[serde(default)]
    pub mode: ModeWire,
}

const fn default_max_replicas_wire() -> i32 {
    100
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleTargetRefWire {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ModeWire {
    #[default]
    LongRunning,
    RunToCompletion,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MetricTypeWire {
    Value,
    AverageValue,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FallbackPolicyWire {
    pub failure_threshold: u32,
    pub replicas: i32,
}

/// One trigger entry. `metadata` follows the ecosystem-standard
/// string-keyed convention for trigger configuration (spec §3).
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpecWire {
    #[serde(rename = "type")]
    pub trigger_type: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub auth_ref: Option<String>,
    #[serde(default = "default_metric_type_wire")]
    pub metric_type: MetricTypeWire,
    #[serde(default)]
    pub use_cached_metrics: bool,
    pub fallback: Option<FallbackPolicyWire>,
}

const fn default_metric_type_wire() -> MetricTypeWire {
    MetricTypeWire::AverageValue
}

/// Status subresource mirroring [`ScaleTargetStatus`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaledTargetStatusWire {
    #[serde(default)]
    pub conditions: Vec<ConditionWire>,
    #[serde(default)]
    pub external_metric_names: Vec<String>,
    pub original_replica_count: Option<i32>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionWire {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    pub reason: String,
    pub message: String,
    pub last_transition_time: Time,
}

/// `ScaledTargetAuth` — the wire representation of a trigger-auth
/// descriptor (spec §3, "Trigger authentication").
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "scaletide.io",
    version = "v1",
    kind = "ScaledTargetAuth",
    plural = "scaledtargetauths",
    shortname = "sta",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ScaledTargetAuthSpecWire {
    #[serde(default)]
    pub secret_target_ref: Vec<AuthParameterWire>,
    #[serde(default)]
    pub env_target_ref: Vec<EnvParameterWire>,
    #[serde(default)]
    pub pod_identity: Option<PodIdentityWire>,
    #[serde(default)]
    pub remote_store_ref: Vec<RemoteStoreParameterWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthParameterWire {
    pub parameter: String,
    pub name: String,
    pub key: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvParameterWire {
    pub parameter: String,
    pub container_name: String,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodIdentityWire {
    pub provider: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStoreParameterWire {
    pub parameter: String,
    pub store_ref: String,
    pub key: String,
}

impl ScaledTargetSpecWire {
    /// Maps this wire spec onto the domain model, applying operator-wide
    /// defaults for fields the descriptor omitted (spec §3 defaults).
    pub fn into_domain(
        self,
        default_polling_interval_secs: u64,
        default_cooldown_secs: u64,
        paused_replicas: Option<i32>,
    ) -> ScaleTargetSpec {
        ScaleTargetSpec {
            scale_target_ref: ScaleTargetRef {
                api_version: self.scale_target_ref.api_version,
                kind: self.scale_target_ref.kind,
                name: self.scale_target_ref.name,
            },
            polling_interval: Duration::from_secs(
                self.polling_interval_seconds
                    .unwrap_or(default_polling_interval_secs),
            ),
            cooldown_period: Duration::from_secs(
                self.cooldown_period_seconds.unwrap_or(default_cooldown_secs),
            ),
            min_replicas: self.min_replica_count,
            max_replicas: self.max_replica_count,
            idle_replicas: self.idle_replica_count,
            paused_replicas,
            triggers: self.triggers.into_iter().map(TriggerSpecWire::into_domain).collect(),
            fallback: self.fallback.map(FallbackPolicyWire::into_domain),
            mode: match self.mode {
                ModeWire::LongRunning => Mode::LongRunning,
                ModeWire::RunToCompletion => Mode::RunToCompletion,
            },
        }
    }
}

impl TriggerSpecWire {
    fn into_domain(self) -> TriggerSpec {
        let mut config = serde_json::Map::new();
        for (k, v) in self.metadata {
            config.insert(k, serde_json::Value::String(v));
        }
        TriggerSpec {
            trigger_type: self.trigger_type,
            config,
            auth_ref: self.auth_ref,
            metric_type: match self.metric_type {
                MetricTypeWire::Value => MetricType::Value,
                MetricTypeWire::AverageValue => MetricType::AverageValue,
            },
            use_cached_metrics: self.use_cached_metrics,
            fallback: self.fallback.map(FallbackPolicyWire::into_domain),
        }
    }
}

impl FallbackPolicyWire {
    const fn into_domain(self) -> FallbackPolicy {
        FallbackPolicy {
            failure_threshold: self.failure_threshold,
            replicas: self.replicas,
        }
    }
}

impl ScaleTargetStatus {
    /// Maps the domain status onto its wire representation for a status
    /// subresource patch.
    #[must_use]
    pub fn into_wire(self) -> ScaledTargetStatusWire {
        ScaledTargetStatusWire {
            conditions: self.conditions.into_iter().map(Condition::into_wire).collect(),
            external_metric_names: self.external_metric_names,
            original_replica_count: self.original_replica_count,
        }
    }
}

impl ConditionWire {
    /// Maps a stored condition back onto the domain type, used when
    /// reading status back in so `record_condition` updates existing
    /// entries instead of accumulating duplicates.
    fn into_domain(self) -> Option<Condition> {
        let condition_type = match self.condition_type.as_str() {
            "Ready" => ConditionType::Ready,
            "Active" => ConditionType::Active,
            "Fallback" => ConditionType::Fallback,
            "Paused" => ConditionType::Paused,
            _ => return None,
        };
        let status = match self.status.as_str() {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        };
        Some(Condition {
            condition_type,
            status,
            reason: self.reason,
            message: self.message,
            last_transition_time: self.last_transition_time.0,
        })
    }
}

impl ScaledTargetStatusWire {
    /// Maps this wire status back onto the domain type (the inverse of
    /// [`ScaleTargetStatus::into_wire`]).
    #[must_use]
    pub fn into_domain(self) -> ScaleTargetStatus {
        ScaleTargetStatus {
            conditions: self.conditions.into_iter().filter_map(ConditionWire::into_domain).collect(),
            external_metric_names: self.external_metric_names,
            original_replica_count: self.original_replica_count,
        }
    }
}

impl Condition {
    fn into_wire(self) -> ConditionWire {
        ConditionWire {
            condition_type: match self.condition_type {
                ConditionType::Ready => "Ready",
                ConditionType::Active => "Active",
                ConditionType::Fallback => "Fallback",
                ConditionType::Paused => "Paused",
            }
            .to_string(),
            status: match self.status {
                ConditionStatus::True => "True",
                ConditionStatus::False => "False",
                ConditionStatus::Unknown => "Unknown",
            }
            .to_string(),
            reason: self.reason,
            message: self.message,
            last_transition_time: Time(self.last_transition_time),
        }
    }
}

impl ScaledTargetAuthSpecWire {
    /// Maps this wire spec onto [`TriggerAuthSpec`] (spec §3, precedence
    /// order preserved by `services::secret_resolution`, not here).
    pub fn into_domain(self, namespace: &str, name: &str) -> TriggerAuthSpec {
        let mut parameters = std::collections::HashMap::new();
        for p in self.secret_target_ref {
            parameters.insert(
                p.parameter,
                ParameterSource::Secret {
                    secret_name: p.name,
                    key: p.key,
                },
            );
        }
        for p in self.env_target_ref {
            parameters.insert(
                p.parameter,
                ParameterSource::Env {
                    container_name: p.container_name,
                    env_name: p.name,
                },
            );
        }
        if let Some(identity) = self.pod_identity {
            parameters.insert(
                "__podIdentity".to_string(),
                ParameterSource::PodIdentity {
                    provider: identity.provider,
                },
            );
        }
        for p in self.remote_store_ref {
            parameters.insert(
                p.parameter,
                ParameterSource::RemoteStore {
                    store_ref: p.store_ref,
                    key: p.key,
                },
            );
        }
        TriggerAuthSpec {
            name: name.to_string(),
            namespace: namespace.to_string(),
            parameters,
        }
    }
}

/// Reads the `scaletide.io/paused-replicas` annotation (spec §6).
#[must_use]
pub fn read_paused_replicas_annotation(annotations: &BTreeMap<String, String>) -> Option<i32> {
    annotations
        .get("scaletide.io/paused-replicas")
        .and_then(|v| v.parse::<i32>().ok())
}

/// Builds the key used throughout the reconciler/registries from a CRD's
/// namespace/name.
pub fn key_from(namespace: Option<&str>, name: Option<&str>) -> Result<ScaleTargetKey, ScaleError> {
    Ok(ScaleTargetKey {
        namespace: namespace
            .ok_or_else(|| ScaleError::Kubernetes("object missing namespace".into()))?
            .to_string(),
        name: name
            .ok_or_else(|| ScaleError::Kubernetes("object missing name".into()))?
            .to_string(),
    })
}
