//! The target descriptor (spec §3, "Target descriptor") and its status
//! surface (spec §6).

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::ScaleError;
use crate::domain::models::metric::MetricType;

/// Identity of a target: `(namespace, name)`, used throughout as the
/// reconciliation and probe-loop-registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScaleTargetKey {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for ScaleTargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The orchestrator object whose replica count this target drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleTargetRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

/// Whether a target is long-running (driven by replica count) or
/// run-to-completion (driven by work-item count, spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    LongRunning,
    RunToCompletion,
}

/// After `failure_threshold` consecutive probe failures on a trigger, the
/// adapter reports `replicas` as the metric value instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackPolicy {
    pub failure_threshold: u32,
    pub replicas: i32,
}

/// One entry in a target's trigger list (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub trigger_type: String,
    pub config: serde_json::Map<String, serde_json::Value>,
    pub auth_ref: Option<String>,
    pub metric_type: MetricType,
    pub use_cached_metrics: bool,
    pub fallback: Option<FallbackPolicy>,
}

impl TriggerSpec {
    /// A type-specific slug derived from `config`, stable under restart,
    /// used as the discriminator component of the derived metric name.
    ///
    /// Probes declare their own discriminator field conventions; this
    /// falls back to a config-derived hash when the probe type has no
    /// catalogued convention, which is sufficient for uniqueness checks
    /// even though the probe catalogue itself is out of scope.
    #[must_use]
    pub fn discriminator(&self) -> String {
        for key in ["queueName", "topic", "streamName", "name", "key"] {
            if let Some(v) = self.config.get(key).and_then(serde_json::Value::as_str) {
                return v.to_string();
            }
        }
        let mut keys: Vec<&String> = self.config.keys().collect();
        keys.sort();
        keys.iter()
            .map(|k| format!("{k}={}", self.config[*k]))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The scaling target value read from `config.targetValue`, the
    /// convention probe types use for the number the native autoscaler
    /// aims to hold per replica (spec §3, "Derived: metric spec").
    #[must_use]
    pub fn target_value(&self) -> f64 {
        config_number(&self.config, "targetValue").unwrap_or(1.0)
    }

    /// The activation threshold read from `config.activationThreshold`
    /// (spec GLOSSARY, "the numeric value a metric must exceed for its
    /// trigger to count as active").
    #[must_use]
    pub fn activation_threshold(&self) -> f64 {
        config_number(&self.config, "activationThreshold").unwrap_or(0.0)
    }
}

/// Reads a numeric trigger config field, accepting either a JSON number
/// or a string-encoded one — real CRD metadata is `map[string]string`
/// (see `infrastructure::k8s::crd::TriggerSpecWire`), so `targetValue`
/// and `activationThreshold` arrive as strings, not JSON numbers.
fn config_number(config: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<f64> {
    match config.get(key)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// A target descriptor (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleTargetSpec {
    pub scale_target_ref: ScaleTargetRef,
    #[serde(with = "humantime_duration", default = "default_polling_interval")]
    pub polling_interval: Duration,
    #[serde(with = "humantime_duration", default = "default_cooldown_period")]
    pub cooldown_period: Duration,
    #[serde(default)]
    pub min_replicas: i32,
    #[serde(default = "default_max_replicas")]
    pub max_replicas: i32,
    pub idle_replicas: Option<i32>,
    pub paused_replicas: Option<i32>,
    pub triggers: Vec<TriggerSpec>,
    pub fallback: Option<FallbackPolicy>,
    #[serde(default = "default_mode")]
    pub mode: Mode,
}

const fn default_polling_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_cooldown_period() -> Duration {
    Duration::from_secs(300)
}

const fn default_max_replicas() -> i32 {
    100
}

const fn default_mode() -> Mode {
    Mode::LongRunning
}

mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

impl ScaleTargetSpec {
    /// Field validation (spec §4.2 step 2 and §9's discriminator-collision
    /// rule). Returns the first violation found.
    pub fn validate(&self, key: &ScaleTargetKey) -> Result<(), ScaleError> {
        let fail = |reason: String| {
            Err(ScaleError::Validation {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                reason,
            })
        };

        if self.min_replicas > self.max_replicas {
            return fail(format!(
                "minReplicas ({}) must be <= maxReplicas ({})",
                self.min_replicas, self.max_replicas
            ));
        }
        if let Some(idle) = self.idle_replicas {
            if idle >= self.min_replicas {
                return fail(format!(
                    "idleReplicas ({idle}) must be strictly less than minReplicas ({})",
                    self.min_replicas
                ));
            }
        }
        if self.triggers.is_empty() {
            return fail("triggers must be non-empty".into());
        }
        if self.polling_interval.is_zero() {
            return fail("pollingInterval must be positive".into());
        }

        let mut seen = HashSet::new();
        for (index, trigger) in self.triggers.iter().enumerate() {
            let slug = format!(
                "{}-{}",
                trigger.trigger_type.to_ascii_lowercase(),
                trigger.discriminator().to_ascii_lowercase()
            );
            if !seen.insert(slug.clone()) {
                return fail(format!(
                    "trigger {index} derives discriminator {slug} which collides with an earlier trigger"
                ));
            }
        }
        Ok(())
    }

    /// The floor the probe loop and derived autoscaler must respect when
    /// the target is active or in an unknown state (spec §4.2 step 5).
    #[must_use]
    pub fn active_floor(&self) -> i32 {
        std::cmp::max(1, self.min_replicas)
    }
}

/// Condition type surfaced on a target's status (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    Active,
    Fallback,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Status surface of a target (spec §6).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScaleTargetStatus {
    pub conditions: Vec<Condition>,
    pub external_metric_names: Vec<String>,
    pub original_replica_count: Option<i32>,
}
