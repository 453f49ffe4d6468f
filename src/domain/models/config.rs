//! Configuration structs loaded by [`crate::infrastructure::config::ConfigLoader`]
//! (spec.md §0.3).

use serde::{Deserialize, Serialize};

/// Configuration for the operator binary (reconciler + probe loops).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OperatorConfig {
    /// Namespace to watch; empty string means cluster-wide (spec §6).
    #[serde(default)]
    pub watch_namespace: String,

    /// Default polling interval applied when a target omits its own.
    #[serde(default = "default_polling_interval_secs")]
    pub default_polling_interval_secs: u64,

    /// Default cooldown applied when a target omits its own.
    #[serde(default = "default_cooldown_secs")]
    pub default_cooldown_secs: u64,

    /// Per-call probe timeout (spec §4.3, "default 5s").
    #[serde(default = "default_probe_timeout_secs")]
    pub default_probe_timeout_secs: u64,

    /// Whether to participate in leader election. The election algorithm
    /// itself is out of scope; this only gates whether the operator waits
    /// for a lease before reconciling.
    #[serde(default)]
    pub leader_election_enabled: bool,

    /// Maximum number of target keys reconciled concurrently.
    #[serde(default = "default_reconcile_concurrency")]
    pub reconcile_concurrency: usize,

    /// Initial backoff for a failing target's retry schedule.
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Cap on a failing target's retry backoff.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

const fn default_polling_interval_secs() -> u64 {
    30
}

const fn default_cooldown_secs() -> u64 {
    300
}

const fn default_probe_timeout_secs() -> u64 {
    5
}

const fn default_reconcile_concurrency() -> usize {
    8
}

const fn default_backoff_initial_ms() -> u64 {
    1_000
}

const fn default_backoff_max_ms() -> u64 {
    60_000
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: String::new(),
            default_polling_interval_secs: default_polling_interval_secs(),
            default_cooldown_secs: default_cooldown_secs(),
            default_probe_timeout_secs: default_probe_timeout_secs(),
            leader_election_enabled: false,
            reconcile_concurrency: default_reconcile_concurrency(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// Configuration for the external-metrics adapter binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AdapterConfig {
    /// Port the metric-server HTTP surface listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Base path for the metric-query endpoint.
    #[serde(default = "default_listen_path")]
    pub listen_path: String,

    /// Multiplier applied to a target's polling interval to decide
    /// staleness (spec §4.5 step 2: "age ≤ 2 × polling interval").
    #[serde(default = "default_cache_staleness_multiplier")]
    pub cache_staleness_multiplier: f64,

    /// Per-call probe timeout for on-demand probe invocation.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_listen_port() -> u16 {
    6443
}

fn default_listen_path() -> String {
    "/apis/external.metrics.k8s.io/v1beta1".to_string()
}

const fn default_cache_staleness_multiplier() -> f64 {
    2.0
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            listen_path: default_listen_path(),
            cache_staleness_multiplier: default_cache_staleness_multiplier(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Validation errors for either config struct.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: i64 },

    #[error("{field} must be >= 1.0, got {value}")]
    MultiplierTooSmall { field: &'static str, value: f64 },
}

impl OperatorConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.default_polling_interval_secs == 0 {
            return Err(ConfigValidationError::NotPositive {
                field: "default_polling_interval_secs",
                value: 0,
            });
        }
        if self.reconcile_concurrency == 0 {
            return Err(ConfigValidationError::NotPositive {
                field: "reconcile_concurrency",
                value: 0,
            });
        }
        Ok(())
    }
}

impl AdapterConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.cache_staleness_multiplier < 1.0 {
            return Err(ConfigValidationError::MultiplierTooSmall {
                field: "cache_staleness_multiplier",
                value: self.cache_staleness_multiplier,
            });
        }
        Ok(())
    }
}
