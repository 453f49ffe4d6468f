//! Trigger authentication descriptors (spec §3, §6).
//!
//! A `TriggerAuthSpec` is a named collection of parameter bindings that
//! resolves, via [`crate::services::secret_resolution`], into a flat
//! `{parameter name → value}` map a probe consumes directly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Where a single authentication parameter's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ParameterSource {
    /// A named secret and key within it.
    Secret { secret_name: String, key: String },
    /// An environment variable on the scale target's pod template,
    /// resolved by walking the container spec named by `container_name`.
    Env {
        container_name: String,
        env_name: String,
    },
    /// A hint that the platform's pod-identity provider should supply
    /// this parameter (e.g. an assumed cloud-provider role); no value is
    /// resolved locally, the hint is passed through to the probe factory.
    PodIdentity { provider: String },
    /// A parameter fetched from a remote secret store (vault, cloud
    /// secret manager) by reference.
    RemoteStore { store_ref: String, key: String },
}

/// A named trigger-authentication object: `{parameter name → source}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerAuthSpec {
    pub name: String,
    pub namespace: String,
    pub parameters: HashMap<String, ParameterSource>,
}

/// The flat map a probe consumes, produced by resolving a
/// [`TriggerAuthSpec`]'s parameters in precedence order (spec §4.2 step 4):
/// secret references, then environment references, then pod-identity
/// hints, then remote-store references.
pub type ResolvedAuth = HashMap<String, String>;
