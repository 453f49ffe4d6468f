//! Trigger authentication resolution (component B, spec §4.2 step 4).
//!
//! Grounded in `SecBear-neuron`'s `neuron-secret` registry: a flat list of
//! [`SecretResolver`] implementations dispatched by `supports`. Resolving
//! a [`TriggerAuthSpec`] merges, in precedence order, secret references,
//! environment references (looked up against the scale-target's pod
//! template), pod-identity hints, and remote-store references.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::errors::SecretError;
use crate::domain::models::trigger_auth::{ParameterSource, ResolvedAuth, TriggerAuthSpec};
use crate::domain::ports::secret_resolver::SecretResolver;

/// `container name -> {env var name -> value}`, captured once per
/// reconcile from the scale-target's pod template (spec §4.2 step 4).
pub type PodEnvironment = HashMap<String, HashMap<String, String>>;

/// Dispatches [`ParameterSource::Secret`] and [`ParameterSource::RemoteStore`]
/// parameters to registered [`SecretResolver`]s. `Env` and `PodIdentity`
/// sources never leave the process and are resolved inline, so they need
/// no registered resolver.
pub struct SecretResolverRegistry {
    resolvers: Vec<Arc<dyn SecretResolver>>,
}

impl SecretResolverRegistry {
    #[must_use]
    pub fn new(resolvers: Vec<Arc<dyn SecretResolver>>) -> Self {
        Self { resolvers }
    }

    async fn resolve_external(&self, source: &ParameterSource) -> Result<String, SecretError> {
        for resolver in &self.resolvers {
            if resolver.supports(source) {
                return resolver.resolve(source).await;
            }
        }
        Err(SecretError::NoResolver(source_kind(source).to_string()))
    }

    /// Resolve every parameter in `auth` into a flat map, using `pod_env`
    /// for `Env` sources.
    pub async fn resolve_all(
        &self,
        auth: &TriggerAuthSpec,
        pod_env: &PodEnvironment,
    ) -> Result<ResolvedAuth, SecretError> {
        let mut resolved = ResolvedAuth::new();
        // Precedence order (spec §4.2 step 4): secret, env, pod-identity,
        // remote-store. Stable sort by a precedence rank keeps later
        // sources from overwriting an earlier one's value for the same
        // parameter name, should a target ever define both.
        let mut params: Vec<(&String, &ParameterSource)> = auth.parameters.iter().collect();
        params.sort_by_key(|(_, source)| precedence(source));

        for (param_name, source) in params {
            let value = match source {
                ParameterSource::Secret { .. } | ParameterSource::RemoteStore { .. } => {
                    self.resolve_external(source).await?
                }
                ParameterSource::Env {
                    container_name,
                    env_name,
                } => pod_env
                    .get(container_name)
                    .and_then(|envs| envs.get(env_name))
                    .cloned()
                    .ok_or_else(|| {
                        SecretError::NotFound(format!(
                            "container {container_name} has no env var {env_name}"
                        ))
                    })?,
                ParameterSource::PodIdentity { provider } => provider.clone(),
            };
            resolved.entry(param_name.clone()).or_insert(value);
        }
        Ok(resolved)
    }
}

fn precedence(source: &ParameterSource) -> u8 {
    match source {
        ParameterSource::Secret { .. } => 0,
        ParameterSource::Env { .. } => 1,
        ParameterSource::PodIdentity { .. } => 2,
        ParameterSource::RemoteStore { .. } => 3,
    }
}

fn source_kind(source: &ParameterSource) -> &'static str {
    match source {
        ParameterSource::Secret { .. } => "secret",
        ParameterSource::Env { .. } => "env",
        ParameterSource::PodIdentity { .. } => "pod-identity",
        ParameterSource::RemoteStore { .. } => "remote-store",
    }
}
