//! The secret-resolution port (component B), grounded in
//! `SecBear-neuron`'s `neuron-secret` resolver-registry idiom: a
//! `SecretResolver` trait dispatched by source kind.

use async_trait::async_trait;

use crate::domain::errors::SecretError;
use crate::domain::models::trigger_auth::ParameterSource;

/// Resolves a single [`ParameterSource`] into a plaintext value.
///
/// Implementations exist per source kind (secret, env, pod-identity,
/// remote-store); [`crate::services::secret_resolution::SecretResolverRegistry`]
/// dispatches to the right one.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Whether this resolver handles `source`.
    fn supports(&self, source: &ParameterSource) -> bool;

    /// Resolve `source` to a plaintext value. Callers are responsible for
    /// not retaining the returned `String` longer than needed — the probe
    /// factory consumes it immediately into a probe's own auth map.
    async fn resolve(&self, source: &ParameterSource) -> Result<String, SecretError>;
}
