//! Kubernetes client bootstrap, shared by both binaries.

use anyhow::{Context, Result};
use kube::Client;

/// Build a client from the in-cluster service account, falling back to
/// the local kubeconfig (grounded in the common kube-rs
/// `Client::try_default` bootstrap).
pub async fn build_client() -> Result<Client> {
    Client::try_default()
        .await
        .context("failed to construct a Kubernetes client")
}
