//! Kubernetes-facing adapters: CRDs and their wire conversions, client
//! bootstrap, and the trait implementations that back the domain ports
//! against a real cluster.

pub mod client;
pub mod crd;
pub mod hpa;
pub mod watch;

pub use client::build_client;
pub use crd::{ScaledTarget, ScaledTargetAuth, ScaledTargetSpecWire, ScaledTargetAuthSpecWire};
pub use hpa::{
    DynamicPodTemplateReader, HpaWriter, ScaleSubresourceController, ScaledTargetAuthRepository,
    ScaledTargetRepository,
};
pub use watch::TargetWatcher;
