//! Infrastructure layer: adapters implementing the domain ports against
//! real external systems.
//!
//! - `k8s`: Kubernetes CRDs, client wiring, HPA/Scale-subresource adapters
//! - `config`: figment-based configuration loading
//! - `logging`: tracing setup, log rotation, audit trail
//! - `metrics_server`: axum HTTP surface for the external-metrics adapter

pub mod config;
pub mod k8s;
pub mod logging;
pub mod metrics_server;
