//! Domain layer: target/trigger/metric models, ports, and errors.
//!
//! Framework-agnostic types. Kubernetes-specific wiring lives under
//! `infrastructure::k8s` and maps onto these types at the boundary.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{Disposition, ProbeError, ScaleError, ScaleResult, SecretError};
