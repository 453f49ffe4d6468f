//! scaletide - an event-driven autoscaler for a container-orchestration
//! platform.
//!
//! Drives workload replica counts, including scale-to/from-zero, from
//! metrics produced by external event sources the platform's native
//! horizontal autoscaler cannot observe directly. Two cooperating
//! processes share this library:
//! - the operator: reconciles target descriptors, owns the zero↔one
//!   transitions, and derives the platform's native autoscaler object;
//! - the adapter: serves the external-metrics queries that native
//!   autoscaler issues for non-zero scaling.

pub mod domain;
pub mod infrastructure;
pub mod probes;
pub mod services;
