//! Configuration loading for both binaries via `figment`.
//!
//! Hierarchical merge: programmatic defaults, an optional YAML file, then
//! `SCALETIDE_`-prefixed environment variables, highest priority last.

pub mod loader;

pub use loader::{AdapterConfigLoader, OperatorConfigLoader};
