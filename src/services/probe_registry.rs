//! The probe factory (component C, spec §9's "tagged sum {type →
//! constructor} held in a single registry").
//!
//! A `HashMap<String, _>` built once from a list of loaded entries, with
//! name-keyed lookup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::errors::ProbeError;
use crate::domain::ports::probe::{Probe, ProbeConstructArgs, ProbeFactory};

/// One probe-type registration: the trigger-type string it answers to,
/// paired with its factory.
pub struct LoadedProbeFactory {
    pub trigger_type: String,
    pub factory: Arc<dyn ProbeFactory>,
}

/// Maps trigger-type strings onto their constructor (component C).
pub struct ProbeRegistry {
    factories: HashMap<String, Arc<dyn ProbeFactory>>,
}

impl ProbeRegistry {
    #[must_use]
    pub fn from_loaded(loaded: Vec<LoadedProbeFactory>) -> Self {
        let factories = loaded
            .into_iter()
            .map(|l| (l.trigger_type, l.factory))
            .collect();
        Self { factories }
    }

    #[must_use]
    pub fn supports(&self, trigger_type: &str) -> bool {
        self.factories.contains_key(trigger_type)
    }

    #[must_use]
    pub fn trigger_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Construct a probe for `trigger_type`, or
    /// [`ProbeError::UnknownProbeType`] if nothing is registered for it.
    pub async fn construct(
        &self,
        trigger_type: &str,
        args: ProbeConstructArgs<'_>,
    ) -> Result<Box<dyn Probe>, ProbeError> {
        let factory = self
            .factories
            .get(trigger_type)
            .ok_or_else(|| ProbeError::UnknownProbeType(trigger_type.to_string()))?;
        factory.construct(args).await
    }
}
