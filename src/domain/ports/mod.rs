//! Domain ports (interfaces) for the autoscaler.

pub mod orchestrator;
pub mod probe;
pub mod secret_resolver;
pub mod watch;

pub use orchestrator::{
    AutoscalerWriter, DesiredAutoscaler, ObservedAutoscaler, PodTemplateReader, ReplicaController,
    TargetRepository, TriggerAuthRepository,
};
pub use probe::{Probe, ProbeConstructArgs, ProbeFactory, ProbeReading};
pub use secret_resolver::SecretResolver;
pub use watch::WatchEvent;
