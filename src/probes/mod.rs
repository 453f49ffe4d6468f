//! Illustrative probe implementations (component A).
//!
//! These are not a catalogue — the probe catalogue itself is out of scope
//! (spec §1). `http` and `stub` exist to exercise the probe port end to
//! end and to give the probe factory something real to register.

pub mod http;
pub mod stub;

pub use http::{HttpProbe, HttpProbeFactory};
pub use stub::{StubProbe, StubProbeFactory};
