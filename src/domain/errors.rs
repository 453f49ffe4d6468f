//! Domain errors for the autoscaler.

use thiserror::Error;

/// How the reconciler should respond to a [`ScaleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Not worth retrying; surface the condition and wait for a spec change.
    Terminal,
    /// Requeue immediately, no backoff.
    RetriableImmediate,
    /// Requeue with exponential backoff.
    RetriableBackoff,
}

/// Errors raised while validating, resolving, or reconciling a scale target.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("target {namespace}/{name} failed validation: {reason}")]
    Validation {
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("target {namespace}/{name} references missing workload {workload}")]
    TargetMissing {
        namespace: String,
        name: String,
        workload: String,
    },

    #[error("trigger authentication resolution failed: {0}")]
    Authentication(#[from] SecretError),

    #[error("probe call failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("target {namespace}/{name} is not owned by this operator's field manager")]
    OwnershipConflict { namespace: String, name: String },

    #[error("derived write conflict for {namespace}/{name}: {reason}")]
    DerivedWriteConflict {
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("kubernetes API error: {0}")]
    Kubernetes(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScaleError {
    /// Maps this error onto a retry disposition, per the error-kind table.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Validation { .. } => Disposition::Terminal,
            Self::TargetMissing { .. } => Disposition::RetriableBackoff,
            Self::Authentication(e) => e.disposition(),
            Self::Probe(e) => e.disposition(),
            Self::OwnershipConflict { .. } => Disposition::Terminal,
            Self::DerivedWriteConflict { .. } => Disposition::RetriableImmediate,
            Self::Kubernetes(_) => Disposition::RetriableBackoff,
            Self::Serialization(_) => Disposition::Terminal,
        }
    }
}

/// Errors returned across the probe boundary (component A).
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("probe target unreachable: {0}")]
    Unreachable(String),

    #[error("probe returned a value this operator could not parse: {0}")]
    InvalidResponse(String),

    #[error("probe type {0} is not registered")]
    UnknownProbeType(String),

    #[error("probe configuration invalid: {0}")]
    InvalidConfig(String),
}

impl ProbeError {
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Timeout(_) | Self::Unreachable(_) => Disposition::RetriableBackoff,
            Self::InvalidResponse(_) => Disposition::RetriableImmediate,
            Self::UnknownProbeType(_) | Self::InvalidConfig(_) => Disposition::Terminal,
        }
    }
}

/// Errors raised while resolving trigger authentication material.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("no resolver registered for source kind {0}")]
    NoResolver(String),

    #[error("secret backend rejected the request: {0}")]
    BackendRejected(String),

    #[error("resolved secret lease expired")]
    LeaseExpired,
}

impl SecretError {
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::NotFound(_) | Self::LeaseExpired => Disposition::RetriableBackoff,
            Self::NoResolver(_) => Disposition::Terminal,
            Self::BackendRejected(_) => Disposition::RetriableBackoff,
        }
    }
}

/// Convenience alias for reconciler/probe-loop result types.
pub type ScaleResult<T> = Result<T, ScaleError>;
