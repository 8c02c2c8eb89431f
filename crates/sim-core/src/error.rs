//! The domain error taxonomy a caller needs to match on.
//!
//! Orchestration code wraps these in `anyhow::Error` with `.context(...)`; `main` prints the
//! chain and maps any failure to a non-zero exit code. A `SimError` can always be recovered from
//! an `anyhow::Error` via `downcast_ref` when a caller needs to branch on the failure bucket.

use thiserror::Error;

/// The five fatal-error buckets the simulator distinguishes, per the error-handling design.
#[derive(Debug, Error)]
pub enum SimError {
    /// Bad CLI arguments, an unreadable file, or a malformed platform/workload document shape.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The workload is internally inconsistent (missing profile, cycle, resource mismatch).
    #[error("invalid workload: {0}")]
    Workload(String),

    /// The EDC sent something that violates the wire grammar or ordering contract.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// An EDC decision cannot be applied to the current simulation state.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// The socket connection to the EDC was lost or never established.
    #[error("transport error: {0}")]
    Transport(String),
}

impl SimError {
    /// Shorthand for [`SimError::Configuration`].
    pub fn configuration(msg: impl Into<String>) -> Self {
        SimError::Configuration(msg.into())
    }

    /// Shorthand for [`SimError::Workload`].
    pub fn workload(msg: impl Into<String>) -> Self {
        SimError::Workload(msg.into())
    }

    /// Shorthand for [`SimError::Protocol`].
    pub fn protocol(msg: impl Into<String>) -> Self {
        SimError::Protocol(msg.into())
    }

    /// Shorthand for [`SimError::Invariant`].
    pub fn invariant(msg: impl Into<String>) -> Self {
        SimError::Invariant(msg.into())
    }

    /// Shorthand for [`SimError::Transport`].
    pub fn transport(msg: impl Into<String>) -> Self {
        SimError::Transport(msg.into())
    }
}
