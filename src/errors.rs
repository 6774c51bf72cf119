//! Driver error classification.
//!
//! Every long-lived loop in the driver decides what to do next based on the
//! kind of error it just saw: transport failures are retried behind a
//! breaker, temporary hardware errors are skipped for a tick, critical
//! hardware errors stop the owning task, and configuration errors prevent a
//! task from being instantiated at all.

use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type Result<T> = std::result::Result<T, DriverError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The cluster transport is unreachable. Breaker-eligible: the owning
    /// loop pauses, preserves its configuration, and retries.
    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    /// A transient hardware condition (e.g. no samples arrived within the
    /// queue's bounded wait). The consumer treats the tick as a no-op.
    #[error("temporary hardware error: {0}")]
    TemporaryHardware(String),

    /// The vendor reported a failure that requires reconfiguration. The
    /// owning task marks itself not-ok and stops; the manager does not
    /// auto-restart it.
    #[error("critical hardware error: {0}")]
    CriticalHardware(String),

    /// The task's config blob failed parsing or cluster resolution. Reported
    /// as a `variant=error` state record with path-keyed details.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A streamer ended cleanly after its send half was closed.
    #[error("stream closed")]
    StreamClosed,

    /// Anything else. Terminates the owning loop.
    #[error("{0}")]
    Internal(String),
}

impl DriverError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DriverError::Unreachable(_))
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, DriverError::TemporaryHardware(_))
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, DriverError::CriticalHardware(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, DriverError::Configuration(_))
    }

    pub fn is_stream_closed(&self) -> bool {
        matches!(self, DriverError::StreamClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_predicates() {
        assert!(DriverError::Unreachable("no route".into()).is_unreachable());
        assert!(DriverError::TemporaryHardware("queue timeout".into()).is_temporary());
        assert!(DriverError::CriticalHardware("bad session".into()).is_critical());
        assert!(DriverError::StreamClosed.is_stream_closed());
        assert!(!DriverError::Internal("oops".into()).is_unreachable());
    }

    #[test]
    fn test_display_carries_detail() {
        let err = DriverError::Configuration("stream_rate: must divide sample_rate".into());
        assert!(err.to_string().contains("stream_rate"));
    }
}
