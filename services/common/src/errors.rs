//! Common error types for external collaborators

use thiserror::Error;

/// Failure of a call into an external service (servicer, oracle, auction,
/// offer locker, instrument)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The call reached the service and was rejected
    #[error("{service} call failed: {reason}")]
    CallFailed {
        service: &'static str,
        reason: String,
    },

    /// The service could not be reached at all
    #[error("Service unavailable: {0}")]
    Unavailable(&'static str),
}

impl ServiceError {
    /// Shorthand for a rejected call
    pub fn call_failed(service: &'static str, reason: impl Into<String>) -> Self {
        Self::CallFailed {
            service,
            reason: reason.into(),
        }
    }

    /// Name of the service that failed
    #[must_use]
    pub const fn service(&self) -> &'static str {
        match self {
            Self::CallFailed { service, .. } | Self::Unavailable(service) => service,
        }
    }
}
