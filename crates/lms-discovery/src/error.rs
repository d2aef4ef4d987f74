//! Error types for the discovery service.

use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur while operating the discovery service.
///
/// Only programmer errors surface here; runtime socket failures are
/// reported as [`DiscoveryEvent::Error`](crate::DiscoveryEvent::Error) so
/// the service can keep running through them.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// `start()` called while the service is already running.
    #[error("discovery service is already running")]
    AlreadyStarted,

    /// The supplied configuration failed validation.
    #[error("invalid discovery configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_display_carries_reason() {
        let err = DiscoveryError::InvalidConfig("discovered_ttl_ms (1000) too small".to_string());
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: DiscoveryError = io.into();
        assert!(matches!(err, DiscoveryError::Io(_)));
    }
}
