//! Domain Errors for Near Peer

use thiserror::Error;

/// Configuration rejected before any transport work was done.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("service type is empty")]
    EmptyServiceType,

    #[error("service type {0:?} is longer than 15 characters")]
    ServiceTypeTooLong(String),

    #[error("service type {value:?} contains invalid character {character:?}")]
    InvalidServiceTypeCharacter { value: String, character: char },

    #[error("service type {0:?} must contain at least one ASCII letter")]
    ServiceTypeWithoutLetter(String),

    #[error("service type {0:?} must not begin or end with a hyphen")]
    ServiceTypeHyphenEdge(String),

    #[error("display name is empty")]
    EmptyDisplayName,

    #[error("display name is {len} bytes, limit is 63")]
    DisplayNameTooLong { len: usize },

    #[error("max_peers must be at least 1")]
    InvalidMaxPeers,

    #[error("invitation timeout must be at least 1 second")]
    InvalidInvitationTimeout,

    #[error("discovery info entry {key:?} is {len} bytes, limit is 255")]
    MetadataEntryTooLarge { key: String, len: usize },

    #[error("failed to read {path}: {error}")]
    Io { path: String, error: String },

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Failures reported by the underlying transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("invitation rejected by peer")]
    Rejected,

    #[error("transport operation timed out")]
    Timeout,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("session closed")]
    Closed,
}

/// Errors returned by the public control API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NearPeerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Advertiser and/or browser could not start. The side that did start is
    /// left running; call `stop()` to clean up.
    #[error("startup failed (advertiser: {}, browser: {})", describe(.advertiser), describe(.browser))]
    StartupFailed {
        advertiser: Option<TransportError>,
        browser: Option<TransportError>,
    },

    #[error("transport unavailable: {0}")]
    TransportUnavailable(TransportError),

    #[error("component was never started")]
    NotInitialized,

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("no connected peers")]
    NotConnected,

    #[error("no active session")]
    SessionNotFound,

    #[error("send failed: {0}")]
    SendFailed(TransportError),

    #[error("payload encoding failed: {0}")]
    Encoding(String),
}

fn describe(side: &Option<TransportError>) -> String {
    match side {
        Some(err) => err.to_string(),
        None => "ok".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_failed_display_names_both_sides() {
        let err = NearPeerError::StartupFailed {
            advertiser: None,
            browser: Some(TransportError::Unavailable("radio off".into())),
        };
        assert_eq!(
            err.to_string(),
            "startup failed (advertiser: ok, browser: transport unavailable: radio off)"
        );
    }

    #[test]
    fn test_config_error_converts() {
        let err: NearPeerError = ConfigError::EmptyServiceType.into();
        assert_eq!(err, NearPeerError::Config(ConfigError::EmptyServiceType));
        assert_eq!(err.to_string(), "invalid configuration: service type is empty");
    }

    #[test]
    fn test_invalid_state_display() {
        let err = NearPeerError::InvalidState {
            operation: "suspend",
            state: "idle",
        };
        assert_eq!(err.to_string(), "cannot suspend while idle");
    }
}
