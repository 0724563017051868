//! Core Domain Entities for Near Peer
//!
//! Identities, session states and the two event types the subsystem publishes.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Opaque handle for a local or remote endpoint.
///
/// Two identities are equal only when they were minted for the same endpoint;
/// the display name is informational and several peers may share one.
#[derive(Clone)]
pub struct PeerIdentity {
    id: Uuid,
    display_name: Arc<str>,
}

impl PeerIdentity {
    /// Mint a fresh identity carrying `display_name`.
    pub fn new(display_name: impl Into<Arc<str>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
        }
    }

    /// Rebuild an identity from a known id (used by transports that receive
    /// identities over the air).
    pub fn from_parts(id: Uuid, display_name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }

    /// Unique endpoint id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Human-readable name advertised with this identity.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl PartialEq for PeerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerIdentity {}

impl Hash for PeerIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerIdentity")
            .field("id", &self.id)
            .field("display_name", &&*self.display_name)
            .finish()
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.display_name, &self.id.simple().to_string()[..8])
    }
}

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from milliseconds since the epoch.
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the epoch.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed between `earlier` and `self` (zero if `earlier` is later).
    pub fn millis_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Session state of a single peer as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerConnectionState {
    /// Invitation accepted, handshake in progress.
    Connecting,
    /// Peer is part of the session and can receive data.
    Connected,
    /// Peer left the session, or never made it in.
    Disconnected,
}

impl PeerConnectionState {
    /// True for `Connected`.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A peer changed state inside the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub peer: PeerIdentity,
    pub state: PeerConnectionState,
    pub timestamp: Timestamp,
}

/// One message received from a peer. The payload is opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEvent {
    pub peer: PeerIdentity,
    pub payload: Vec<u8>,
    pub timestamp: Timestamp,
}

impl DataEvent {
    /// Decode a payload produced by `NearPeer::send_value`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}
