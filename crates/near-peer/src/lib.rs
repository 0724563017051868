//! # Near Peer
//!
//! Local peer discovery and session management over a nearby radio transport.
//!
//! A device advertises itself under a short service descriptor, browses for
//! others advertising the same one, filters them by discovery info and joins
//! them into a single multi-peer session bounded by `max_peers`. Applications
//! see two live event feeds (connection changes and received data) and a
//! broadcast `send`.
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture with:
//! - **Domain Layer:** identities, validation, metadata matching, peer slots
//! - **Ports Layer:** the `NearPeerApi` it exposes and the `Transport` it needs
//! - **Service Layer:** `Advertiser`, `Browser`, `Connection` and the `NearPeer`
//!   orchestrator
//! - **Adapters Layer:** system clock, config providers, in-memory transport
//!
//! ## Features
//!
//! - `toml-config` (default) - `TomlConfigProvider`
//! - `test-utils` - deterministic time sources
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use near_peer::{InMemoryNetwork, NearPeer, NearPeerConfig};
//!
//! # async fn run() -> Result<(), near_peer::NearPeerError> {
//! let network = InMemoryNetwork::new();
//! let near_peer = NearPeer::new(Arc::new(network.transport()));
//!
//! let mut events = near_peer.connection_events();
//! near_peer.start(NearPeerConfig::new("chat", "alice")).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if event.state.is_connected() {
//!         near_peer.send(b"hi".to_vec()).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// =============================================================================
// CORE MODULES
// =============================================================================

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

/// Test utilities (FixedTimeSource, ManualTimeSource)
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// =============================================================================
// RE-EXPORTS
// =============================================================================

// Domain
pub use domain::{
    discovery_info_matches, ConfigError, ConnectionEvent, DataEvent, DiscoveryInfoKey,
    DiscoveryMetadata, DisplayName, NearPeerConfig, NearPeerError, PeerConnectionState,
    PeerIdentity, RawDiscoveryInfo, ServiceDescriptor, Timestamp, TransportError,
    ValidatedConfig, ValidationMode,
};

// Port traits
pub use ports::{ConfigProvider, NearPeerApi, Session, TimeSource, Transport};

// Service
pub use service::{NearPeer, NearPeerState, Subscription, SubscriptionError};

// Adapters
pub use adapters::{
    InMemoryNetwork, InMemoryTransport, InvitePolicy, StaticConfigProvider, SystemTimeSource,
};

#[cfg(feature = "toml-config")]
pub use adapters::TomlConfigProvider;

#[cfg(feature = "test-utils")]
pub use test_utils::{FixedTimeSource, ManualTimeSource};
