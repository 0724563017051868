//! # Near Peer Service
//!
//! The four runtime components and the event feeds they publish into.
//!
//! - `Advertiser` announces presence and admits invitations
//! - `Browser` discovers, filters and invites peers
//! - `Connection` owns the session and republishes its callbacks
//! - `NearPeer` coordinates them per start..stop epoch

// Semantic submodules
mod advertiser;
mod browser;
mod connection;
mod events;
mod orchestrator;

/// Join handle of a discovery pump, held outside the async state lock so
/// `Drop` can always abort it.
type PumpSlot = std::sync::Arc<parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>>;

// Re-export public API
pub use advertiser::Advertiser;
pub use browser::Browser;
pub use connection::{Connection, InviteOutcome, SessionFeeds};
pub use events::{EventFeed, Subscription, SubscriptionError};
pub use orchestrator::{NearPeer, NearPeerState};

#[cfg(test)]
mod tests;
