//! # Peer Slots
//!
//! Admission control for the shared session: at most `max_peers` peers may be
//! invited, connecting or connected at any moment.
//!
//! - **Outbound**: reserved by the browser before it issues an invitation
//! - **Inbound**: reserved by the advertiser before it accepts an invitation
//!
//! A reservation that the transport never reports on expires after the
//! invitation timeout.

// Semantic submodules
mod manager;
mod types;

// Re-export public API
pub use manager::PeerSlots;
pub use types::{AdmitResult, SlotState, SlotStats};
