//! Peer slot types.

use crate::domain::Timestamp;

/// What a slot is currently held for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Invitation issued or accepted; the transport has not reported yet.
    Pending { since: Timestamp },
    /// Transport reported `connecting`.
    Connecting,
    /// Transport reported `connected`.
    Connected,
}

/// Outcome of asking for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitResult {
    /// A slot was reserved for the peer.
    Admitted,
    /// The peer already holds a slot in the given state.
    AlreadyPresent(SlotState),
    /// Every slot is taken.
    Full,
}

/// Slot statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    /// Peers the transport reports as connected.
    pub connected: usize,
    /// Peers pending or connecting.
    pub in_flight: usize,
    /// Configured limit.
    pub max_peers: usize,
}
