//! Peer slots manager implementation.

use std::time::Duration;

use super::types::{AdmitResult, SlotState, SlotStats};
use crate::domain::{PeerConnectionState, PeerIdentity, Timestamp};

/// Tracks which peers occupy the session, in arrival order.
#[derive(Debug)]
pub struct PeerSlots {
    slots: Vec<(PeerIdentity, SlotState)>,
    max_peers: usize,
    pending_timeout: Duration,
}

impl PeerSlots {
    /// Create a new slots manager.
    pub fn new(max_peers: usize, pending_timeout: Duration) -> Self {
        Self {
            slots: Vec::new(),
            max_peers,
            pending_timeout,
        }
    }

    pub fn max_peers(&self) -> usize {
        self.max_peers
    }

    /// Number of slots in use (pending, connecting or connected).
    pub fn occupied(&self) -> usize {
        self.slots.len()
    }

    /// Check if a slot is available
    pub fn has_free_slot(&self) -> bool {
        self.occupied() < self.max_peers
    }

    /// Reserve a slot before inviting `peer`.
    pub fn reserve_outbound(&mut self, peer: &PeerIdentity, now: Timestamp) -> AdmitResult {
        self.expire_pending(now);

        if let Some(state) = self.state_of(peer) {
            return AdmitResult::AlreadyPresent(state);
        }
        if !self.has_free_slot() {
            return AdmitResult::Full;
        }

        self.slots
            .push((peer.clone(), SlotState::Pending { since: now }));
        AdmitResult::Admitted
    }

    /// Decide whether an invitation from `peer` may be accepted.
    ///
    /// A peer we are already inviting or connecting with keeps its slot; both
    /// sides commonly invite each other at once.
    pub fn admit_inbound(&mut self, peer: &PeerIdentity, now: Timestamp) -> AdmitResult {
        self.expire_pending(now);

        match self.state_of(peer) {
            Some(SlotState::Connected) => AdmitResult::AlreadyPresent(SlotState::Connected),
            Some(_) => AdmitResult::Admitted,
            None if !self.has_free_slot() => AdmitResult::Full,
            None => {
                self.slots
                    .push((peer.clone(), SlotState::Pending { since: now }));
                AdmitResult::Admitted
            }
        }
    }

    /// Give a reservation back (the invitation could not be issued).
    pub fn release(&mut self, peer: &PeerIdentity) {
        self.slots.retain(|(p, _)| p != peer);
    }

    /// Mirror a state reported by the transport.
    ///
    /// Reports are authoritative: a peer the transport says is connecting or
    /// connected gets a slot even if the limit is already reached.
    pub fn apply(&mut self, peer: &PeerIdentity, state: PeerConnectionState) {
        let slot = match state {
            PeerConnectionState::Connecting => SlotState::Connecting,
            PeerConnectionState::Connected => SlotState::Connected,
            PeerConnectionState::Disconnected => {
                self.release(peer);
                return;
            }
        };

        match self.slots.iter_mut().find(|(p, _)| p == peer) {
            Some(entry) => entry.1 = slot,
            None => self.slots.push((peer.clone(), slot)),
        }
    }

    /// Drop pending reservations older than the invitation timeout.
    pub fn expire_pending(&mut self, now: Timestamp) -> usize {
        let timeout_ms = u64::try_from(self.pending_timeout.as_millis()).unwrap_or(u64::MAX);
        let before = self.slots.len();
        self.slots.retain(|(_, state)| match state {
            SlotState::Pending { since } => now.millis_since(*since) < timeout_ms,
            _ => true,
        });
        before - self.slots.len()
    }

    pub fn state_of(&self, peer: &PeerIdentity) -> Option<SlotState> {
        self.slots
            .iter()
            .find(|(p, _)| p == peer)
            .map(|(_, state)| *state)
    }

    /// Check if a peer is connected
    pub fn is_connected(&self, peer: &PeerIdentity) -> bool {
        self.state_of(peer) == Some(SlotState::Connected)
    }

    /// Connected peers in the order they joined.
    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.slots
            .iter()
            .filter(|(_, state)| *state == SlotState::Connected)
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|(_, state)| *state == SlotState::Connected)
            .count()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Get statistics
    pub fn stats(&self) -> SlotStats {
        let connected = self.connected_count();
        SlotStats {
            connected,
            in_flight: self.slots.len() - connected,
            max_peers: self.max_peers,
        }
    }
}
