//! # Connection
//!
//! Owns the one session shared by the advertiser and the browser. Session
//! callbacks are drained by a single pump task and republished as
//! `ConnectionEvent`s and `DataEvent`s, in the order the transport reported
//! them.
//!
//! Every session mutation (invite, accept, send, disconnect) goes through the
//! connection's mutex, which is its serialized execution context.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::EventFeed;
use crate::domain::{
    AdmitResult, ConnectionEvent, DataEvent, NearPeerError, PeerConnectionState, PeerIdentity,
    PeerSlots, SlotStats,
};
use crate::ports::{InvitationReply, Session, SessionEvent, SessionId, TimeSource, Transport};

/// The feeds a connection publishes into.
#[derive(Clone)]
pub struct SessionFeeds {
    pub connection: EventFeed<ConnectionEvent>,
    pub data: EventFeed<DataEvent>,
}

impl SessionFeeds {
    pub fn new() -> Self {
        Self {
            connection: EventFeed::new("connection"),
            data: EventFeed::new("data"),
        }
    }

    pub fn close(&self) {
        self.connection.close();
        self.data.close();
    }
}

impl Default for SessionFeeds {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of `Connection::invite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteOutcome {
    /// Invitation handed to the transport.
    Invited,
    /// The peer already holds a slot; nothing was sent.
    AlreadyPresent,
    /// `max_peers` reached; nothing was sent.
    Full,
}

struct ConnectionInner {
    /// Latest state reported for any peer.
    state: PeerConnectionState,
    slots: PeerSlots,
    /// Last state reported per peer, including disconnected ones.
    last_known: HashMap<PeerIdentity, PeerConnectionState>,
    disconnected: bool,
}

/// Session holder for one epoch.
pub struct Connection {
    local: PeerIdentity,
    session: Arc<dyn Session>,
    inner: Arc<Mutex<ConnectionInner>>,
    time: Arc<dyn TimeSource>,
    invitation_timeout: Duration,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Create a session for `local` and start draining its callbacks.
    pub async fn open(
        transport: &dyn Transport,
        local: PeerIdentity,
        max_peers: usize,
        invitation_timeout: Duration,
        time: Arc<dyn TimeSource>,
        feeds: SessionFeeds,
    ) -> Result<Arc<Self>, NearPeerError> {
        let binding = transport
            .create_session(&local)
            .await
            .map_err(NearPeerError::TransportUnavailable)?;

        let inner = Arc::new(Mutex::new(ConnectionInner {
            state: PeerConnectionState::Disconnected,
            slots: PeerSlots::new(max_peers, invitation_timeout),
            last_known: HashMap::new(),
            disconnected: false,
        }));

        let pump = tokio::spawn(run_session_pump(
            binding.events,
            Arc::clone(&inner),
            feeds,
            Arc::clone(&time),
        ));

        info!(local = %local, session = binding.session.id().0, "Session created");

        Ok(Arc::new(Self {
            local,
            session: binding.session,
            inner,
            time,
            invitation_timeout,
            pump: parking_lot::Mutex::new(Some(pump)),
        }))
    }

    pub fn local_peer(&self) -> &PeerIdentity {
        &self.local
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    /// Latest state the transport reported for any peer.
    pub async fn state(&self) -> PeerConnectionState {
        self.inner.lock().await.state
    }

    /// Last state reported for `peer`, if any.
    pub async fn peer_state(&self, peer: &PeerIdentity) -> Option<PeerConnectionState> {
        self.inner.lock().await.last_known.get(peer).copied()
    }

    pub async fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.inner.lock().await.slots.connected_peers()
    }

    pub async fn connected_count(&self) -> usize {
        self.inner.lock().await.slots.connected_count()
    }

    pub async fn is_connected(&self, peer: &PeerIdentity) -> bool {
        self.inner.lock().await.slots.is_connected(peer)
    }

    pub async fn slot_stats(&self) -> SlotStats {
        self.inner.lock().await.slots.stats()
    }

    /// Invite `peer` into the session if a slot is free and it holds none yet.
    pub async fn invite(&self, peer: &PeerIdentity) -> Result<InviteOutcome, NearPeerError> {
        let mut inner = self.inner.lock().await;
        if inner.disconnected {
            return Err(NearPeerError::SessionNotFound);
        }

        match inner.slots.reserve_outbound(peer, self.time.now()) {
            AdmitResult::Admitted => {}
            AdmitResult::AlreadyPresent(_) => return Ok(InviteOutcome::AlreadyPresent),
            AdmitResult::Full => return Ok(InviteOutcome::Full),
        }

        if let Err(e) = self.session.invite(peer, self.invitation_timeout).await {
            inner.slots.release(peer);
            return Err(NearPeerError::TransportUnavailable(e));
        }

        debug!(peer = %peer, timeout_secs = self.invitation_timeout.as_secs(), "Invitation sent");
        Ok(InviteOutcome::Invited)
    }

    /// Answer an incoming invitation: accepted unless the session is full.
    pub async fn accept_invitation(&self, peer: &PeerIdentity, reply: InvitationReply) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.disconnected {
            reply.reject();
            return false;
        }

        match inner.slots.admit_inbound(peer, self.time.now()) {
            AdmitResult::Admitted => {
                reply.accept(self.session.id());
                debug!(peer = %peer, "Invitation accepted");
                true
            }
            outcome => {
                reply.reject();
                debug!(peer = %peer, ?outcome, "Invitation rejected");
                false
            }
        }
    }

    /// Send `data` to every connected peer in one transport call.
    pub async fn send(&self, data: &[u8]) -> Result<(), NearPeerError> {
        let inner = self.inner.lock().await;
        if inner.disconnected {
            return Err(NearPeerError::SessionNotFound);
        }

        let peers = inner.slots.connected_peers();
        if peers.is_empty() {
            return Err(NearPeerError::NotConnected);
        }

        self.session
            .send(data, &peers)
            .await
            .map_err(NearPeerError::SendFailed)?;
        debug!(peers = peers.len(), bytes = data.len(), "Payload sent");
        Ok(())
    }

    /// Send `data` to a subset of peers; every one of them must be connected.
    pub async fn send_to(&self, data: &[u8], peers: &[PeerIdentity]) -> Result<(), NearPeerError> {
        let inner = self.inner.lock().await;
        if inner.disconnected {
            return Err(NearPeerError::SessionNotFound);
        }
        if peers.is_empty() || !peers.iter().all(|p| inner.slots.is_connected(p)) {
            return Err(NearPeerError::NotConnected);
        }

        self.session
            .send(data, peers)
            .await
            .map_err(NearPeerError::SendFailed)
    }

    /// Leave the session. Idempotent.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if inner.disconnected {
            return;
        }
        inner.disconnected = true;

        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.session.disconnect().await;

        inner.slots.clear();
        inner.state = PeerConnectionState::Disconnected;
        info!(local = %self.local, "Session disconnected");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

async fn run_session_pump(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    inner: Arc<Mutex<ConnectionInner>>,
    feeds: SessionFeeds,
    time: Arc<dyn TimeSource>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::StateChanged { peer, state } => {
                let mut guard = inner.lock().await;
                if guard.disconnected {
                    continue;
                }
                guard.slots.apply(&peer, state);
                guard.last_known.insert(peer.clone(), state);
                guard.state = state;

                info!(peer = %peer, %state, "Peer state changed");
                // Publish under the lock so snapshots never lag behind events.
                feeds.connection.publish(ConnectionEvent {
                    peer,
                    state,
                    timestamp: time.now(),
                });
            }
            SessionEvent::DataReceived { peer, data } => {
                if inner.lock().await.disconnected {
                    continue;
                }
                debug!(peer = %peer, bytes = data.len(), "Data received");
                feeds.data.publish(DataEvent {
                    peer,
                    payload: data,
                    timestamp: time.now(),
                });
            }
            SessionEvent::CertificateReceived { peer, reply } => {
                // Trust comes from the discovery-info match, not certificates.
                debug!(peer = %peer, "Accepting peer certificate");
                reply.respond(true);
            }
        }
    }
    warn!("Session event stream ended");
}
