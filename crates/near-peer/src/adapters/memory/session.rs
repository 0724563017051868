//! `Session` implementation over the in-memory network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{InvitePolicy, Link, NetworkState};
use crate::domain::{PeerConnectionState, PeerIdentity, TransportError};
use crate::ports::{AdvertiserEvent, InvitationReply, Session, SessionEvent, SessionId};

pub struct InMemorySession {
    id: SessionId,
    owner: PeerIdentity,
    state: Arc<Mutex<NetworkState>>,
}

impl InMemorySession {
    pub(super) fn new(id: SessionId, owner: PeerIdentity, state: Arc<Mutex<NetworkState>>) -> Self {
        Self { id, owner, state }
    }

    fn invite_virtual(
        &self,
        state: &mut NetworkState,
        peer: &PeerIdentity,
        policy: InvitePolicy,
        timeout: Duration,
    ) {
        let Some(session) = state.sessions.get_mut(&self.id.0) else {
            return;
        };
        session.report(peer, PeerConnectionState::Connecting);

        match policy {
            InvitePolicy::Accept => {
                session.members.insert(peer.clone(), Link::Virtual);
                session.certify(peer);
                session.report(peer, PeerConnectionState::Connected);
            }
            InvitePolicy::Reject => session.report(peer, PeerConnectionState::Disconnected),
            InvitePolicy::Ignore => {
                let network = Arc::clone(&self.state);
                let session_id = self.id.0;
                let peer = peer.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let state = network.lock();
                    if !state.is_linked(session_id, &peer) {
                        if let Some(session) = state.sessions.get(&session_id) {
                            session.report(&peer, PeerConnectionState::Disconnected);
                        }
                    }
                });
            }
        }
    }
}

#[async_trait]
impl Session for InMemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn invite(&self, peer: &PeerIdentity, timeout: Duration) -> Result<(), TransportError> {
        let answer = {
            let mut state = self.state.lock();
            state.counters.invite_calls += 1;

            let session = state.sessions.get(&self.id.0).ok_or(TransportError::Closed)?;
            if session.members.contains_key(peer) {
                return Ok(());
            }

            if let Some(policy) = state.virtual_peers.get(peer).map(|p| p.policy) {
                self.invite_virtual(&mut state, peer, policy, timeout);
                return Ok(());
            }

            let advertiser = state
                .advertisers
                .values()
                .find(|a| a.identity == *peer)
                .ok_or_else(|| TransportError::Unavailable(format!("{peer} is not advertising")))?;

            let (reply, answer) = InvitationReply::channel();
            advertiser
                .events
                .send(AdvertiserEvent::InvitationReceived {
                    peer: self.owner.clone(),
                    reply,
                })
                .map_err(|_| TransportError::Unavailable(format!("{peer} stopped advertising")))?;

            if let Some(session) = state.sessions.get(&self.id.0) {
                session.report(peer, PeerConnectionState::Connecting);
            }
            answer
        };

        tokio::spawn(settle_invitation(
            Arc::clone(&self.state),
            self.id.0,
            peer.clone(),
            answer,
            timeout,
        ));
        Ok(())
    }

    async fn send(&self, data: &[u8], peers: &[PeerIdentity]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.counters.send_calls += 1;
        if let Some(failure) = state.faults.send.clone() {
            return Err(failure);
        }

        let session = state.sessions.get(&self.id.0).ok_or(TransportError::Closed)?;
        let mut targets = Vec::with_capacity(peers.len());
        for peer in peers {
            match session.members.get(peer) {
                Some(link) => targets.push((peer.clone(), *link)),
                None => {
                    return Err(TransportError::SendFailed(format!("{peer} is not connected")))
                }
            }
        }

        for (peer, link) in targets {
            match link {
                Link::Session(remote) => {
                    if let Some(remote) = state.sessions.get(&remote) {
                        let _ = remote.events.send(SessionEvent::DataReceived {
                            peer: self.owner.clone(),
                            data: data.to_vec(),
                        });
                    }
                }
                Link::Virtual => {
                    if let Some(virtual_peer) = state.virtual_peers.get_mut(&peer) {
                        virtual_peer.inbox.push(data.to_vec());
                    }
                }
            }
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock();
        let Some(entry) = state.sessions.remove(&self.id.0) else {
            return;
        };

        for (_, link) in entry.members {
            if let Link::Session(remote) = link {
                if let Some(remote) = state.sessions.get_mut(&remote) {
                    remote.members.remove(&self.owner);
                    remote.report(&self.owner, PeerConnectionState::Disconnected);
                }
            }
        }
    }
}

async fn settle_invitation(
    network: Arc<Mutex<NetworkState>>,
    inviter: u64,
    peer: PeerIdentity,
    answer: oneshot::Receiver<Option<SessionId>>,
    timeout: Duration,
) {
    let accepted = match tokio::time::timeout(timeout, answer).await {
        Ok(Ok(Some(session))) => Some(session),
        _ => None,
    };

    let mut state = network.lock();
    match accepted {
        Some(acceptor) => state.link(inviter, acceptor.0, &peer),
        None => {
            // Both sides often invite each other; the other invitation may have linked us.
            if !state.is_linked(inviter, &peer) {
                if let Some(session) = state.sessions.get(&inviter) {
                    session.report(&peer, PeerConnectionState::Disconnected);
                }
            }
        }
    }
}
