//! # In-Memory Nearby Network
//!
//! A loopback stand-in for the radio transport. Every `InMemoryTransport`
//! taken from one `InMemoryNetwork` is a device in range of all the others:
//! advertisements show up in every browser on the same service, invitations
//! land on the target's advertiser, and linked sessions exchange data.
//!
//! Scripted virtual peers and fault toggles cover the paths real devices
//! rarely hit on demand (rejections, ignored invitations, radio failures).

mod session;
mod transport;


pub use session::InMemorySession;
pub use transport::InMemoryTransport;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::domain::{PeerConnectionState, PeerIdentity, RawDiscoveryInfo, TransportError};
use crate::ports::{
    AdvertiserEvent, BrowseEvent, CertificateReply, InvitationReply, SessionEvent,
};

/// How a virtual peer answers invitations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvitePolicy {
    #[default]
    Accept,
    Reject,
    /// Never answer; the invitation times out.
    Ignore,
}

/// Call counters and live registrations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub advertise_calls: usize,
    pub browse_calls: usize,
    pub invite_calls: usize,
    pub send_calls: usize,
    pub active_advertisers: usize,
    pub active_browsers: usize,
    pub open_sessions: usize,
}

/// Shared medium for in-memory transports.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new device on this network.
    pub fn transport(&self) -> InMemoryTransport {
        InMemoryTransport::new(Arc::clone(&self.state))
    }

    /// Bring a scripted peer into range, advertising `service`.
    pub fn announce(
        &self,
        name: &str,
        service: &str,
        info: Option<RawDiscoveryInfo>,
        policy: InvitePolicy,
    ) -> PeerIdentity {
        let peer = PeerIdentity::new(name);
        let mut state = self.state.lock();

        for browser in state.browsers.values().filter(|b| b.service == service) {
            let _ = browser.events.send(BrowseEvent::PeerFound {
                peer: peer.clone(),
                info: info.clone(),
            });
        }
        state.virtual_peers.insert(
            peer.clone(),
            VirtualPeer {
                service: service.to_owned(),
                info,
                policy,
                inbox: Vec::new(),
            },
        );
        peer
    }

    /// Take a scripted peer out of range; its session links drop.
    pub fn withdraw(&self, peer: &PeerIdentity) {
        let mut state = self.state.lock();
        let Some(virtual_peer) = state.virtual_peers.remove(peer) else {
            return;
        };

        for browser in state
            .browsers
            .values()
            .filter(|b| b.service == virtual_peer.service)
        {
            let _ = browser
                .events
                .send(BrowseEvent::PeerLost { peer: peer.clone() });
        }
        for session in state.sessions.values_mut() {
            if session.members.remove(peer).is_some() {
                let _ = session.events.send(SessionEvent::StateChanged {
                    peer: peer.clone(),
                    state: PeerConnectionState::Disconnected,
                });
            }
        }
    }

    /// Have scripted peer `from` invite device `to`, and wait for the answer.
    pub async fn invite_from(
        &self,
        from: &PeerIdentity,
        to: &PeerIdentity,
        timeout: Duration,
    ) -> Result<bool, TransportError> {
        let answer = {
            let state = self.state.lock();
            let advertiser = state
                .advertisers
                .values()
                .find(|a| a.identity == *to)
                .ok_or_else(|| TransportError::Unavailable(format!("{to} is not advertising")))?;

            let (reply, answer) = InvitationReply::channel();
            advertiser
                .events
                .send(AdvertiserEvent::InvitationReceived {
                    peer: from.clone(),
                    reply,
                })
                .map_err(|_| TransportError::Closed)?;
            answer
        };

        let session = match tokio::time::timeout(timeout, answer).await {
            Ok(Ok(Some(session))) => session,
            Ok(Ok(None)) | Ok(Err(_)) => return Ok(false),
            Err(_) => return Err(TransportError::Timeout),
        };

        let mut state = self.state.lock();
        let Some(entry) = state.sessions.get_mut(&session.0) else {
            return Err(TransportError::Closed);
        };
        entry.members.insert(from.clone(), Link::Virtual);
        entry.certify(from);
        entry.report(from, PeerConnectionState::Connecting);
        entry.report(from, PeerConnectionState::Connected);
        Ok(true)
    }

    /// Deliver `data` from scripted peer `from` to device `to`.
    pub fn push_data(
        &self,
        from: &PeerIdentity,
        to: &PeerIdentity,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let state = self.state.lock();
        let session = state
            .sessions
            .values()
            .find(|s| s.owner == *to && s.members.contains_key(from))
            .ok_or_else(|| TransportError::SendFailed(format!("{from} is not linked to {to}")))?;

        session
            .events
            .send(SessionEvent::DataReceived {
                peer: from.clone(),
                data: data.to_vec(),
            })
            .map_err(|_| TransportError::Closed)
    }

    /// Payloads a scripted peer has received, oldest first.
    pub fn received_by(&self, peer: &PeerIdentity) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .virtual_peers
            .get(peer)
            .map(|p| p.inbox.clone())
            .unwrap_or_default()
    }

    /// Make subsequent `advertise` calls fail (or succeed again with `None`).
    pub fn set_advertise_failure(&self, failure: Option<TransportError>) {
        self.state.lock().faults.advertise = failure;
    }

    pub fn set_browse_failure(&self, failure: Option<TransportError>) {
        self.state.lock().faults.browse = failure;
    }

    pub fn set_send_failure(&self, failure: Option<TransportError>) {
        self.state.lock().faults.send = failure;
    }

    /// Report an asynchronous failure to every active advertiser.
    pub fn fail_advertisers(&self, reason: TransportError) {
        let mut state = self.state.lock();
        for (_, advertiser) in state.advertisers.drain() {
            let _ = advertiser.events.send(AdvertiserEvent::Failed {
                reason: reason.clone(),
            });
        }
    }

    /// Report an asynchronous failure to every active browser.
    pub fn fail_browsers(&self, reason: TransportError) {
        let mut state = self.state.lock();
        for (_, browser) in state.browsers.drain() {
            let _ = browser.events.send(BrowseEvent::Failed {
                reason: reason.clone(),
            });
        }
    }

    pub fn stats(&self) -> NetworkStats {
        let state = self.state.lock();
        NetworkStats {
            active_advertisers: state.advertisers.len(),
            active_browsers: state.browsers.len(),
            open_sessions: state.sessions.len(),
            ..state.counters
        }
    }
}

// =============================================================================
// Shared state
// =============================================================================

#[derive(Default)]
pub(crate) struct NetworkState {
    next_id: u64,
    advertisers: HashMap<u64, AdvertiserEntry>,
    browsers: HashMap<u64, BrowserEntry>,
    sessions: HashMap<u64, SessionEntry>,
    virtual_peers: HashMap<PeerIdentity, VirtualPeer>,
    faults: Faults,
    counters: NetworkStats,
}

impl NetworkState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_linked(&self, session: u64, peer: &PeerIdentity) -> bool {
        self.sessions
            .get(&session)
            .is_some_and(|s| s.members.contains_key(peer))
    }

    /// Join two device sessions after an accepted invitation.
    fn link(&mut self, inviter: u64, acceptor: u64, peer: &PeerIdentity) {
        let (Some(inviter_owner), Some(acceptor_owner)) = (
            self.sessions.get(&inviter).map(|s| s.owner.clone()),
            self.sessions.get(&acceptor).map(|s| s.owner.clone()),
        ) else {
            if let Some(session) = self.sessions.get(&inviter) {
                session.report(peer, PeerConnectionState::Disconnected);
            }
            return;
        };
        if self.is_linked(inviter, &acceptor_owner) {
            return;
        }

        if let Some(session) = self.sessions.get_mut(&inviter) {
            session
                .members
                .insert(acceptor_owner.clone(), Link::Session(acceptor));
            session.certify(&acceptor_owner);
            session.report(&acceptor_owner, PeerConnectionState::Connected);
        }
        if let Some(session) = self.sessions.get_mut(&acceptor) {
            session
                .members
                .insert(inviter_owner.clone(), Link::Session(inviter));
            session.certify(&inviter_owner);
            session.report(&inviter_owner, PeerConnectionState::Connecting);
            session.report(&inviter_owner, PeerConnectionState::Connected);
        }
    }
}

#[derive(Default)]
struct Faults {
    advertise: Option<TransportError>,
    browse: Option<TransportError>,
    send: Option<TransportError>,
}

struct AdvertiserEntry {
    identity: PeerIdentity,
    service: String,
    info: Option<RawDiscoveryInfo>,
    events: mpsc::UnboundedSender<AdvertiserEvent>,
}

struct BrowserEntry {
    identity: PeerIdentity,
    service: String,
    events: mpsc::UnboundedSender<BrowseEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    /// Another device's session.
    Session(u64),
    Virtual,
}

struct SessionEntry {
    owner: PeerIdentity,
    events: mpsc::UnboundedSender<SessionEvent>,
    members: HashMap<PeerIdentity, Link>,
}

impl SessionEntry {
    fn report(&self, peer: &PeerIdentity, state: PeerConnectionState) {
        let _ = self.events.send(SessionEvent::StateChanged {
            peer: peer.clone(),
            state,
        });
    }

    fn certify(&self, peer: &PeerIdentity) {
        let (reply, _answer) = CertificateReply::channel();
        let _ = self.events.send(SessionEvent::CertificateReceived {
            peer: peer.clone(),
            reply,
        });
    }
}

struct VirtualPeer {
    service: String,
    info: Option<RawDiscoveryInfo>,
    policy: InvitePolicy,
    inbox: Vec<Vec<u8>>,
}
