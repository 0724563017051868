//! `Transport` implementation over the in-memory network.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::{AdvertiserEntry, BrowserEntry, InMemorySession, NetworkState, SessionEntry};
use crate::domain::{
    DisplayName, PeerIdentity, RawDiscoveryInfo, ServiceDescriptor, TransportError,
};
use crate::ports::{
    AdvertiseHandle, Advertisement, BrowseEvent, BrowseHandle, Browsing, SessionBinding,
    SessionId, Transport,
};

/// One device on an `InMemoryNetwork`.
#[derive(Clone)]
pub struct InMemoryTransport {
    state: Arc<Mutex<NetworkState>>,
}

impl InMemoryTransport {
    pub(super) fn new(state: Arc<Mutex<NetworkState>>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn create_local_identity(&self, display_name: &DisplayName) -> PeerIdentity {
        PeerIdentity::new(display_name.as_str())
    }

    async fn advertise(
        &self,
        identity: &PeerIdentity,
        service: &ServiceDescriptor,
        info: Option<&RawDiscoveryInfo>,
    ) -> Result<Advertisement, TransportError> {
        let mut state = self.state.lock();
        state.counters.advertise_calls += 1;
        if let Some(failure) = state.faults.advertise.clone() {
            return Err(failure);
        }

        let handle = state.next_id();
        let (events, rx) = mpsc::unbounded_channel();

        for browser in state
            .browsers
            .values()
            .filter(|b| b.service == service.as_str() && b.identity != *identity)
        {
            let _ = browser.events.send(BrowseEvent::PeerFound {
                peer: identity.clone(),
                info: info.cloned(),
            });
        }
        state.advertisers.insert(
            handle,
            AdvertiserEntry {
                identity: identity.clone(),
                service: service.as_str().to_owned(),
                info: info.cloned(),
                events,
            },
        );

        trace!(peer = %identity, service = %service, handle, "advertise");
        Ok(Advertisement {
            handle: AdvertiseHandle(handle),
            events: rx,
        })
    }

    async fn stop_advertising(&self, handle: AdvertiseHandle) {
        let mut state = self.state.lock();
        let Some(entry) = state.advertisers.remove(&handle.0) else {
            return;
        };
        if state.advertisers.values().any(|a| a.identity == entry.identity) {
            return;
        }

        for browser in state
            .browsers
            .values()
            .filter(|b| b.service == entry.service && b.identity != entry.identity)
        {
            let _ = browser.events.send(BrowseEvent::PeerLost {
                peer: entry.identity.clone(),
            });
        }
    }

    async fn browse(
        &self,
        identity: &PeerIdentity,
        service: &ServiceDescriptor,
    ) -> Result<Browsing, TransportError> {
        let mut state = self.state.lock();
        state.counters.browse_calls += 1;
        if let Some(failure) = state.faults.browse.clone() {
            return Err(failure);
        }

        let handle = state.next_id();
        let (events, rx) = mpsc::unbounded_channel();

        let in_range = state
            .advertisers
            .values()
            .filter(|a| a.service == service.as_str() && a.identity != *identity)
            .map(|a| (a.identity.clone(), a.info.clone()))
            .chain(
                state
                    .virtual_peers
                    .iter()
                    .filter(|(_, p)| p.service == service.as_str())
                    .map(|(peer, p)| (peer.clone(), p.info.clone())),
            );
        for (peer, info) in in_range {
            let _ = events.send(BrowseEvent::PeerFound { peer, info });
        }

        state.browsers.insert(
            handle,
            BrowserEntry {
                identity: identity.clone(),
                service: service.as_str().to_owned(),
                events,
            },
        );

        trace!(peer = %identity, service = %service, handle, "browse");
        Ok(Browsing {
            handle: BrowseHandle(handle),
            events: rx,
        })
    }

    async fn stop_browsing(&self, handle: BrowseHandle) {
        self.state.lock().browsers.remove(&handle.0);
    }

    async fn create_session(&self, identity: &PeerIdentity) -> Result<SessionBinding, TransportError> {
        let mut state = self.state.lock();
        let id = state.next_id();
        let (events, rx) = mpsc::unbounded_channel();
        state.sessions.insert(
            id,
            SessionEntry {
                owner: identity.clone(),
                events,
                members: Default::default(),
            },
        );

        Ok(SessionBinding {
            session: Arc::new(InMemorySession::new(
                SessionId(id),
                identity.clone(),
                Arc::clone(&self.state),
            )),
            events: rx,
        })
    }
}
