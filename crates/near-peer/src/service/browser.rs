//! # Browser
//!
//! Searches for peers advertising the same service descriptor, keeps the set
//! of peers currently in range and invites the ones whose discovery info
//! matches, as long as the session has room.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::connection::{Connection, InviteOutcome};
use super::PumpSlot;
use crate::domain::{
    discovery_info_matches, DiscoveryMetadata, NearPeerError, PeerIdentity, RawDiscoveryInfo,
    ServiceDescriptor, TransportError,
};
use crate::ports::{BrowseEvent, BrowseHandle, Transport};

type DiscoveredSet = Arc<parking_lot::Mutex<HashMap<PeerIdentity, Option<RawDiscoveryInfo>>>>;

#[derive(Debug, Clone)]
struct BrowseParams {
    service: ServiceDescriptor,
    required: Option<DiscoveryMetadata>,
}

#[derive(Default)]
struct BrowserState {
    params: Option<BrowseParams>,
    handle: Option<BrowseHandle>,
    is_browsing: bool,
    last_failure: Option<TransportError>,
}

pub struct Browser {
    transport: Arc<dyn Transport>,
    connection: Arc<Connection>,
    state: Arc<Mutex<BrowserState>>,
    pump: PumpSlot,
    discovered: DiscoveredSet,
}

impl Browser {
    pub fn new(transport: Arc<dyn Transport>, connection: Arc<Connection>) -> Self {
        Self {
            transport,
            connection,
            state: Arc::new(Mutex::new(BrowserState::default())),
            pump: PumpSlot::default(),
            discovered: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    /// Begin browsing. Peers whose info fails to match `required` are kept
    /// in the discovered set but never invited. A no-op while browsing.
    pub async fn start(
        &self,
        service: ServiceDescriptor,
        required: Option<&DiscoveryMetadata>,
    ) -> Result<(), NearPeerError> {
        let mut state = self.state.lock().await;
        if state.is_browsing {
            debug!(service = %service, "Already browsing");
            return Ok(());
        }

        state.params = Some(BrowseParams {
            service,
            required: required.cloned(),
        });
        self.begin(&mut state).await
    }

    /// Stop browsing, forget the parameters and the discovered set.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.halt(&mut state).await;
        state.params = None;
        self.discovered.lock().clear();
    }

    /// Stop browsing but keep the parameters for `resume`.
    pub async fn suspend(&self) {
        let mut state = self.state.lock().await;
        self.halt(&mut state).await;
    }

    /// Browse again with the parameters given at `start`.
    pub async fn resume(&self) -> Result<(), NearPeerError> {
        let mut state = self.state.lock().await;
        if state.params.is_none() {
            return Err(NearPeerError::NotInitialized);
        }
        if state.is_browsing {
            return Ok(());
        }
        self.begin(&mut state).await
    }

    pub async fn is_browsing(&self) -> bool {
        self.state.lock().await.is_browsing
    }

    pub async fn last_failure(&self) -> Option<TransportError> {
        self.state.lock().await.last_failure.clone()
    }

    /// Peers currently in range, matching or not.
    pub fn discovered_peers(&self) -> Vec<PeerIdentity> {
        self.discovered.lock().keys().cloned().collect()
    }

    async fn begin(&self, state: &mut BrowserState) -> Result<(), NearPeerError> {
        let params = state.params.clone().ok_or(NearPeerError::NotInitialized)?;

        let browsing = match self
            .transport
            .browse(self.connection.local_peer(), &params.service)
            .await
        {
            Ok(browsing) => browsing,
            Err(e) => {
                warn!(service = %params.service, error = %e, "Browsing failed to start");
                state.last_failure = Some(e.clone());
                return Err(NearPeerError::TransportUnavailable(e));
            }
        };

        let handle = browsing.handle;
        state.handle = Some(handle);
        state.is_browsing = true;
        state.last_failure = None;
        *self.pump.lock() = Some(tokio::spawn(run_browser_pump(
            browsing.events,
            BrowsePump {
                handle,
                required: params.required,
                state: Arc::clone(&self.state),
                slot: Arc::clone(&self.pump),
                discovered: Arc::clone(&self.discovered),
                connection: Arc::clone(&self.connection),
            },
        )));

        info!(service = %params.service, handle = handle.0, "Browsing started");
        Ok(())
    }

    async fn halt(&self, state: &mut BrowserState) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        if let Some(handle) = state.handle.take() {
            self.transport.stop_browsing(handle).await;
            info!(handle = handle.0, "Browsing stopped");
        }
        state.is_browsing = false;
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

struct BrowsePump {
    handle: BrowseHandle,
    required: Option<DiscoveryMetadata>,
    state: Arc<Mutex<BrowserState>>,
    slot: PumpSlot,
    discovered: DiscoveredSet,
    connection: Arc<Connection>,
}

impl BrowsePump {
    async fn peer_found(&self, peer: PeerIdentity, info: Option<RawDiscoveryInfo>) {
        let matches = discovery_info_matches(self.required.as_ref(), info.as_ref());
        self.discovered.lock().insert(peer.clone(), info);

        if !matches {
            debug!(peer = %peer, "Discovery info mismatch, not inviting");
            return;
        }

        match self.connection.invite(&peer).await {
            Ok(InviteOutcome::Invited) => info!(peer = %peer, "Peer found, invited"),
            Ok(outcome) => debug!(peer = %peer, ?outcome, "Peer found, not invited"),
            Err(e) => warn!(peer = %peer, error = %e, "Invitation failed"),
        }
    }

    async fn failed(&self, reason: TransportError) {
        let mut state = self.state.lock().await;
        if state.handle == Some(self.handle) {
            state.handle = None;
            self.slot.lock().take();
            state.is_browsing = false;
            state.last_failure = Some(reason.clone());
            warn!(handle = self.handle.0, error = %reason, "Browsing failed");
        }
    }
}

async fn run_browser_pump(mut events: mpsc::UnboundedReceiver<BrowseEvent>, pump: BrowsePump) {
    while let Some(event) = events.recv().await {
        match event {
            BrowseEvent::PeerFound { peer, info } => pump.peer_found(peer, info).await,
            BrowseEvent::PeerLost { peer } => {
                pump.discovered.lock().remove(&peer);
                debug!(peer = %peer, "Peer lost");
            }
            BrowseEvent::Failed { reason } => {
                pump.failed(reason).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapters::InMemoryNetwork;
    use crate::domain::DisplayName;
    use crate::service::SessionFeeds;
    use crate::test_utils::FixedTimeSource;

    #[tokio::test]
    async fn test_drop_aborts_pump_while_state_is_locked() {
        let network = InMemoryNetwork::new();
        let transport: Arc<dyn Transport> = Arc::new(network.transport());
        let local = transport.create_local_identity(&DisplayName::parse("local").unwrap());
        let connection = Connection::open(
            transport.as_ref(),
            local,
            1,
            Duration::from_secs(1),
            Arc::new(FixedTimeSource::new(1_000)),
            SessionFeeds::new(),
        )
        .await
        .unwrap();

        let browser = Browser::new(Arc::clone(&transport), Arc::clone(&connection));
        browser
            .start(ServiceDescriptor::parse("chat").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(Arc::strong_count(&connection), 3);

        let state = Arc::clone(&browser.state);
        let _guard = state.lock().await;
        drop(browser);

        tokio::time::timeout(Duration::from_secs(2), async {
            while Arc::strong_count(&connection) > 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("pump still holds the connection");
    }
}
