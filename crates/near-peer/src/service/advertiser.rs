//! # Advertiser
//!
//! Announces the local peer under the service descriptor and admits
//! incoming invitations into the shared session.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::PumpSlot;
use crate::domain::{
    DiscoveryMetadata, NearPeerError, RawDiscoveryInfo, ServiceDescriptor, TransportError,
};
use crate::ports::{AdvertiseHandle, AdvertiserEvent, Transport};

#[derive(Debug, Clone)]
struct AdvertiseParams {
    service: ServiceDescriptor,
    info: Option<RawDiscoveryInfo>,
}

#[derive(Default)]
struct AdvertiserState {
    /// Set by `start`, cleared by `stop`; `resume` reuses it.
    params: Option<AdvertiseParams>,
    handle: Option<AdvertiseHandle>,
    is_advertising: bool,
    last_failure: Option<TransportError>,
}

pub struct Advertiser {
    transport: Arc<dyn Transport>,
    connection: Arc<Connection>,
    state: Arc<Mutex<AdvertiserState>>,
    pump: PumpSlot,
}

impl Advertiser {
    pub fn new(transport: Arc<dyn Transport>, connection: Arc<Connection>) -> Self {
        Self {
            transport,
            connection,
            state: Arc::new(Mutex::new(AdvertiserState::default())),
            pump: PumpSlot::default(),
        }
    }

    /// Begin advertising. A no-op while already advertising.
    pub async fn start(
        &self,
        service: ServiceDescriptor,
        info: Option<&DiscoveryMetadata>,
    ) -> Result<(), NearPeerError> {
        let mut state = self.state.lock().await;
        if state.is_advertising {
            debug!(service = %service, "Already advertising");
            return Ok(());
        }

        state.params = Some(AdvertiseParams {
            service,
            info: info.filter(|m| !m.is_empty()).map(DiscoveryMetadata::to_raw),
        });
        self.begin(&mut state).await
    }

    /// Stop advertising and forget the parameters. Always succeeds.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.halt(&mut state).await;
        state.params = None;
    }

    /// Stop advertising but keep the parameters for `resume`.
    pub async fn suspend(&self) {
        let mut state = self.state.lock().await;
        self.halt(&mut state).await;
    }

    /// Advertise again with the parameters given at `start`.
    pub async fn resume(&self) -> Result<(), NearPeerError> {
        let mut state = self.state.lock().await;
        if state.params.is_none() {
            return Err(NearPeerError::NotInitialized);
        }
        if state.is_advertising {
            return Ok(());
        }
        self.begin(&mut state).await
    }

    pub async fn is_advertising(&self) -> bool {
        self.state.lock().await.is_advertising
    }

    /// The most recent transport failure, cleared by a successful start.
    pub async fn last_failure(&self) -> Option<TransportError> {
        self.state.lock().await.last_failure.clone()
    }

    async fn begin(&self, state: &mut AdvertiserState) -> Result<(), NearPeerError> {
        let params = state.params.clone().ok_or(NearPeerError::NotInitialized)?;

        let advertisement = match self
            .transport
            .advertise(
                self.connection.local_peer(),
                &params.service,
                params.info.as_ref(),
            )
            .await
        {
            Ok(advertisement) => advertisement,
            Err(e) => {
                warn!(service = %params.service, error = %e, "Advertising failed to start");
                state.last_failure = Some(e.clone());
                return Err(NearPeerError::TransportUnavailable(e));
            }
        };

        let handle = advertisement.handle;
        state.handle = Some(handle);
        state.is_advertising = true;
        state.last_failure = None;
        *self.pump.lock() = Some(tokio::spawn(run_advertiser_pump(
            advertisement.events,
            handle,
            Arc::clone(&self.state),
            Arc::clone(&self.pump),
            Arc::clone(&self.connection),
        )));

        info!(service = %params.service, handle = handle.0, "Advertising started");
        Ok(())
    }

    async fn halt(&self, state: &mut AdvertiserState) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        if let Some(handle) = state.handle.take() {
            self.transport.stop_advertising(handle).await;
            info!(handle = handle.0, "Advertising stopped");
        }
        state.is_advertising = false;
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

async fn run_advertiser_pump(
    mut events: mpsc::UnboundedReceiver<AdvertiserEvent>,
    handle: AdvertiseHandle,
    state: Arc<Mutex<AdvertiserState>>,
    slot: PumpSlot,
    connection: Arc<Connection>,
) {
    while let Some(event) = events.recv().await {
        match event {
            AdvertiserEvent::InvitationReceived { peer, reply } => {
                let accepted = connection.accept_invitation(&peer, reply).await;
                info!(peer = %peer, accepted, "Invitation received");
            }
            AdvertiserEvent::Failed { reason } => {
                let mut state = state.lock().await;
                if state.handle == Some(handle) {
                    state.handle = None;
                    slot.lock().take();
                    state.is_advertising = false;
                    state.last_failure = Some(reason.clone());
                    warn!(handle = handle.0, error = %reason, "Advertising failed");
                }
                return;
            }
        }
    }
}
