//! # NearPeer orchestrator
//!
//! The single entry point. Each `start` opens an epoch: a fresh session plus
//! an advertiser and a browser bound to it. `stop` closes the epoch and the
//! event feeds; `suspend`/`resume` pause discovery while the session and its
//! peers stay up.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::advertiser::Advertiser;
use super::browser::Browser;
use super::connection::{Connection, SessionFeeds};
use super::events::Subscription;
use crate::adapters::SystemTimeSource;
use crate::domain::{
    ConnectionEvent, DataEvent, NearPeerConfig, NearPeerError, PeerConnectionState,
    PeerIdentity, TransportError, ValidatedConfig,
};
use crate::ports::{ConfigProvider, NearPeerApi, TimeSource, Transport};

/// Epoch-level lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NearPeerState {
    #[default]
    Idle,
    /// Validation and transport startup in progress.
    Starting,
    Running,
    /// Advertising and browsing paused; the session is kept.
    Suspended,
}

impl NearPeerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Suspended => "suspended",
        }
    }
}

impl fmt::Display for NearPeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything owned by one start..stop span.
struct Epoch {
    config: ValidatedConfig,
    connection: Arc<Connection>,
    advertiser: Advertiser,
    browser: Browser,
}

/// Local peer-discovery and session orchestrator.
///
/// # Example
///
/// ```rust,ignore
/// let network = InMemoryNetwork::new();
/// let near_peer = NearPeer::new(Arc::new(network.transport()));
/// let mut events = near_peer.connection_events();
/// near_peer.start(NearPeerConfig::new("chat", "alice")).await?;
/// ```
pub struct NearPeer {
    transport: Arc<dyn Transport>,
    time: Arc<dyn TimeSource>,
    /// Serializes start/stop/suspend/resume.
    lifecycle: Mutex<()>,
    phase: parking_lot::Mutex<NearPeerState>,
    epoch: parking_lot::Mutex<Option<Arc<Epoch>>>,
    feeds: parking_lot::Mutex<SessionFeeds>,
}

impl NearPeer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_time_source(transport, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(transport: Arc<dyn Transport>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            transport,
            time,
            lifecycle: Mutex::new(()),
            phase: parking_lot::Mutex::new(NearPeerState::Idle),
            epoch: parking_lot::Mutex::new(None),
            feeds: parking_lot::Mutex::new(SessionFeeds::new()),
        }
    }

    /// Validate `config` and start advertising and browsing on a fresh
    /// session.
    ///
    /// A no-op while an epoch is open. Validation happens before any
    /// transport call. When only one of advertiser and browser starts, the
    /// one that did keeps running and `StartupFailed` is returned; `stop`
    /// cleans up.
    pub async fn start(&self, config: NearPeerConfig) -> Result<(), NearPeerError> {
        let _guard = self.lifecycle.lock().await;
        if self.epoch.lock().is_some() {
            debug!("Start ignored, already started");
            return Ok(());
        }

        self.set_phase(NearPeerState::Starting);
        let config = match config.validate() {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Invalid configuration");
                self.set_phase(NearPeerState::Idle);
                return Err(e.into());
            }
        };

        let local = self.transport.create_local_identity(&config.display_name);
        let feeds = self.feeds.lock().clone();
        let connection = match Connection::open(
            self.transport.as_ref(),
            local,
            config.max_peers,
            config.invitation_timeout,
            Arc::clone(&self.time),
            feeds,
        )
        .await
        {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "Session could not be created");
                self.set_phase(NearPeerState::Idle);
                return Err(e);
            }
        };

        let advertiser = Advertiser::new(Arc::clone(&self.transport), Arc::clone(&connection));
        let browser = Browser::new(Arc::clone(&self.transport), Arc::clone(&connection));

        let (advertised, browsed) = tokio::join!(
            advertiser.start(config.service.clone(), config.advertised.as_ref()),
            browser.start(config.service.clone(), config.required.as_ref()),
        );

        if let (Err(a), Err(b)) = (&advertised, &browsed) {
            warn!(advertiser = %a, browser = %b, "Startup failed");
            connection.disconnect().await;
            self.set_phase(NearPeerState::Idle);
            return Err(NearPeerError::StartupFailed {
                advertiser: Some(transport_cause(a)),
                browser: Some(transport_cause(b)),
            });
        }

        info!(
            service = %config.service,
            local = %connection.local_peer(),
            max_peers = config.max_peers,
            "Near peer started"
        );
        *self.epoch.lock() = Some(Arc::new(Epoch {
            config,
            connection,
            advertiser,
            browser,
        }));
        self.set_phase(NearPeerState::Running);

        match (advertised, browsed) {
            (Ok(()), Ok(())) => Ok(()),
            (advertised, browsed) => Err(NearPeerError::StartupFailed {
                advertiser: advertised.err().as_ref().map(transport_cause),
                browser: browsed.err().as_ref().map(transport_cause),
            }),
        }
    }

    /// Start with the configuration supplied by `provider`.
    pub async fn start_from(&self, provider: &dyn ConfigProvider) -> Result<(), NearPeerError> {
        self.start(provider.near_peer_config()).await
    }

    /// Tear the epoch down and close the event feeds. Always succeeds.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        let Some(epoch) = self.epoch.lock().take() else {
            return;
        };

        tokio::join!(epoch.advertiser.stop(), epoch.browser.stop());
        epoch.connection.disconnect().await;

        let old = std::mem::take(&mut *self.feeds.lock());
        old.close();

        self.set_phase(NearPeerState::Idle);
        info!(service = %epoch.config.service, "Near peer stopped");
    }

    /// Pause advertising and browsing. Connected peers stay connected.
    pub async fn suspend(&self) -> Result<(), NearPeerError> {
        let _guard = self.lifecycle.lock().await;
        let epoch = match self.state() {
            NearPeerState::Suspended => return Ok(()),
            NearPeerState::Running => self.current_epoch()?,
            other => {
                return Err(NearPeerError::InvalidState {
                    operation: "suspend",
                    state: other.as_str(),
                })
            }
        };

        tokio::join!(epoch.advertiser.suspend(), epoch.browser.suspend());
        self.set_phase(NearPeerState::Suspended);
        info!("Near peer suspended");
        Ok(())
    }

    /// Restart advertising and browsing with the parameters given at `start`.
    ///
    /// While running this restarts whichever side stopped on its own.
    pub async fn resume(&self) -> Result<(), NearPeerError> {
        let _guard = self.lifecycle.lock().await;
        let epoch = self.current_epoch()?;

        let (advertised, browsed) =
            tokio::join!(epoch.advertiser.resume(), epoch.browser.resume());

        match (advertised, browsed) {
            (Ok(()), Ok(())) => {
                self.set_phase(NearPeerState::Running);
                info!("Near peer resumed");
                Ok(())
            }
            (Err(a), Err(b)) => Err(NearPeerError::StartupFailed {
                advertiser: Some(transport_cause(&a)),
                browser: Some(transport_cause(&b)),
            }),
            (advertised, browsed) => {
                self.set_phase(NearPeerState::Running);
                Err(NearPeerError::StartupFailed {
                    advertiser: advertised.err().as_ref().map(transport_cause),
                    browser: browsed.err().as_ref().map(transport_cause),
                })
            }
        }
    }

    /// Send `payload` to every connected peer.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), NearPeerError> {
        self.current_connection()?.send(&payload).await
    }

    /// JSON-encode `value` and send it to every connected peer.
    pub async fn send_value<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), NearPeerError> {
        let payload =
            serde_json::to_vec(value).map_err(|e| NearPeerError::Encoding(e.to_string()))?;
        self.send(payload).await
    }

    /// Send `payload` to `peers` only; all of them must be connected.
    pub async fn send_to(
        &self,
        payload: Vec<u8>,
        peers: &[PeerIdentity],
    ) -> Result<(), NearPeerError> {
        self.current_connection()?.send_to(&payload, peers).await
    }

    pub fn connection_events(&self) -> Subscription<ConnectionEvent> {
        self.feeds.lock().connection.subscribe()
    }

    pub fn data_events(&self) -> Subscription<DataEvent> {
        self.feeds.lock().data.subscribe()
    }

    /// Point-in-time snapshot; empty while idle.
    pub async fn connected_peers(&self) -> Vec<PeerIdentity> {
        match self.current_connection() {
            Ok(connection) => connection.connected_peers().await,
            Err(_) => Vec::new(),
        }
    }

    pub fn state(&self) -> NearPeerState {
        *self.phase.lock()
    }

    /// Latest state the transport reported for any peer.
    pub async fn connection_state(&self) -> PeerConnectionState {
        match self.current_connection() {
            Ok(connection) => connection.state().await,
            Err(_) => PeerConnectionState::Disconnected,
        }
    }

    /// Last state reported for `peer` in this epoch.
    pub async fn peer_state(&self, peer: &PeerIdentity) -> Option<PeerConnectionState> {
        self.current_connection().ok()?.peer_state(peer).await
    }

    pub async fn is_advertising(&self) -> bool {
        match self.current_epoch() {
            Ok(epoch) => epoch.advertiser.is_advertising().await,
            Err(_) => false,
        }
    }

    pub async fn is_browsing(&self) -> bool {
        match self.current_epoch() {
            Ok(epoch) => epoch.browser.is_browsing().await,
            Err(_) => false,
        }
    }

    /// Peers currently in range, whether or not they matched.
    pub fn discovered_peers(&self) -> Vec<PeerIdentity> {
        self.current_epoch()
            .map(|epoch| epoch.browser.discovered_peers())
            .unwrap_or_default()
    }

    /// Identity of this device for the current epoch.
    pub fn local_peer(&self) -> Option<PeerIdentity> {
        self.current_connection()
            .ok()
            .map(|connection| connection.local_peer().clone())
    }

    /// The validated configuration of the current epoch.
    pub fn config(&self) -> Option<ValidatedConfig> {
        self.current_epoch().ok().map(|epoch| epoch.config.clone())
    }

    fn set_phase(&self, state: NearPeerState) {
        *self.phase.lock() = state;
    }

    fn current_epoch(&self) -> Result<Arc<Epoch>, NearPeerError> {
        self.epoch.lock().clone().ok_or(NearPeerError::NotInitialized)
    }

    fn current_connection(&self) -> Result<Arc<Connection>, NearPeerError> {
        self.epoch
            .lock()
            .as_ref()
            .map(|epoch| Arc::clone(&epoch.connection))
            .ok_or(NearPeerError::SessionNotFound)
    }
}

fn transport_cause(err: &NearPeerError) -> TransportError {
    match err {
        NearPeerError::TransportUnavailable(cause) => cause.clone(),
        other => TransportError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl NearPeerApi for NearPeer {
    async fn start(&self, config: NearPeerConfig) -> Result<(), NearPeerError> {
        NearPeer::start(self, config).await
    }

    async fn stop(&self) {
        NearPeer::stop(self).await
    }

    async fn suspend(&self) -> Result<(), NearPeerError> {
        NearPeer::suspend(self).await
    }

    async fn resume(&self) -> Result<(), NearPeerError> {
        NearPeer::resume(self).await
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), NearPeerError> {
        NearPeer::send(self, payload).await
    }

    fn connection_events(&self) -> Subscription<ConnectionEvent> {
        NearPeer::connection_events(self)
    }

    fn data_events(&self) -> Subscription<DataEvent> {
        NearPeer::data_events(self)
    }

    async fn connected_peers(&self) -> Vec<PeerIdentity> {
        NearPeer::connected_peers(self).await
    }
}
