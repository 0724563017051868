//! # Driving Ports (Inbound API)
//!
//! The control and event API applications use.

use async_trait::async_trait;

use crate::domain::{ConnectionEvent, DataEvent, NearPeerConfig, NearPeerError, PeerIdentity};
use crate::service::Subscription;

/// Primary API for the near-peer subsystem.
///
/// Every operation is async and returns a typed error; the event feeds never
/// carry errors.
///
/// # Example
///
/// ```rust,ignore
/// use near_peer::ports::NearPeerApi;
///
/// async fn chat<T: NearPeerApi>(api: &T, config: NearPeerConfig) -> Result<(), NearPeerError> {
///     let mut events = api.connection_events();
///     api.start(config).await?;
///     while let Some(event) = events.recv().await {
///         if event.state.is_connected() {
///             api.send(b"hello".to_vec()).await?;
///         }
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait NearPeerApi: Send + Sync {
    /// Validate `config`, create a fresh session and start advertising and
    /// browsing. A no-op while already started.
    async fn start(&self, config: NearPeerConfig) -> Result<(), NearPeerError>;

    /// Tear everything down and close the event feeds. Always succeeds.
    async fn stop(&self);

    /// Pause advertising and browsing; the session and its peers stay.
    async fn suspend(&self) -> Result<(), NearPeerError>;

    /// Restart advertising and browsing with the parameters given at `start`.
    async fn resume(&self) -> Result<(), NearPeerError>;

    /// Send `payload` to every connected peer.
    async fn send(&self, payload: Vec<u8>) -> Result<(), NearPeerError>;

    /// Subscribe to connection events of the current epoch.
    fn connection_events(&self) -> Subscription<ConnectionEvent>;

    /// Subscribe to data events of the current epoch.
    fn data_events(&self) -> Subscription<DataEvent>;

    /// Point-in-time snapshot of connected peers.
    async fn connected_peers(&self) -> Vec<PeerIdentity>;
}
