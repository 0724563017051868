//! # Driven Ports (Outbound SPI)
//!
//! These are the interfaces this subsystem **requires** the host to implement.
//!
//! The nearby transport is callback-heavy on every platform. Here each
//! callback source is an unbounded channel handed back together with the
//! handle that produced it, so a component can drain it from one task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::domain::{
    DisplayName, NearPeerConfig, PeerConnectionState, PeerIdentity, RawDiscoveryInfo,
    ServiceDescriptor, Timestamp, TransportError,
};

/// Handle for an active advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdvertiseHandle(pub u64);

/// Handle for an active browse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BrowseHandle(pub u64);

/// Identifies a session inside the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Answer to an incoming invitation. Dropping it without answering counts as
/// a rejection.
#[derive(Debug)]
pub struct InvitationReply(oneshot::Sender<Option<SessionId>>);

impl InvitationReply {
    /// Create a reply and the receiver the transport waits on.
    pub fn channel() -> (Self, oneshot::Receiver<Option<SessionId>>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    /// Join the inviting peer into `session`.
    pub fn accept(self, session: SessionId) {
        // The transport may have given up on the invitation already.
        let _ = self.0.send(Some(session));
    }

    pub fn reject(self) {
        let _ = self.0.send(None);
    }
}

/// Answer to a peer certificate check.
#[derive(Debug)]
pub struct CertificateReply(oneshot::Sender<bool>);

impl CertificateReply {
    pub fn channel() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn respond(self, accept: bool) {
        let _ = self.0.send(accept);
    }
}

/// Callbacks delivered while advertising.
#[derive(Debug)]
pub enum AdvertiserEvent {
    /// A browsing peer asks to join our session.
    InvitationReceived {
        peer: PeerIdentity,
        reply: InvitationReply,
    },
    /// Advertising stopped on its own after having started.
    Failed { reason: TransportError },
}

/// Callbacks delivered while browsing.
#[derive(Debug, Clone)]
pub enum BrowseEvent {
    PeerFound {
        peer: PeerIdentity,
        info: Option<RawDiscoveryInfo>,
    },
    PeerLost {
        peer: PeerIdentity,
    },
    /// Browsing stopped on its own after having started.
    Failed {
        reason: TransportError,
    },
}

/// Callbacks delivered by a session.
#[derive(Debug)]
pub enum SessionEvent {
    StateChanged {
        peer: PeerIdentity,
        state: PeerConnectionState,
    },
    DataReceived {
        peer: PeerIdentity,
        data: Vec<u8>,
    },
    CertificateReceived {
        peer: PeerIdentity,
        reply: CertificateReply,
    },
}

/// A started advertisement and its callbacks.
#[derive(Debug)]
pub struct Advertisement {
    pub handle: AdvertiseHandle,
    pub events: mpsc::UnboundedReceiver<AdvertiserEvent>,
}

/// A started browse and its callbacks.
#[derive(Debug)]
pub struct Browsing {
    pub handle: BrowseHandle,
    pub events: mpsc::UnboundedReceiver<BrowseEvent>,
}

/// A created session and its callbacks.
pub struct SessionBinding {
    pub session: Arc<dyn Session>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Encrypted, multiplexed session shared by all connected peers.
#[async_trait]
pub trait Session: Send + Sync {
    fn id(&self) -> SessionId;

    /// Issue an invitation. Completion is reported through `SessionEvent::StateChanged`;
    /// after `timeout` the transport reports the peer as disconnected.
    async fn invite(&self, peer: &PeerIdentity, timeout: Duration) -> Result<(), TransportError>;

    /// Reliable send of one message to every peer in `peers`.
    async fn send(&self, data: &[u8], peers: &[PeerIdentity]) -> Result<(), TransportError>;

    /// Leave the session. Safe to call more than once.
    async fn disconnect(&self);
}

/// Nearby-device transport primitives.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; callbacks arrive on the transport's
/// own tasks and are forwarded through the returned channels.
#[async_trait]
pub trait Transport: Send + Sync {
    fn create_local_identity(&self, display_name: &DisplayName) -> PeerIdentity;

    /// Start advertising. `Ok` is the authoritative start acknowledgement.
    async fn advertise(
        &self,
        identity: &PeerIdentity,
        service: &ServiceDescriptor,
        info: Option<&RawDiscoveryInfo>,
    ) -> Result<Advertisement, TransportError>;

    async fn stop_advertising(&self, handle: AdvertiseHandle);

    /// Start browsing. `Ok` is the authoritative start acknowledgement.
    async fn browse(
        &self,
        identity: &PeerIdentity,
        service: &ServiceDescriptor,
    ) -> Result<Browsing, TransportError>;

    async fn stop_browsing(&self, handle: BrowseHandle);

    async fn create_session(&self, identity: &PeerIdentity)
        -> Result<SessionBinding, TransportError>;
}

/// Abstract interface for time-related operations.
///
/// Enables deterministic testing by injecting controllable time sources.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp.
    fn now(&self) -> Timestamp;
}

/// Abstract interface for configuration loading.
pub trait ConfigProvider: Send + Sync {
    fn near_peer_config(&self) -> NearPeerConfig;
}
