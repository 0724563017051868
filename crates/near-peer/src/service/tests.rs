//! Tests for the service components over the in-memory network.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use super::*;
use crate::adapters::{InMemoryNetwork, InMemoryTransport, InvitePolicy};
use crate::domain::{
    DiscoveryInfoKey, DiscoveryMetadata, DisplayName, NearPeerError, PeerConnectionState,
    PeerIdentity, RawDiscoveryInfo, ServiceDescriptor, TransportError,
};
use crate::ports::{InvitationReply, TimeSource, Transport};
use crate::test_utils::{FixedTimeSource, ManualTimeSource};

const WAIT: Duration = Duration::from_secs(2);
const INVITE_TIMEOUT: Duration = Duration::from_secs(1);

struct Device {
    network: InMemoryNetwork,
    transport: Arc<InMemoryTransport>,
    connection: Arc<Connection>,
    feeds: SessionFeeds,
}

async fn device(max_peers: usize) -> Device {
    device_with_clock(max_peers, Arc::new(FixedTimeSource::new(1_000))).await
}

async fn device_with_clock(max_peers: usize, time: Arc<dyn TimeSource>) -> Device {
    let network = InMemoryNetwork::new();
    let transport = Arc::new(network.transport());
    let local = transport.create_local_identity(&DisplayName::parse("local").unwrap());
    let feeds = SessionFeeds::new();
    let connection = Connection::open(
        transport.as_ref(),
        local,
        max_peers,
        INVITE_TIMEOUT,
        time,
        feeds.clone(),
    )
    .await
    .unwrap();

    Device {
        network,
        transport,
        connection,
        feeds,
    }
}

fn chat() -> ServiceDescriptor {
    ServiceDescriptor::parse("chat").unwrap()
}

fn passcode(value: &str) -> DiscoveryMetadata {
    DiscoveryMetadata::new().with(DiscoveryInfoKey::Passcode, value)
}

fn raw_passcode(value: &str) -> RawDiscoveryInfo {
    passcode(value).to_raw()
}

async fn next<T>(subscription: &mut Subscription<T>) -> T {
    timeout(WAIT, subscription.recv())
        .await
        .expect("timed out waiting for event")
        .expect("feed closed")
}

async fn wait_until<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

// =============================================================================
// TEST GROUP 1: Connection
// =============================================================================

#[tokio::test]
async fn test_invite_reports_connecting_then_connected() {
    let d = device(1).await;
    let mut events = d.feeds.connection.subscribe();
    let carol = d.network.announce("carol", "chat", None, InvitePolicy::Accept);

    assert_eq!(d.connection.invite(&carol).await.unwrap(), InviteOutcome::Invited);

    let first = next(&mut events).await;
    let second = next(&mut events).await;
    assert_eq!((first.peer.clone(), first.state), (carol.clone(), PeerConnectionState::Connecting));
    assert_eq!((second.peer, second.state), (carol.clone(), PeerConnectionState::Connected));
    assert_eq!(d.connection.connected_peers().await, vec![carol.clone()]);
    assert_eq!(d.connection.state().await, PeerConnectionState::Connected);
    assert_eq!(
        d.connection.peer_state(&carol).await,
        Some(PeerConnectionState::Connected)
    );
}

#[tokio::test]
async fn test_invite_respects_max_peers_and_duplicates() {
    let d = device(1).await;
    let carol = d.network.announce("carol", "chat", None, InvitePolicy::Accept);
    let dave = d.network.announce("dave", "chat", None, InvitePolicy::Accept);

    assert_eq!(d.connection.invite(&carol).await.unwrap(), InviteOutcome::Invited);
    assert_eq!(d.connection.invite(&carol).await.unwrap(), InviteOutcome::AlreadyPresent);
    assert_eq!(d.connection.invite(&dave).await.unwrap(), InviteOutcome::Full);
    assert_eq!(d.network.stats().invite_calls, 1);
}

#[tokio::test]
async fn test_rejected_invitation_frees_the_slot() {
    let d = device(1).await;
    let mut events = d.feeds.connection.subscribe();
    let carol = d.network.announce("carol", "chat", None, InvitePolicy::Reject);
    let dave = d.network.announce("dave", "chat", None, InvitePolicy::Accept);

    d.connection.invite(&carol).await.unwrap();
    assert_eq!(next(&mut events).await.state, PeerConnectionState::Connecting);
    assert_eq!(next(&mut events).await.state, PeerConnectionState::Disconnected);

    assert_eq!(
        d.connection.peer_state(&carol).await,
        Some(PeerConnectionState::Disconnected)
    );
    assert_eq!(d.connection.invite(&dave).await.unwrap(), InviteOutcome::Invited);
}

#[tokio::test(start_paused = true)]
async fn test_ignored_invitation_frees_slot_after_timeout() {
    let d = device(1).await;
    let mut events = d.feeds.connection.subscribe();
    let carol = d.network.announce("carol", "chat", None, InvitePolicy::Ignore);
    let dave = d.network.announce("dave", "chat", None, InvitePolicy::Accept);

    d.connection.invite(&carol).await.unwrap();
    assert_eq!(d.connection.invite(&dave).await.unwrap(), InviteOutcome::Full);

    assert_eq!(next(&mut events).await.state, PeerConnectionState::Connecting);
    assert_eq!(next(&mut events).await.state, PeerConnectionState::Disconnected);
    assert_eq!(d.connection.invite(&dave).await.unwrap(), InviteOutcome::Invited);
}

#[tokio::test]
async fn test_send_without_peers_never_reaches_transport() {
    let d = device(1).await;

    assert_eq!(
        d.connection.send(b"hi").await,
        Err(NearPeerError::NotConnected)
    );
    assert_eq!(d.network.stats().send_calls, 0);
}

#[tokio::test]
async fn test_send_reaches_every_connected_peer() {
    let d = device(2).await;
    let mut events = d.feeds.connection.subscribe();
    let carol = d.network.announce("carol", "chat", None, InvitePolicy::Accept);
    let dave = d.network.announce("dave", "chat", None, InvitePolicy::Accept);

    d.connection.invite(&carol).await.unwrap();
    d.connection.invite(&dave).await.unwrap();
    for _ in 0..4 {
        next(&mut events).await;
    }

    d.connection.send(b"hi").await.unwrap();
    assert_eq!(d.network.received_by(&carol), vec![b"hi".to_vec()]);
    assert_eq!(d.network.received_by(&dave), vec![b"hi".to_vec()]);
    assert_eq!(d.network.stats().send_calls, 1);
}

#[tokio::test]
async fn test_send_to_requires_every_target_connected() {
    let d = device(2).await;
    let mut events = d.feeds.connection.subscribe();
    let carol = d.network.announce("carol", "chat", None, InvitePolicy::Accept);
    let stranger = PeerIdentity::new("stranger");

    d.connection.invite(&carol).await.unwrap();
    next(&mut events).await;
    next(&mut events).await;

    assert_eq!(
        d.connection.send_to(b"x", &[carol.clone(), stranger]).await,
        Err(NearPeerError::NotConnected)
    );
    d.connection.send_to(b"x", &[carol.clone()]).await.unwrap();
    assert_eq!(d.network.received_by(&carol).len(), 1);
}

#[tokio::test]
async fn test_send_failure_is_reported() {
    let d = device(1).await;
    let mut events = d.feeds.connection.subscribe();
    let carol = d.network.announce("carol", "chat", None, InvitePolicy::Accept);
    d.connection.invite(&carol).await.unwrap();
    next(&mut events).await;
    next(&mut events).await;

    d.network
        .set_send_failure(Some(TransportError::SendFailed("link lost".into())));

    assert!(matches!(
        d.connection.send(b"x").await,
        Err(NearPeerError::SendFailed(_))
    ));
}

#[tokio::test]
async fn test_received_data_is_published() {
    let d = device(1).await;
    let mut connection_events = d.feeds.connection.subscribe();
    let mut data_events = d.feeds.data.subscribe();
    let carol = d.network.announce("carol", "chat", None, InvitePolicy::Accept);
    d.connection.invite(&carol).await.unwrap();
    next(&mut connection_events).await;
    next(&mut connection_events).await;

    d.network
        .push_data(&carol, d.connection.local_peer(), b"one")
        .unwrap();
    d.network
        .push_data(&carol, d.connection.local_peer(), b"two")
        .unwrap();

    let first = next(&mut data_events).await;
    let second = next(&mut data_events).await;
    assert_eq!(first.peer, carol);
    assert_eq!(first.payload, b"one");
    assert_eq!(second.payload, b"two");
}

#[tokio::test]
async fn test_accept_invitation_rejects_when_full() {
    let d = device(1).await;
    let carol = d.network.announce("carol", "chat", None, InvitePolicy::Accept);
    let dave = PeerIdentity::new("dave");
    d.connection.invite(&carol).await.unwrap();

    let (reply, answer) = InvitationReply::channel();
    assert!(!d.connection.accept_invitation(&dave, reply).await);
    assert_eq!(answer.await.unwrap(), None);
}

#[tokio::test]
async fn test_accept_invitation_from_pending_peer() {
    let d = device(1).await;
    let carol = d.network.announce("carol", "chat", None, InvitePolicy::Ignore);
    d.connection.invite(&carol).await.unwrap();

    let (reply, answer) = InvitationReply::channel();
    assert!(d.connection.accept_invitation(&carol, reply).await);
    assert_eq!(answer.await.unwrap(), Some(d.connection.session_id()));
}

#[tokio::test]
async fn test_pending_slot_expires_with_clock() {
    let clock = Arc::new(ManualTimeSource::new(1_000));
    let d = device_with_clock(1, clock.clone()).await;
    let carol = d.network.announce("carol", "chat", None, InvitePolicy::Ignore);
    let dave = PeerIdentity::new("dave");
    let erin = d.network.announce("erin", "chat", None, InvitePolicy::Ignore);

    assert_eq!(d.connection.invite(&carol).await.unwrap(), InviteOutcome::Invited);
    let (reply, answer) = InvitationReply::channel();
    assert!(!d.connection.accept_invitation(&dave, reply).await);
    assert_eq!(answer.await.unwrap(), None);

    // Carol never answered; her reservation lapses once the clock passes the timeout.
    clock.advance(INVITE_TIMEOUT + Duration::from_millis(1));
    let (reply, answer) = InvitationReply::channel();
    assert!(d.connection.accept_invitation(&dave, reply).await);
    assert_eq!(answer.await.unwrap(), Some(d.connection.session_id()));

    // Dave now holds the only slot.
    assert_eq!(d.connection.invite(&erin).await.unwrap(), InviteOutcome::Full);
    let stats = d.connection.slot_stats().await;
    assert_eq!((stats.connected, stats.in_flight), (0, 1));
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_final() {
    let d = device(1).await;
    let carol = d.network.announce("carol", "chat", None, InvitePolicy::Accept);

    d.connection.disconnect().await;
    d.connection.disconnect().await;

    assert_eq!(d.network.stats().open_sessions, 0);
    assert_eq!(d.connection.state().await, PeerConnectionState::Disconnected);
    assert_eq!(
        d.connection.send(b"x").await,
        Err(NearPeerError::SessionNotFound)
    );
    assert_eq!(
        d.connection.invite(&carol).await,
        Err(NearPeerError::SessionNotFound)
    );
}

// =============================================================================
// TEST GROUP 2: Advertiser
// =============================================================================

#[tokio::test]
async fn test_advertiser_resume_before_start() {
    let d = device(1).await;
    let advertiser = Advertiser::new(d.transport.clone(), d.connection.clone());

    assert_eq!(advertiser.resume().await, Err(NearPeerError::NotInitialized));
}

#[tokio::test]
async fn test_advertiser_start_is_idempotent() {
    let d = device(1).await;
    let advertiser = Advertiser::new(d.transport.clone(), d.connection.clone());

    advertiser.start(chat(), None).await.unwrap();
    advertiser.start(chat(), None).await.unwrap();

    assert!(advertiser.is_advertising().await);
    assert_eq!(d.network.stats().advertise_calls, 1);
}

#[tokio::test]
async fn test_advertiser_start_failure() {
    let d = device(1).await;
    let advertiser = Advertiser::new(d.transport.clone(), d.connection.clone());
    d.network
        .set_advertise_failure(Some(TransportError::Unavailable("radio off".into())));

    let result = advertiser.start(chat(), None).await;

    assert!(matches!(result, Err(NearPeerError::TransportUnavailable(_))));
    assert!(!advertiser.is_advertising().await);
    assert!(advertiser.last_failure().await.is_some());
}

#[tokio::test]
async fn test_advertiser_suspend_resume_reuses_parameters() {
    let d = device(1).await;
    let advertiser = Advertiser::new(d.transport.clone(), d.connection.clone());
    advertiser.start(chat(), Some(&passcode("1234"))).await.unwrap();

    advertiser.suspend().await;
    assert!(!advertiser.is_advertising().await);
    assert_eq!(d.network.stats().active_advertisers, 0);

    advertiser.resume().await.unwrap();
    assert!(advertiser.is_advertising().await);
    assert_eq!(d.network.stats().advertise_calls, 2);

    advertiser.stop().await;
    assert_eq!(advertiser.resume().await, Err(NearPeerError::NotInitialized));
}

#[tokio::test]
async fn test_advertiser_admits_invitation() {
    let d = device(1).await;
    let mut events = d.feeds.connection.subscribe();
    let advertiser = Advertiser::new(d.transport.clone(), d.connection.clone());
    advertiser.start(chat(), None).await.unwrap();
    let carol = d.network.announce("carol", "files", None, InvitePolicy::Accept);

    let accepted = d
        .network
        .invite_from(&carol, d.connection.local_peer(), WAIT)
        .await
        .unwrap();

    assert!(accepted);
    next(&mut events).await;
    assert_eq!(next(&mut events).await.state, PeerConnectionState::Connected);
    assert_eq!(d.connection.connected_peers().await, vec![carol]);
}

#[tokio::test]
async fn test_advertiser_rejects_invitation_when_full() {
    let d = device(1).await;
    let advertiser = Advertiser::new(d.transport.clone(), d.connection.clone());
    advertiser.start(chat(), None).await.unwrap();
    let carol = d.network.announce("carol", "files", None, InvitePolicy::Accept);
    let dave = d.network.announce("dave", "files", None, InvitePolicy::Accept);
    let local = d.connection.local_peer().clone();

    assert!(d.network.invite_from(&carol, &local, WAIT).await.unwrap());
    assert!(!d.network.invite_from(&dave, &local, WAIT).await.unwrap());
}

#[tokio::test]
async fn test_advertiser_async_failure_clears_flag() {
    let d = device(1).await;
    let advertiser = Advertiser::new(d.transport.clone(), d.connection.clone());
    advertiser.start(chat(), None).await.unwrap();

    d.network.fail_advertisers(TransportError::Unavailable("radio off".into()));

    let a = &advertiser;
    wait_until(|| async move { !a.is_advertising().await }).await;
    assert!(advertiser.last_failure().await.is_some());

    advertiser.resume().await.unwrap();
    assert!(advertiser.is_advertising().await);
}

// =============================================================================
// TEST GROUP 3: Browser
// =============================================================================

#[tokio::test]
async fn test_browser_invites_matching_peer() {
    let d = device(1).await;
    let mut events = d.feeds.connection.subscribe();
    let browser = Browser::new(d.transport.clone(), d.connection.clone());
    let carol = d.network.announce(
        "carol",
        "chat",
        Some(raw_passcode("1234")),
        InvitePolicy::Accept,
    );

    browser.start(chat(), Some(&passcode("1234"))).await.unwrap();

    assert_eq!(next(&mut events).await.peer, carol);
    assert_eq!(next(&mut events).await.state, PeerConnectionState::Connected);
    assert_eq!(browser.discovered_peers(), vec![carol]);
}

#[tokio::test]
async fn test_browser_skips_mismatched_peer() {
    let d = device(1).await;
    let browser = Browser::new(d.transport.clone(), d.connection.clone());
    d.network.announce(
        "carol",
        "chat",
        Some(raw_passcode("0000")),
        InvitePolicy::Accept,
    );
    d.network.announce("dave", "chat", None, InvitePolicy::Accept);

    browser.start(chat(), Some(&passcode("1234"))).await.unwrap();

    let b = &browser;
    wait_until(|| async move { b.discovered_peers().len() == 2 }).await;
    assert_eq!(d.network.stats().invite_calls, 0);
    assert!(d.connection.connected_peers().await.is_empty());
}

#[tokio::test]
async fn test_browser_without_requirement_invites_everyone_up_to_limit() {
    let d = device(2).await;
    let browser = Browser::new(d.transport.clone(), d.connection.clone());
    for name in ["carol", "dave", "erin"] {
        d.network.announce(name, "chat", None, InvitePolicy::Accept);
    }

    browser.start(chat(), None).await.unwrap();

    let b = &browser;
    wait_until(|| async move { b.discovered_peers().len() == 3 }).await;
    let c = &d.connection;
    wait_until(|| async move { c.connected_count().await == 2 }).await;
    assert_eq!(d.network.stats().invite_calls, 2);
}

#[tokio::test]
async fn test_browser_peer_lost_and_stop_clear_bookkeeping() {
    let d = device(1).await;
    let browser = Browser::new(d.transport.clone(), d.connection.clone());
    let carol = d.network.announce("carol", "chat", None, InvitePolicy::Reject);
    d.network.announce("dave", "chat", None, InvitePolicy::Reject);
    browser.start(chat(), None).await.unwrap();

    let b = &browser;
    wait_until(|| async move { b.discovered_peers().len() == 2 }).await;

    d.network.withdraw(&carol);
    wait_until(|| async move { b.discovered_peers().len() == 1 }).await;

    browser.stop().await;
    assert!(browser.discovered_peers().is_empty());
    assert!(!browser.is_browsing().await);
    assert_eq!(d.network.stats().active_browsers, 0);
}

#[tokio::test]
async fn test_browser_peer_lost_keeps_connected_peer() {
    let d = device(1).await;
    let mut events = d.feeds.connection.subscribe();
    let browser = Browser::new(d.transport.clone(), d.connection.clone());
    let carol = d.network.announce("carol", "chat", None, InvitePolicy::Accept);
    browser.start(chat(), None).await.unwrap();
    next(&mut events).await;
    next(&mut events).await;

    // Losing the peer from discovery alone must not touch the session.
    browser.stop().await;
    assert_eq!(d.connection.connected_peers().await, vec![carol]);
}

#[tokio::test]
async fn test_browser_start_failure() {
    let d = device(1).await;
    let browser = Browser::new(d.transport.clone(), d.connection.clone());
    d.network.set_browse_failure(Some(TransportError::Unavailable("radio off".into())));

    assert!(matches!(
        browser.start(chat(), None).await,
        Err(NearPeerError::TransportUnavailable(_))
    ));
    assert!(!browser.is_browsing().await);

    d.network.set_browse_failure(None);
    browser.resume().await.unwrap();
    assert!(browser.is_browsing().await);
}

#[tokio::test]
async fn test_browser_async_failure_clears_flag() {
    let d = device(1).await;
    let browser = Browser::new(d.transport.clone(), d.connection.clone());
    browser.start(chat(), None).await.unwrap();

    d.network.fail_browsers(TransportError::Closed);

    let b = &browser;
    wait_until(|| async move { !b.is_browsing().await }).await;
    assert_eq!(browser.last_failure().await, Some(TransportError::Closed));
}
