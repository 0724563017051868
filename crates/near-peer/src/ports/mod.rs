//! # Ports Layer - Hexagonal Architecture Boundaries
//!
//! - **Driving Ports (Inbound):** the control/event API this subsystem exposes
//! - **Driven Ports (Outbound):** the nearby transport, clock and config source
//!   this subsystem requires from the host

pub mod inbound;
pub mod outbound;

pub use inbound::NearPeerApi;
pub use outbound::{
    AdvertiseHandle, Advertisement, AdvertiserEvent, BrowseEvent, BrowseHandle, Browsing,
    CertificateReply, ConfigProvider, InvitationReply, Session, SessionBinding, SessionEvent,
    SessionId, TimeSource, Transport,
};
