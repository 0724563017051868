//! Domain Layer - Pure session bookkeeping with no I/O
//!
//! This module contains:
//! - Peer identities, timestamps and session states
//! - Connection and data events
//! - Service descriptor / display name validation
//! - Discovery metadata and the matching rule applied before inviting
//! - Peer slots (admission control against `max_peers`)

pub mod entities;
pub mod errors;
pub mod matching;
pub mod peer_slots;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use matching::*;
pub use peer_slots::*;
pub use value_objects::*;
