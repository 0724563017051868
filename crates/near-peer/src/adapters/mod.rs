//! # Adapters
//!
//! - `SystemTimeSource` - system clock
//! - `StaticConfigProvider` / `TomlConfigProvider` - configuration sources
//!   (`TomlConfigProvider` requires the "toml-config" feature)
//! - `InMemoryNetwork` / `InMemoryTransport` - loopback nearby transport

/// Configuration providers
pub mod config;
/// In-memory transport
pub mod memory;
/// Time source adapters
pub mod time;

pub use config::StaticConfigProvider;
pub use memory::{InMemoryNetwork, InMemorySession, InMemoryTransport, InvitePolicy, NetworkStats};
pub use time::SystemTimeSource;

#[cfg(feature = "toml-config")]
pub use config::TomlConfigProvider;
