use crate::domain::NearPeerConfig;
use crate::ports::ConfigProvider;

// ============================================================================
// StaticConfigProvider - Fixed config for tests and embedding
// ============================================================================

/// Configuration provider returning a fixed `NearPeerConfig`.
///
/// For file-based configuration, use `TomlConfigProvider`.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    config: NearPeerConfig,
}

impl StaticConfigProvider {
    /// Create with the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: NearPeerConfig) -> Self {
        self.config = config;
        self
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn near_peer_config(&self) -> NearPeerConfig {
        self.config.clone()
    }
}

// ============================================================================
// TomlConfigProvider - Config file loading (requires "toml-config" feature)
// ============================================================================

#[cfg(feature = "toml-config")]
mod toml_config {
    use super::*;
    use crate::domain::ConfigError;
    use serde::Deserialize;
    use std::fs;
    use std::path::Path;

    #[derive(Debug, Deserialize)]
    struct ConfigFile {
        #[serde(default)]
        near_peer: NearPeerConfig,
    }

    /// TOML-based configuration provider.
    ///
    /// Missing keys take their defaults. Values are only checked when the
    /// config is handed to `NearPeer::start`.
    ///
    /// # Config File Format
    ///
    /// ```toml
    /// [near_peer]
    /// service_type = "chat"
    /// display_name = "alice"
    /// max_peers = 4
    /// invitation_timeout_secs = 10
    /// validation = "normalize"
    ///
    /// [near_peer.my_discovery_info]
    /// identifier = "com.example.chat"
    /// passcode = "1234"
    /// ```
    #[derive(Debug, Clone)]
    pub struct TomlConfigProvider {
        config: NearPeerConfig,
    }

    impl TomlConfigProvider {
        /// Load configuration from a TOML file.
        ///
        /// # Errors
        ///
        /// Returns error if file cannot be read or parsed.
        pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
            let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
                path: path.as_ref().display().to_string(),
                error: e.to_string(),
            })?;

            Self::parse(&content)
        }

        /// Parse configuration from a TOML string.
        pub fn parse(content: &str) -> Result<Self, ConfigError> {
            let file: ConfigFile =
                toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

            Ok(Self {
                config: file.near_peer,
            })
        }
    }

    impl ConfigProvider for TomlConfigProvider {
        fn near_peer_config(&self) -> NearPeerConfig {
            self.config.clone()
        }
    }
}

#[cfg(feature = "toml-config")]
pub use toml_config::TomlConfigProvider;
