//! Value Objects for Near Peer
//!
//! Validated service descriptors, display names, discovery metadata and the
//! per-epoch configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::ConfigError;

/// Longest service type the transport accepts (characters).
pub const MAX_SERVICE_TYPE_LEN: usize = 15;

/// Longest display name the transport accepts (UTF-8 bytes).
pub const MAX_DISPLAY_NAME_BYTES: usize = 63;

/// Longest `key=value` discovery entry (one TXT record string).
pub const MAX_METADATA_ENTRY_BYTES: usize = 255;

/// Display name substituted for an empty one in `Normalize` mode.
pub const FALLBACK_DISPLAY_NAME: &str = "no name";

/// Default timeout handed to the transport with every invitation.
pub const DEFAULT_INVITATION_TIMEOUT_SECS: u64 = 10;

/// Discovery info as carried by the transport: plain string pairs, possibly
/// with keys this crate does not know about.
pub type RawDiscoveryInfo = BTreeMap<String, String>;

/// How invalid service types and display names are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Reject invalid input with a `ConfigError`.
    #[default]
    Strict,
    /// Repair invalid input (lowercase, replace, trim, truncate) where possible.
    Normalize,
}

/// Discovery namespace: 1-15 chars of `[a-z0-9-]`, at least one letter, no
/// hyphen at either end.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceDescriptor(String);

impl ServiceDescriptor {
    /// Validate `value` without modifying it.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        if value.is_empty() {
            return Err(ConfigError::EmptyServiceType);
        }
        if value.chars().count() > MAX_SERVICE_TYPE_LEN {
            return Err(ConfigError::ServiceTypeTooLong(value.to_string()));
        }
        if let Some(character) = value.chars().find(|c| !is_service_char(*c)) {
            return Err(ConfigError::InvalidServiceTypeCharacter {
                value: value.to_string(),
                character,
            });
        }
        if !value.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(ConfigError::ServiceTypeWithoutLetter(value.to_string()));
        }
        if value.starts_with('-') || value.ends_with('-') {
            return Err(ConfigError::ServiceTypeHyphenEdge(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    /// Repair `value` into a valid descriptor.
    ///
    /// Empty input, or input with no letter left after repair, still fails.
    pub fn normalize(value: &str) -> Result<Self, ConfigError> {
        if value.is_empty() {
            return Err(ConfigError::EmptyServiceType);
        }
        let replaced: String = value
            .chars()
            .map(|c| c.to_ascii_lowercase())
            .map(|c| if is_service_char(c) { c } else { '-' })
            .collect();
        let truncated: String = replaced
            .trim_matches('-')
            .chars()
            .take(MAX_SERVICE_TYPE_LEN)
            .collect();
        let repaired = truncated.trim_end_matches('-');
        if repaired.is_empty() {
            return Err(ConfigError::EmptyServiceType);
        }
        Self::parse(repaired)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_service_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
}

/// Local display name, at most 63 UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayName(String);

impl DisplayName {
    /// Validate `value` without modifying it.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        if value.is_empty() {
            return Err(ConfigError::EmptyDisplayName);
        }
        if value.len() > MAX_DISPLAY_NAME_BYTES {
            return Err(ConfigError::DisplayNameTooLong { len: value.len() });
        }
        Ok(Self(value.to_string()))
    }

    /// Substitute a placeholder for an empty name and truncate long names on a
    /// character boundary.
    pub fn normalize(value: &str) -> Self {
        if value.is_empty() {
            return Self(FALLBACK_DISPLAY_NAME.to_string());
        }
        let mut end = value.len().min(MAX_DISPLAY_NAME_BYTES);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        Self(value[..end].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keys that may appear in discovery metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryInfoKey {
    /// Identifies the application, e.g. a bundle identifier.
    Identifier,
    /// A short shared secret exchanged out of band.
    Passcode,
}

impl DiscoveryInfoKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identifier => "identifier",
            Self::Passcode => "passcode",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "identifier" => Some(Self::Identifier),
            "passcode" => Some(Self::Passcode),
            _ => None,
        }
    }
}

/// Key/value annotation advertised alongside presence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawDiscoveryInfo", into = "RawDiscoveryInfo")]
pub struct DiscoveryMetadata(BTreeMap<DiscoveryInfoKey, String>);

impl TryFrom<RawDiscoveryInfo> for DiscoveryMetadata {
    type Error = String;

    fn try_from(raw: RawDiscoveryInfo) -> Result<Self, Self::Error> {
        raw.into_iter()
            .map(|(key, value)| {
                DiscoveryInfoKey::from_name(&key)
                    .map(|key| (key, value))
                    .ok_or_else(|| format!("unknown discovery info key `{key}`"))
            })
            .collect::<Result<_, _>>()
            .map(Self)
    }
}

impl From<DiscoveryMetadata> for RawDiscoveryInfo {
    fn from(metadata: DiscoveryMetadata) -> Self {
        metadata.to_raw()
    }
}

impl DiscoveryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: DiscoveryInfoKey, value: impl Into<String>) -> Self {
        self.0.insert(key, value.into());
        self
    }

    pub fn insert(&mut self, key: DiscoveryInfoKey, value: impl Into<String>) {
        self.0.insert(key, value.into());
    }

    pub fn get(&self, key: DiscoveryInfoKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DiscoveryInfoKey, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// String form handed to the transport.
    pub fn to_raw(&self) -> RawDiscoveryInfo {
        self.iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_string()))
            .collect()
    }

    /// Every entry must fit one TXT record string.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in self.iter() {
            let len = key.as_str().len() + 1 + value.len();
            if len > MAX_METADATA_ENTRY_BYTES {
                return Err(ConfigError::MetadataEntryTooLarge {
                    key: key.as_str().to_string(),
                    len,
                });
            }
        }
        Ok(())
    }
}

/// Configuration for one start-to-stop epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearPeerConfig {
    /// Discovery namespace shared by all cooperating peers.
    pub service_type: String,
    /// Name other peers see for us.
    pub display_name: String,
    /// Metadata we advertise.
    pub my_discovery_info: Option<DiscoveryMetadata>,
    /// Metadata a discovered peer must advertise to be invited. Falls back to
    /// `my_discovery_info` when absent.
    pub target_discovery_info: Option<DiscoveryMetadata>,
    /// Upper bound on peers in the session (default: 1).
    pub max_peers: usize,
    /// Invitation timeout handed to the transport (default: 10 seconds).
    pub invitation_timeout_secs: u64,
    /// Strict rejection or normalization of invalid names.
    pub validation: ValidationMode,
}

impl Default for NearPeerConfig {
    fn default() -> Self {
        Self {
            service_type: "nearpeer".to_string(),
            display_name: FALLBACK_DISPLAY_NAME.to_string(),
            my_discovery_info: None,
            target_discovery_info: None,
            max_peers: 1,
            invitation_timeout_secs: DEFAULT_INVITATION_TIMEOUT_SECS,
            validation: ValidationMode::Strict,
        }
    }
}

impl NearPeerConfig {
    pub fn new(service_type: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    /// Create a config suitable for testing (short invitation timeout)
    pub fn for_testing(service_type: &str, display_name: &str) -> Self {
        Self {
            invitation_timeout_secs: 1,
            ..Self::new(service_type, display_name)
        }
    }

    #[must_use]
    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    #[must_use]
    pub fn with_my_discovery_info(mut self, info: DiscoveryMetadata) -> Self {
        self.my_discovery_info = Some(info);
        self
    }

    #[must_use]
    pub fn with_target_discovery_info(mut self, info: DiscoveryMetadata) -> Self {
        self.target_discovery_info = Some(info);
        self
    }

    #[must_use]
    pub fn with_validation(mut self, validation: ValidationMode) -> Self {
        self.validation = validation;
        self
    }

    #[must_use]
    pub fn with_invitation_timeout_secs(mut self, secs: u64) -> Self {
        self.invitation_timeout_secs = secs;
        self
    }

    /// Check every field and resolve defaults. Performs no I/O.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let (service, display_name) = match self.validation {
            ValidationMode::Strict => (
                ServiceDescriptor::parse(&self.service_type)?,
                DisplayName::parse(&self.display_name)?,
            ),
            ValidationMode::Normalize => (
                ServiceDescriptor::normalize(&self.service_type)?,
                DisplayName::normalize(&self.display_name),
            ),
        };
        if self.max_peers == 0 {
            return Err(ConfigError::InvalidMaxPeers);
        }
        if self.invitation_timeout_secs == 0 {
            return Err(ConfigError::InvalidInvitationTimeout);
        }
        for info in [&self.my_discovery_info, &self.target_discovery_info]
            .into_iter()
            .flatten()
        {
            info.validate()?;
        }

        let required = self
            .target_discovery_info
            .clone()
            .or_else(|| self.my_discovery_info.clone());

        Ok(ValidatedConfig {
            service,
            display_name,
            advertised: self.my_discovery_info.clone(),
            required,
            max_peers: self.max_peers,
            invitation_timeout: Duration::from_secs(self.invitation_timeout_secs),
        })
    }
}

/// Configuration after validation; immutable for one epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    pub service: ServiceDescriptor,
    pub display_name: DisplayName,
    /// Metadata advertised with our presence.
    pub advertised: Option<DiscoveryMetadata>,
    /// Metadata a discovered peer must match.
    pub required: Option<DiscoveryMetadata>,
    pub max_peers: usize,
    pub invitation_timeout: Duration,
}
