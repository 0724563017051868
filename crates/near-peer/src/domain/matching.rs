//! Discovery-info matching.
//!
//! A discovered peer matches when, for every key in the required metadata, it
//! advertises exactly the same value. Extra keys on the discovered side are
//! ignored; a missing key or missing metadata is a mismatch.

use super::value_objects::{DiscoveryMetadata, RawDiscoveryInfo};

/// Returns true when `discovered` satisfies every entry of `required`.
///
/// Absent or empty `required` metadata matches every peer.
pub fn discovery_info_matches(
    required: Option<&DiscoveryMetadata>,
    discovered: Option<&RawDiscoveryInfo>,
) -> bool {
    let Some(required) = required.filter(|r| !r.is_empty()) else {
        return true;
    };
    let Some(discovered) = discovered else {
        return false;
    };

    required
        .iter()
        .all(|(key, value)| discovered.get(key.as_str()).map(String::as_str) == Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DiscoveryInfoKey;

    fn raw(pairs: &[(&str, &str)]) -> RawDiscoveryInfo {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn required_identifier(value: &str) -> DiscoveryMetadata {
        DiscoveryMetadata::new().with(DiscoveryInfoKey::Identifier, value)
    }

    #[test]
    fn test_no_requirement_matches_everything() {
        assert!(discovery_info_matches(None, None));
        assert!(discovery_info_matches(None, Some(&raw(&[("identifier", "y")]))));
        assert!(discovery_info_matches(Some(&DiscoveryMetadata::new()), None));
    }

    #[test]
    fn test_equal_value_matches_with_extra_keys() {
        let required = required_identifier("x");
        let discovered = raw(&[("identifier", "x"), ("passcode", "1234"), ("color", "red")]);
        assert!(discovery_info_matches(Some(&required), Some(&discovered)));
    }

    #[test]
    fn test_different_value_never_matches() {
        let required = required_identifier("x");
        assert!(!discovery_info_matches(
            Some(&required),
            Some(&raw(&[("identifier", "y")]))
        ));
        assert!(!discovery_info_matches(
            Some(&required),
            Some(&raw(&[("identifier", "X")]))
        ));
    }

    #[test]
    fn test_missing_key_or_metadata_is_mismatch() {
        let required = required_identifier("x");
        assert!(!discovery_info_matches(Some(&required), None));
        assert!(!discovery_info_matches(
            Some(&required),
            Some(&raw(&[("passcode", "x")]))
        ));
    }

    #[test]
    fn test_all_required_keys_must_match() {
        let required = required_identifier("x").with(DiscoveryInfoKey::Passcode, "4989");
        assert!(discovery_info_matches(
            Some(&required),
            Some(&raw(&[("identifier", "x"), ("passcode", "4989")]))
        ));
        assert!(!discovery_info_matches(
            Some(&required),
            Some(&raw(&[("identifier", "x"), ("passcode", "0000")]))
        ));
    }
}
