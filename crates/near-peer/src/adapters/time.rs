use crate::domain::Timestamp;
use crate::ports::TimeSource;

// ============================================================================
// SystemTimeSource - Production Time Source
// ============================================================================

/// Time source backed by the system clock, in milliseconds since the epoch.
///
/// # Example
///
/// ```rust
/// use near_peer::adapters::SystemTimeSource;
/// use near_peer::ports::TimeSource;
///
/// let now = SystemTimeSource::new().now();
/// assert!(now.as_millis() > 0);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime, UNIX_EPOCH};

        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        Timestamp::new(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_is_monotonic_enough() {
        let source = SystemTimeSource::new();
        let first = source.now();
        let second = source.now();
        assert!(second >= first);
    }
}
