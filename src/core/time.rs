//! Clock helpers.
//!
//! Simulation timing uses `tokio::time::Instant` (so tests can pause time);
//! timestamps that go on the wire are wall-clock epoch milliseconds.

use std::time::Duration;

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Duration as whole milliseconds, saturating.
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_millis_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(epoch_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_millis() {
        assert_eq!(millis(Duration::from_secs(300)), 300_000);
        assert_eq!(millis(Duration::from_micros(1500)), 1);
    }
}
