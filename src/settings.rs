use std::time::Duration;

/// Per-call settings for [`CacheStack::get_or_set`](crate::CacheStack::get_or_set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Validity window assigned to newly generated entries.
    pub time_to_live: Duration,
    /// Age past which an existing entry is served stale and refreshed in the background.
    ///
    /// Zero means entries are stale as soon as they are cached. Set this equal to
    /// `time_to_live` to keep entries fully fresh for their whole lifetime.
    pub stale_after: Duration,
}

impl CacheSettings {
    /// Settings with the given time to live and a zero stale threshold.
    pub fn new(time_to_live: Duration) -> Self {
        CacheSettings {
            time_to_live,
            stale_after: Duration::ZERO,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_after_defaults_to_zero() {
        let settings = CacheSettings::new(Duration::from_secs(60));
        assert_eq!(settings.stale_after, Duration::ZERO);

        let settings = settings.with_stale_after(Duration::from_secs(30));
        assert_eq!(settings.time_to_live, Duration::from_secs(60));
        assert_eq!(settings.stale_after, Duration::from_secs(30));
    }
}
