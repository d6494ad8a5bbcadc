use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;

use crate::entry::{StorageMode, StoredEntry};
use crate::error::CacheError;
use crate::layer::CacheLayer;
use crate::utils::now_ms;

/// Configuration for MokaLayer.
#[derive(Debug, Clone)]
pub struct MokaLayerConfig {
    /// Maximum number of entries the cache can hold.
    pub max_capacity: u64,

    /// Time to idle: entries are dropped if not accessed within this duration.
    /// `None` means entries don't expire based on idle time.
    ///
    /// Entry expiry itself is tracked by `expires_at` and enforced by `cleanup`,
    /// so expired entries remain available as a fallback until then.
    pub time_to_idle: Option<Duration>,
}

impl Default for MokaLayerConfig {
    fn default() -> Self {
        MokaLayerConfig {
            max_capacity: 10_000,
            time_to_idle: None,
        }
    }
}

/// High-performance concurrent cache layer using Moka.
///
/// MokaLayer provides:
/// - Lock-free concurrent access for reads and writes
/// - Automatic background eviction by capacity
/// - Excellent performance under high concurrency (>8 threads)
/// - Suitable for large cache sizes (>10,000 items)
pub struct MokaLayer {
    cache: Cache<String, StoredEntry>,
}

impl MokaLayer {
    /// Create a new MokaLayer with the given configuration.
    ///
    /// # Example
    /// ```ignore
    /// let layer = MokaLayer::new(MokaLayerConfig {
    ///     max_capacity: 10_000,
    ///     time_to_idle: Some(Duration::from_secs(60)),
    /// });
    /// ```
    pub fn new(config: MokaLayerConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_capacity);

        if let Some(tti) = config.time_to_idle {
            builder = builder.time_to_idle(tti);
        }

        MokaLayer {
            cache: builder.build(),
        }
    }
}

#[async_trait]
impl CacheLayer for MokaLayer {
    fn name(&self) -> &'static str {
        "moka"
    }

    fn storage_mode(&self) -> StorageMode {
        StorageMode::Typed
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        Ok(self.cache.get(key).await)
    }

    async fn set(&self, key: &str, entry: StoredEntry) -> Result<(), CacheError> {
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), CacheError> {
        let now = now_ms();
        let expired: Vec<_> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key)
            .collect();

        for key in &expired {
            self.cache.invalidate(key.as_str()).await;
        }
        self.cache.run_pending_tasks().await;

        tracing::debug!("Cleaned up moka layer: removed={}", expired.len());
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}
