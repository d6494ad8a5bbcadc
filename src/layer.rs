use async_trait::async_trait;

use crate::entry::{StorageMode, StoredEntry};
use crate::error::CacheError;

/// A cache layer is one ordered backing store participating in a cache stack.
///
/// Layers are type-agnostic and work with `StoredEntry` which can hold either
/// typed values (for in-memory layers) or serialized JSON (for persistent layers).
///
/// Layers must keep expired entries readable until `cleanup` removes them; the
/// stack decides whether an expired value may still be served.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// A name for logging and error attribution.
    ///
    /// # Example
    /// - "memory"
    /// - "moka"
    /// - "redis"
    fn name(&self) -> &'static str;

    /// Returns the storage mode preference for this layer.
    ///
    /// Default implementation returns `Serialized` for safety.
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Serialized
    }

    /// Return the stored entry, or `None` for cache misses.
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError>;

    /// Store the entry, replacing any previous one.
    async fn set(&self, key: &str, entry: StoredEntry) -> Result<(), CacheError>;

    /// Remove the key. Removing a missing key is not an error.
    async fn evict(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every entry.
    async fn flush(&self) -> Result<(), CacheError>;

    /// Remove entries whose `expires_at` has passed.
    async fn cleanup(&self) -> Result<(), CacheError>;

    /// Whether the layer can currently serve requests.
    async fn is_available(&self) -> bool;
}
