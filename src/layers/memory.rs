use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::entry::{StorageMode, StoredEntry};
use crate::error::CacheError;
use crate::layer::CacheLayer;
use crate::utils::now_ms;

/// Configuration for MemoryLayer.
#[derive(Debug, Clone, Default)]
pub struct MemoryLayerConfig {
    /// Cap on the number of entries.
    ///
    /// When a `set` pushes the map over the cap, expired entries are dropped
    /// first, then the entries closest to expiry. `None` means unbounded.
    pub max_items: Option<usize>,
}

/// Thread-safe in-memory cache layer using HashMap with RwLock.
///
/// This is a simple layer suitable for:
/// - Low to moderate concurrency (<8 threads)
/// - Small to medium cache sizes (<1000 items)
/// - Tests and applications prioritizing simplicity over performance
///
/// For high-concurrency scenarios, consider using `MokaLayer` instead.
#[derive(Default)]
pub struct MemoryLayer {
    state: RwLock<HashMap<String, StoredEntry>>,
    max_items: Option<usize>,
}

impl MemoryLayer {
    /// Create a new MemoryLayer with the given configuration.
    pub fn new(config: MemoryLayerConfig) -> Self {
        MemoryLayer {
            state: RwLock::new(HashMap::new()),
            max_items: config.max_items,
        }
    }

    /// Number of entries currently held, expired ones included.
    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn trim(state: &mut HashMap<String, StoredEntry>, max_items: usize) {
        if state.len() <= max_items {
            return;
        }

        let now = now_ms();
        state.retain(|_, entry| !entry.is_expired(now));

        if state.len() > max_items {
            let mut entries: Vec<_> = state
                .iter()
                .map(|(k, v)| (k.clone(), v.expires_at()))
                .collect();
            entries.sort_by_key(|(_, expires)| *expires);

            let to_remove = state.len() - max_items;
            for (key, _) in entries.into_iter().take(to_remove) {
                state.remove(&key);
            }
        }
    }
}

#[async_trait]
impl CacheLayer for MemoryLayer {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn storage_mode(&self) -> StorageMode {
        StorageMode::Typed
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        let state = self.state.read().await;
        Ok(state.get(key).cloned())
    }

    async fn set(&self, key: &str, entry: StoredEntry) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        state.insert(key.to_string(), entry);

        if let Some(max_items) = self.max_items {
            Self::trim(&mut state, max_items);
        }
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<(), CacheError> {
        self.state.write().await.remove(key);
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.state.write().await.clear();
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), CacheError> {
        let now = now_ms();
        let mut state = self.state.write().await;
        let before = state.len();
        state.retain(|_, entry| !entry.is_expired(now));

        tracing::debug!(
            "Cleaned up memory layer: removed={}, remaining={}",
            before - state.len(),
            state.len()
        );
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}
