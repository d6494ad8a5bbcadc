//! cache-stack - A multi-layer cache with stale-while-revalidate refreshes
//!
//! This library provides:
//! - An ordered stack of cache layers with back-population on reads
//! - Fan-out writes, evictions, cleanup and flushes
//! - `get_or_set` with stale-while-revalidate semantics
//! - Per-key regeneration locking, so one key is never generated twice at once
//! - Best-effort extension hooks around every operation
//!
//! # Example
//!
//! ```ignore
//! use cache_stack::{CacheSettings, CacheStack, MemoryLayer, MemoryLayerConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cache_stack::CacheError> {
//!     let stack = CacheStack::builder()
//!         .layer(Arc::new(MemoryLayer::new(MemoryLayerConfig::default())))
//!         .build()?;
//!
//!     let settings = CacheSettings::new(Duration::from_secs(300))
//!         .with_stale_after(Duration::from_secs(60));
//!
//!     let user = stack
//!         .get_or_set("user:123", |_previous, _context| async move {
//!             Ok::<_, cache_stack::CacheError>("User data for user:123".to_string())
//!         }, settings)
//!         .await?;
//!     Ok(())
//! }
//! ```

mod builder;
mod entry;
mod error;
pub mod extensions;
mod layer;
pub mod layers;
mod refresh;
mod settings;
mod stack;
mod utils;

// Re-export public API
pub use builder::CacheStackBuilder;
pub use entry::{CacheValue, Entry, EntryMeta, Freshness, StorageMode, StoredEntry};
pub use error::CacheError;
pub use extensions::metrics::{CacheMetric, MetricsExtension, MetricsSink};
pub use extensions::{CacheExtension, ExtensionResult, RefreshMode};
pub use layer::CacheLayer;
pub use layers::memory::{MemoryLayer, MemoryLayerConfig};
pub use layers::moka::{MokaLayer, MokaLayerConfig};
pub use layers::redis::{RedisLayer, RedisLayerConfig};
pub use refresh::{RefreshCoordinator, RefreshGuard};
pub use settings::CacheSettings;
pub use stack::CacheStack;
pub use utils::now_ms;
