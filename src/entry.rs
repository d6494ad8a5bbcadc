use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheError;
use crate::utils::duration_ms;

/// Bounds every value stored in a cache stack must satisfy.
///
/// Values are cloned out of in-memory layers and serialized for persistent ones.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A cache entry containing a value and the times it was cached and expires.
///
/// Entries are never mutated after construction; a refresh produces a new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<V> {
    /// The cached value.
    pub value: V,

    /// Unix timestamp in milliseconds when the value was produced.
    pub cached_at: i64,

    /// Unix timestamp in milliseconds.
    /// Do not serve data after this point without regenerating it.
    pub expires_at: i64,
}

/// How usable an entry is at a given instant for a given stale threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Younger than the caller's stale threshold.
    Fresh,
    /// Past the stale threshold but before the entry's own expiry.
    Stale,
    /// Past the entry's own expiry.
    Expired,
}

/// The timestamps of an entry, without its value.
///
/// Handed to extensions, which are not generic over the value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub cached_at: i64,
    pub expires_at: i64,
}

impl<V> Entry<V> {
    /// Create a new cache entry valid for `time_to_live` from `cached_at`.
    pub fn new(value: V, cached_at: i64, time_to_live: Duration) -> Self {
        Entry {
            value,
            cached_at,
            expires_at: cached_at.saturating_add(duration_ms(time_to_live)),
        }
    }

    /// The validity window the entry was created with.
    pub fn time_to_live(&self) -> Duration {
        Duration::from_millis((self.expires_at - self.cached_at).max(0) as u64)
    }

    /// The instant after which the entry counts as stale for `stale_after`.
    pub fn stale_at(&self, stale_after: Duration) -> i64 {
        self.cached_at.saturating_add(duration_ms(stale_after))
    }

    /// Check if the entry has passed its own expiry.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }

    /// Classify the entry.
    ///
    /// The stale boundary comes from the caller while the hard expiry belongs to
    /// the entry, so the same entry can classify differently across call sites.
    pub fn freshness(&self, now_ms: i64, stale_after: Duration) -> Freshness {
        if now_ms < self.stale_at(stale_after) {
            Freshness::Fresh
        } else if !self.is_expired(now_ms) {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            cached_at: self.cached_at,
            expires_at: self.expires_at,
        }
    }
}

/// Type-erased storage entry that supports both typed and serialized storage.
///
/// This enum allows layers to be type-agnostic while still supporting zero-copy
/// storage for in-memory layers (via `Typed`) and serialization for
/// persistent layers (via `Serialized`).
#[derive(Clone)]
pub enum StoredEntry {
    /// For in-memory layers: zero-copy storage of typed values.
    ///
    /// The value is stored as a type-erased `Arc<dyn Any>` which can be
    /// cloned cheaply and downcast back to the original type.
    ///
    /// The serializer converts this entry to the `Serialized` form when it has
    /// to be written to a persistent layer.
    Typed {
        value: Arc<dyn Any + Send + Sync>,
        meta: EntryMeta,
        serializer: Arc<dyn Fn() -> Result<String, CacheError> + Send + Sync>,
    },
    /// For persistent layers: the JSON encoding of an `Entry<V>`.
    Serialized { data: String, meta: EntryMeta },
}

/// Storage mode preference for layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Layer prefers typed values (in-memory layers).
    Typed,
    /// Layer prefers serialized values (persistent layers).
    Serialized,
}

impl std::fmt::Debug for StoredEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoredEntry::Typed { meta, .. } => f.debug_struct("Typed").field("meta", meta).finish(),
            StoredEntry::Serialized { data, meta } => f
                .debug_struct("Serialized")
                .field("data", data)
                .field("meta", meta)
                .finish(),
        }
    }
}

impl StoredEntry {
    /// Wrap a typed entry for storage, keeping the ability to serialize it later.
    pub fn from_entry<V: CacheValue>(entry: Entry<V>) -> Self {
        let meta = entry.meta();
        let value = Arc::new(entry.value);
        let value_for_serializer = Arc::clone(&value);

        let serializer = Arc::new(move || {
            let entry = Entry {
                value: value_for_serializer.as_ref().clone(),
                cached_at: meta.cached_at,
                expires_at: meta.expires_at,
            };
            serde_json::to_string(&entry)
                .map_err(|e| CacheError::Serialization(format!("Serialization failed: {}", e)))
        });

        StoredEntry::Typed {
            value,
            meta,
            serializer,
        }
    }

    /// Create a StoredEntry from the JSON encoding of an `Entry<V>`.
    ///
    /// Only the timestamps are read; the value stays encoded until a caller
    /// asks for it with a concrete type.
    pub fn from_serialized(data: String) -> Result<Self, CacheError> {
        let meta: EntryMeta = serde_json::from_str(&data)
            .map_err(|e| CacheError::Serialization(format!("Deserialization failed: {}", e)))?;
        Ok(StoredEntry::Serialized { data, meta })
    }

    /// Convert StoredEntry to a typed Entry<V>.
    ///
    /// This handles both variants:
    /// - `Typed`: Attempts to downcast the Arc value to V and clones it
    /// - `Serialized`: Deserializes the JSON string to `Entry<V>`
    pub fn into_typed<V: CacheValue>(self) -> Result<Entry<V>, CacheError> {
        match self {
            StoredEntry::Typed { value, meta, .. } => {
                let typed_arc = value
                    .downcast::<V>()
                    .map_err(|_| CacheError::Serialization("Type downcast failed".to_string()))?;

                Ok(Entry {
                    value: (*typed_arc).clone(),
                    cached_at: meta.cached_at,
                    expires_at: meta.expires_at,
                })
            }
            StoredEntry::Serialized { data, .. } => serde_json::from_str(&data)
                .map_err(|e| CacheError::Serialization(format!("Deserialization failed: {}", e))),
        }
    }

    pub fn meta(&self) -> EntryMeta {
        match self {
            StoredEntry::Typed { meta, .. } => *meta,
            StoredEntry::Serialized { meta, .. } => *meta,
        }
    }

    pub fn expires_at(&self) -> i64 {
        self.meta().expires_at
    }

    /// Check if the entry has passed its own expiry.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at()
    }

    /// Convert a Typed entry to Serialized format using its serializer.
    ///
    /// Returns the same entry if already Serialized.
    pub fn to_serialized(self) -> Result<Self, CacheError> {
        match self {
            StoredEntry::Serialized { .. } => Ok(self),
            StoredEntry::Typed {
                meta, serializer, ..
            } => Ok(StoredEntry::Serialized {
                data: serializer()?,
                meta,
            }),
        }
    }

    /// Convert StoredEntry to match the target storage mode.
    ///
    /// Serialized entries are kept as-is for typed layers; they are decoded
    /// lazily when a caller asks for a concrete type.
    pub fn convert_for_mode(self, target_mode: StorageMode) -> Result<Self, CacheError> {
        match (&self, target_mode) {
            (StoredEntry::Typed { .. }, StorageMode::Serialized) => self.to_serialized(),
            _ => Ok(self),
        }
    }
}
