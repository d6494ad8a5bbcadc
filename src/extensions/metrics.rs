//! Metrics extension for cache stacks.
//!
//! This module provides a `MetricsExtension` that turns the stack's hook calls
//! into `CacheMetric` events for a user-provided sink.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cache_stack::{CacheStack, MemoryLayer, MemoryLayerConfig, MetricsExtension};
//!
//! let sink = Arc::new(MyMetricsSink::new());
//! let stack = CacheStack::builder()
//!     .layer(Arc::new(MemoryLayer::new(MemoryLayerConfig::default())))
//!     .extension(Arc::new(MetricsExtension::new(sink.clone())))
//!     .build()?;
//! ```

use async_trait::async_trait;
use std::sync::Arc;

use super::{CacheExtension, ExtensionResult, RefreshMode};
use crate::entry::EntryMeta;

/// Metrics emitted by the MetricsExtension.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheMetric {
    /// Emitted on every stack read.
    Read {
        /// The cache key that was read.
        key: String,
        /// Index of the layer that had the key, `None` on a miss.
        hit_layer: Option<usize>,
    },
    /// Emitted on every stack write.
    Write {
        key: String,
        /// Expiry of the written entry (unix ms).
        expires_at: i64,
        succeeded: bool,
    },
    /// Emitted on every eviction.
    Evict { key: String, succeeded: bool },
    /// Emitted on every cleanup pass.
    Cleanup { succeeded: bool },
    /// Emitted on every flush.
    Flush { succeeded: bool },
    /// Emitted when a regeneration finishes.
    Refresh {
        key: String,
        mode: RefreshMode,
        succeeded: bool,
    },
}

/// Trait for receiving cache metrics.
///
/// # Example
///
/// ```ignore
/// use std::sync::Mutex;
/// use async_trait::async_trait;
/// use cache_stack::{CacheMetric, MetricsSink};
///
/// struct BufferedSink {
///     buffer: Mutex<Vec<CacheMetric>>,
/// }
///
/// #[async_trait]
/// impl MetricsSink for BufferedSink {
///     fn emit(&self, metric: CacheMetric) {
///         self.buffer.lock().unwrap().push(metric);
///     }
///
///     async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///         // Send buffered metrics to your backend
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Emit a single metric.
    ///
    /// This is called in the hot path of cache operations.
    /// Implementations should be fast (e.g., buffer metrics in memory).
    fn emit(&self, metric: CacheMetric);

    /// Flush any buffered metrics.
    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// An extension that emits a metric for every observed operation.
pub struct MetricsExtension {
    sink: Arc<dyn MetricsSink>,
}

impl MetricsExtension {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        MetricsExtension { sink }
    }
}

#[async_trait]
impl CacheExtension for MetricsExtension {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn after_get(&self, key: &str, hit_layer: Option<usize>) -> ExtensionResult {
        self.sink.emit(CacheMetric::Read {
            key: key.to_string(),
            hit_layer,
        });
        Ok(())
    }

    async fn after_set(&self, key: &str, meta: EntryMeta, succeeded: bool) -> ExtensionResult {
        self.sink.emit(CacheMetric::Write {
            key: key.to_string(),
            expires_at: meta.expires_at,
            succeeded,
        });
        Ok(())
    }

    async fn after_evict(&self, key: &str, succeeded: bool) -> ExtensionResult {
        self.sink.emit(CacheMetric::Evict {
            key: key.to_string(),
            succeeded,
        });
        Ok(())
    }

    async fn after_cleanup(&self, succeeded: bool) -> ExtensionResult {
        self.sink.emit(CacheMetric::Cleanup { succeeded });
        Ok(())
    }

    async fn after_flush(&self, succeeded: bool) -> ExtensionResult {
        self.sink.emit(CacheMetric::Flush { succeeded });
        Ok(())
    }

    async fn after_refresh(
        &self,
        key: &str,
        mode: RefreshMode,
        error: Option<&str>,
    ) -> ExtensionResult {
        self.sink.emit(CacheMetric::Refresh {
            key: key.to_string(),
            mode,
            succeeded: error.is_none(),
        });
        Ok(())
    }
}
