use futures::future::join_all;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::builder::CacheStackBuilder;
use crate::entry::{CacheValue, Entry, Freshness, StoredEntry};
use crate::error::CacheError;
use crate::extensions::{CacheExtension, Extensions, RefreshMode};
use crate::layer::CacheLayer;
use crate::refresh::{RefreshCoordinator, RefreshGuard};
use crate::settings::CacheSettings;
use crate::utils::now_ms;

/// An ordered set of cache layers behind a single get/set/evict/cleanup surface.
///
/// Layer 0 is read first and back-populated first. `get_or_set` adds
/// stale-while-revalidate on top, with at most one regeneration per key in
/// flight at a time.
///
/// `C` is a context value handed to every generator. Cloning the stack is cheap
/// and every clone shares the same layers, locks and extensions.
pub struct CacheStack<C = ()> {
    inner: Arc<Inner<C>>,
}

struct Inner<C> {
    layers: Vec<Arc<dyn CacheLayer>>,
    coordinator: Arc<RefreshCoordinator>,
    extensions: Extensions,
    context: Arc<C>,
}

impl<C> Clone for CacheStack<C> {
    fn clone(&self) -> Self {
        CacheStack {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl CacheStack<()> {
    /// Create a stack without a generator context.
    ///
    /// Fails if `layers` is empty. An empty `extensions` list is valid.
    pub fn new(
        layers: Vec<Arc<dyn CacheLayer>>,
        extensions: Vec<Arc<dyn CacheExtension>>,
    ) -> Result<Self, CacheError> {
        Self::with_context((), layers, extensions)
    }

    pub fn builder() -> CacheStackBuilder<()> {
        CacheStackBuilder::new()
    }
}

impl<C> CacheStack<C>
where
    C: Send + Sync + 'static,
{
    /// Create a stack whose generators receive `context`.
    ///
    /// # Example
    /// ```ignore
    /// let stack = CacheStack::with_context(
    ///     db_pool,
    ///     vec![memory_layer, redis_layer],
    ///     vec![],
    /// )?;
    /// ```
    pub fn with_context(
        context: C,
        layers: Vec<Arc<dyn CacheLayer>>,
        extensions: Vec<Arc<dyn CacheExtension>>,
    ) -> Result<Self, CacheError> {
        if layers.is_empty() {
            return Err(CacheError::Configuration(
                "a cache stack needs at least one layer".to_string(),
            ));
        }

        let extensions = Extensions::new(extensions);
        tracing::debug!(
            "Created cache stack: layers=[{}], extensions={}",
            layers.iter().map(|l| l.name()).collect::<Vec<_>>().join(", "),
            extensions.len()
        );

        Ok(CacheStack {
            inner: Arc::new(Inner {
                layers,
                coordinator: Arc::new(RefreshCoordinator::new()),
                extensions,
                context: Arc::new(context),
            }),
        })
    }

    /// The layers in priority order.
    pub fn layers(&self) -> &[Arc<dyn CacheLayer>] {
        &self.inner.layers
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.inner.coordinator
    }

    pub fn context(&self) -> &Arc<C> {
        &self.inner.context
    }

    /// Return the first entry found, reading layers in priority order.
    ///
    /// Layers ahead of the one that had the key are back-populated before this
    /// returns; layers after it are left untouched. A layer that fails to read
    /// counts as a miss for that layer.
    pub async fn get<V: CacheValue>(&self, key: &str) -> Result<Option<Entry<V>>, CacheError> {
        let extensions = &self.inner.extensions;
        extensions.before_get(key).await;

        let result = self.read_through::<V>(key).await;
        let hit_layer = match &result {
            Ok(Some((_, index))) => Some(*index),
            _ => None,
        };
        extensions.after_get(key, hit_layer).await;

        result.map(|found| found.map(|(entry, _)| entry))
    }

    async fn read_through<V: CacheValue>(
        &self,
        key: &str,
    ) -> Result<Option<(Entry<V>, usize)>, CacheError> {
        let layers = &self.inner.layers;

        for (index, layer) in layers.iter().enumerate() {
            let stored = match layer.get(key).await {
                Ok(Some(stored)) => stored,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        "Cache layer read failed, treating as miss: layer={}, key={}, error={}",
                        layer.name(),
                        key,
                        e
                    );
                    continue;
                }
            };

            let entry = stored.into_typed::<V>()?;
            if index > 0 {
                self.back_populate(key, &entry, &layers[..index]).await;
            }
            return Ok(Some((entry, index)));
        }

        Ok(None)
    }

    async fn back_populate<V: CacheValue>(
        &self,
        key: &str,
        entry: &Entry<V>,
        layers: &[Arc<dyn CacheLayer>],
    ) {
        let stored = StoredEntry::from_entry(entry.clone());
        let results = join_all(
            layers
                .iter()
                .map(|layer| Self::write_layer(layer, key, stored.clone())),
        )
        .await;

        for (layer, result) in layers.iter().zip(results) {
            match result {
                Ok(()) => tracing::debug!(
                    "Back-populated cache layer: layer={}, key={}",
                    layer.name(),
                    key
                ),
                Err(e) => tracing::warn!(
                    "Failed to back-populate cache layer: layer={}, key={}, error={}",
                    layer.name(),
                    key,
                    e
                ),
            }
        }
    }

    async fn write_layer(
        layer: &Arc<dyn CacheLayer>,
        key: &str,
        entry: StoredEntry,
    ) -> Result<(), CacheError> {
        let converted = entry.convert_for_mode(layer.storage_mode())?;
        layer.set(key, converted).await
    }

    /// Cache `value` for `time_to_live` starting now, in every layer.
    pub async fn set<V: CacheValue>(
        &self,
        key: &str,
        value: V,
        time_to_live: Duration,
    ) -> Result<Entry<V>, CacheError> {
        self.set_entry(key, Entry::new(value, now_ms(), time_to_live))
            .await
    }

    /// Write `entry` to every layer.
    ///
    /// All layers are attempted even if one fails; the first failure is
    /// returned.
    pub async fn set_entry<V: CacheValue>(
        &self,
        key: &str,
        entry: Entry<V>,
    ) -> Result<Entry<V>, CacheError> {
        let meta = entry.meta();
        let extensions = &self.inner.extensions;
        extensions.before_set(key, meta).await;

        let stored = StoredEntry::from_entry(entry.clone());
        let results = join_all(
            self.inner
                .layers
                .iter()
                .map(|layer| Self::write_layer(layer, key, stored.clone())),
        )
        .await;
        self.log_failures("set", key, &results);

        let failure = results.into_iter().find_map(Result::err);
        extensions.after_set(key, meta, failure.is_none()).await;

        match failure {
            Some(e) => Err(e),
            None => Ok(entry),
        }
    }

    /// Remove `key` from every layer.
    ///
    /// A failing layer does not stop the others; all failures are reported
    /// together as `CacheError::Layers`.
    pub async fn evict(&self, key: &str) -> Result<(), CacheError> {
        let extensions = &self.inner.extensions;
        extensions.before_evict(key).await;

        let results = join_all(self.inner.layers.iter().map(|layer| layer.evict(key))).await;
        self.log_failures("evict", key, &results);

        let outcome = CacheError::collect(results);
        extensions.after_evict(key, outcome.is_ok()).await;
        outcome
    }

    /// Ask every layer to drop its expired entries.
    pub async fn cleanup(&self) -> Result<(), CacheError> {
        let extensions = &self.inner.extensions;
        extensions.before_cleanup().await;

        let results = join_all(self.inner.layers.iter().map(|layer| layer.cleanup())).await;
        self.log_failures("cleanup", "", &results);

        let outcome = CacheError::collect(results);
        extensions.after_cleanup(outcome.is_ok()).await;
        outcome
    }

    /// Remove every entry from every layer.
    pub async fn flush(&self) -> Result<(), CacheError> {
        let extensions = &self.inner.extensions;
        extensions.before_flush().await;

        let results = join_all(self.inner.layers.iter().map(|layer| layer.flush())).await;
        self.log_failures("flush", "", &results);

        let outcome = CacheError::collect(results);
        extensions.after_flush(outcome.is_ok()).await;
        outcome
    }

    /// True only if every layer reports itself available.
    pub async fn is_available(&self) -> bool {
        join_all(self.inner.layers.iter().map(|layer| layer.is_available()))
            .await
            .into_iter()
            .all(|available| available)
    }

    fn log_failures(&self, operation: &str, key: &str, results: &[Result<(), CacheError>]) {
        for (layer, result) in self.inner.layers.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(
                    "Cache layer {} failed: layer={}, key={}, error={}",
                    operation,
                    layer.name(),
                    key,
                    e
                );
            }
        }
    }

    /// Stale-while-revalidate: get the cached value or generate it.
    ///
    /// - Missing: wait for the key's lock, re-check the cache, then generate inline.
    /// - Fresh (younger than `settings.stale_after`): return it.
    /// - Stale but not expired: return it and regenerate in the background,
    ///   unless a regeneration for the key is already in flight.
    /// - Expired: regenerate inline if no one else is; otherwise return the
    ///   expired value rather than wait.
    ///
    /// Generator errors reach the caller unchanged on the inline paths. Errors
    /// from background regenerations only reach the extensions and the log.
    ///
    /// # Example
    /// ```ignore
    /// let settings = CacheSettings::new(Duration::from_secs(300))
    ///     .with_stale_after(Duration::from_secs(60));
    ///
    /// let user = stack
    ///     .get_or_set("user:123", |_previous, db| async move {
    ///         db.load_user("user:123").await
    ///     }, settings)
    ///     .await?;
    /// ```
    pub async fn get_or_set<V, E, F, Fut>(
        &self,
        key: &str,
        generator: F,
        settings: CacheSettings,
    ) -> Result<V, E>
    where
        V: CacheValue,
        E: From<CacheError> + std::fmt::Display + Send + 'static,
        F: FnOnce(Option<V>, Arc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let Some(entry) = self.get::<V>(key).await? else {
            return self.generate_on_miss(key, generator, settings).await;
        };

        match entry.freshness(now_ms(), settings.stale_after) {
            Freshness::Fresh => Ok(entry.value),
            Freshness::Stale => {
                if let Some(guard) = self.inner.coordinator.try_lock(key) {
                    tracing::debug!("Serving stale entry, refreshing in background: key={}", key);
                    self.spawn_refresh(guard, entry.value.clone(), generator, settings);
                } else {
                    tracing::debug!("Serving stale entry, refresh in flight: key={}", key);
                }
                Ok(entry.value)
            }
            Freshness::Expired => match self.inner.coordinator.try_lock(key) {
                Some(_guard) => {
                    let previous = Some(entry.value);
                    self.regenerate(key, previous, generator, settings, RefreshMode::Inline)
                        .await
                }
                None => {
                    tracing::debug!(
                        "Serving expired entry, refresh already in flight: key={}",
                        key
                    );
                    Ok(entry.value)
                }
            },
        }
    }

    async fn generate_on_miss<V, E, F, Fut>(
        &self,
        key: &str,
        generator: F,
        settings: CacheSettings,
    ) -> Result<V, E>
    where
        V: CacheValue,
        E: From<CacheError> + std::fmt::Display + Send + 'static,
        F: FnOnce(Option<V>, Arc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let _guard = self.inner.coordinator.lock(key).await;

        // Another caller may have filled the key while we waited.
        if let Some(entry) = self.get::<V>(key).await? {
            return Ok(entry.value);
        }

        self.regenerate(key, None, generator, settings, RefreshMode::Inline)
            .await
    }

    fn spawn_refresh<V, E, F, Fut>(
        &self,
        guard: RefreshGuard,
        previous: V,
        generator: F,
        settings: CacheSettings,
    ) where
        V: CacheValue,
        E: From<CacheError> + std::fmt::Display + Send + 'static,
        F: FnOnce(Option<V>, Arc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let stack = self.clone();

        // Detached: the caller returning or being cancelled does not stop it.
        tokio::spawn(async move {
            let key = guard.key().to_string();
            let _ = stack
                .regenerate(&key, Some(previous), generator, settings, RefreshMode::Background)
                .await;
            drop(guard);
        });
    }

    /// Run the generator and write its value through every layer.
    ///
    /// The caller must hold the key's `RefreshGuard`.
    async fn regenerate<V, E, F, Fut>(
        &self,
        key: &str,
        previous: Option<V>,
        generator: F,
        settings: CacheSettings,
        mode: RefreshMode,
    ) -> Result<V, E>
    where
        V: CacheValue,
        E: From<CacheError> + std::fmt::Display + Send + 'static,
        F: FnOnce(Option<V>, Arc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let context = Arc::clone(&self.inner.context);
        let result = match generator(previous, context).await {
            Ok(value) => self
                .set(key, value, settings.time_to_live)
                .await
                .map(|entry| entry.value)
                .map_err(E::from),
            Err(e) => Err(e),
        };

        let error = result.as_ref().err().map(ToString::to_string);
        if let Some(e) = &error {
            tracing::warn!(
                "Cache refresh failed: key={}, mode={:?}, error={}",
                key,
                mode,
                e
            );
        }
        self.inner
            .extensions
            .after_refresh(key, mode, error.as_deref())
            .await;

        result
    }

    /// Run `cleanup` every `interval` in a background task.
    ///
    /// The task stops on its own once every clone of the stack is dropped, or
    /// when the returned handle is aborted.
    pub fn spawn_auto_cleanup(&self, interval: Duration) -> JoinHandle<()> {
        let inner: Weak<Inner<C>> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    tracing::debug!("Cache stack dropped, stopping auto cleanup");
                    break;
                };

                if let Err(e) = (CacheStack { inner }).cleanup().await {
                    tracing::warn!("Auto cleanup failed: error={}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{MemoryLayer, MemoryLayerConfig};
    use crate::entry::EntryMeta;
    use crate::extensions::ExtensionResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A layer whose every operation fails.
    struct BrokenLayer;

    #[async_trait]
    impl CacheLayer for BrokenLayer {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
            Err(CacheError::operation("broken", key, "offline"))
        }

        async fn set(&self, key: &str, _entry: StoredEntry) -> Result<(), CacheError> {
            Err(CacheError::operation("broken", key, "offline"))
        }

        async fn evict(&self, key: &str) -> Result<(), CacheError> {
            Err(CacheError::operation("broken", key, "offline"))
        }

        async fn flush(&self) -> Result<(), CacheError> {
            Err(CacheError::operation("broken", "", "offline"))
        }

        async fn cleanup(&self) -> Result<(), CacheError> {
            Err(CacheError::operation("broken", "", "offline"))
        }

        async fn is_available(&self) -> bool {
            false
        }
    }

    fn memory() -> Arc<MemoryLayer> {
        Arc::new(MemoryLayer::new(MemoryLayerConfig::default()))
    }

    #[test]
    fn test_rejects_empty_layers() {
        let result = CacheStack::new(vec![], vec![]);
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_accepts_empty_extensions() {
        let stack = CacheStack::new(vec![memory()], vec![]).unwrap();
        assert_eq!(stack.layers().len(), 1);
    }

    #[tokio::test]
    async fn test_evict_continues_past_failing_layer() {
        let l1 = memory();
        let l3 = memory();
        let stack = CacheStack::new(vec![l1.clone(), Arc::new(BrokenLayer), l3.clone()], vec![])
            .unwrap();

        let entry = StoredEntry::from_entry(Entry::new(1u8, now_ms(), Duration::from_secs(60)));
        l1.set("key", entry.clone()).await.unwrap();
        l3.set("key", entry).await.unwrap();

        let err = stack.evict("key").await.unwrap_err();
        match err {
            CacheError::Layers(failures) => {
                assert_eq!(failures.len(), 1);
                assert!(matches!(
                    &failures[0],
                    CacheError::Operation { layer, .. } if layer == "broken"
                ));
            }
            other => panic!("Expected Layers error, got {:?}", other),
        }

        assert!(l1.get("key").await.unwrap().is_none());
        assert!(l3.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_and_flush_continue_past_failing_layer() {
        let l2 = memory();
        let stack = CacheStack::new(vec![Arc::new(BrokenLayer), l2.clone()], vec![]).unwrap();

        let expired =
            StoredEntry::from_entry(Entry::new(1u8, now_ms() - 10_000, Duration::from_secs(1)));
        l2.set("expired", expired).await.unwrap();
        assert!(stack.cleanup().await.is_err());
        assert!(l2.get("expired").await.unwrap().is_none());

        let live = StoredEntry::from_entry(Entry::new(1u8, now_ms(), Duration::from_secs(60)));
        l2.set("live", live).await.unwrap();
        assert!(stack.flush().await.is_err());
        assert!(l2.is_empty().await);
    }

    #[tokio::test]
    async fn test_failing_layer_read_is_a_miss() {
        let l2 = memory();
        let stack = CacheStack::new(vec![Arc::new(BrokenLayer), l2.clone()], vec![]).unwrap();

        let entry = Entry::new("value".to_string(), now_ms(), Duration::from_secs(60));
        l2.set("key", StoredEntry::from_entry(entry.clone()))
            .await
            .unwrap();

        let found = stack.get::<String>("key").await.unwrap();
        assert_eq!(found, Some(entry));
    }

    #[tokio::test]
    async fn test_set_reports_failure_but_writes_other_layers() {
        let l1 = memory();
        let stack = CacheStack::new(vec![l1.clone(), Arc::new(BrokenLayer)], vec![]).unwrap();

        let result = stack.set("key", 7u32, Duration::from_secs(60)).await;
        assert!(result.is_err());
        assert!(l1.get("key").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_is_available_requires_every_layer() {
        let healthy = CacheStack::new(vec![memory(), memory()], vec![]).unwrap();
        assert!(healthy.is_available().await);

        let degraded = CacheStack::new(vec![memory(), Arc::new(BrokenLayer)], vec![]).unwrap();
        assert!(!degraded.is_available().await);
    }

    #[tokio::test]
    async fn test_generator_receives_context() {
        let stack = CacheStack::with_context("tenant-a".to_string(), vec![memory()], vec![])
            .unwrap();

        let value = stack
            .get_or_set::<String, CacheError, _, _>(
                "key",
                |previous, context| async move {
                    assert!(previous.is_none());
                    Ok(format!("{}:value", context))
                },
                CacheSettings::new(Duration::from_secs(60)),
            )
            .await
            .unwrap();

        assert_eq!(value, "tenant-a:value");
    }

    #[tokio::test]
    async fn test_miss_generator_failure_leaves_cache_empty() {
        let stack = CacheStack::new(vec![memory()], vec![]).unwrap();

        let err = stack
            .get_or_set::<u32, CacheError, _, _>(
                "key",
                |_, _| async { Err(CacheError::Serialization("origin down".to_string())) },
                CacheSettings::new(Duration::from_secs(60)),
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Serialization error: origin down");
        assert!(stack.get::<u32>("key").await.unwrap().is_none());
        assert_eq!(stack.coordinator().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_misses_generate_once() {
        let stack = CacheStack::new(vec![memory()], vec![]).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let requests: Vec<_> = (0..8)
            .map(|_| {
                let stack = stack.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    stack
                        .get_or_set::<u32, CacheError, _, _>(
                            "key",
                            move |_, _| async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(50)).await;
                                Ok(42)
                            },
                            CacheSettings::new(Duration::from_secs(60))
                                .with_stale_after(Duration::from_secs(60)),
                        )
                        .await
                })
            })
            .collect();

        for request in requests {
            assert_eq!(request.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auto_cleanup_purges_expired_entries() {
        let layer = memory();
        let stack = CacheStack::new(vec![layer.clone()], vec![]).unwrap();

        let expired = Entry::new(1u8, now_ms() - 10_000, Duration::from_secs(1));
        stack.set_entry("expired", expired).await.unwrap();

        let handle = stack.spawn_auto_cleanup(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(layer.get("expired").await.unwrap().is_none());
    }

    /// An extension whose every hook fails.
    struct FailingExtension;

    fn hook_failure() -> ExtensionResult {
        Err("hook exploded".into())
    }

    #[async_trait]
    impl CacheExtension for FailingExtension {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn before_get(&self, _key: &str) -> ExtensionResult {
            hook_failure()
        }

        async fn after_get(&self, _key: &str, _hit_layer: Option<usize>) -> ExtensionResult {
            hook_failure()
        }

        async fn before_set(&self, _key: &str, _meta: EntryMeta) -> ExtensionResult {
            hook_failure()
        }

        async fn after_set(&self, _key: &str, _meta: EntryMeta, _ok: bool) -> ExtensionResult {
            hook_failure()
        }

        async fn before_evict(&self, _key: &str) -> ExtensionResult {
            hook_failure()
        }

        async fn after_evict(&self, _key: &str, _succeeded: bool) -> ExtensionResult {
            hook_failure()
        }

        async fn before_cleanup(&self) -> ExtensionResult {
            hook_failure()
        }

        async fn after_cleanup(&self, _succeeded: bool) -> ExtensionResult {
            hook_failure()
        }

        async fn before_flush(&self) -> ExtensionResult {
            hook_failure()
        }

        async fn after_flush(&self, _succeeded: bool) -> ExtensionResult {
            hook_failure()
        }

        async fn after_refresh(
            &self,
            _key: &str,
            _mode: RefreshMode,
            _error: Option<&str>,
        ) -> ExtensionResult {
            hook_failure()
        }
    }

    #[tokio::test]
    async fn test_failing_extension_leaves_results_unchanged() {
        let layer = memory();
        let stack = CacheStack::new(vec![layer.clone()], vec![Arc::new(FailingExtension)]).unwrap();

        let written = stack
            .set("key", "value".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(written.value, "value");

        let read = stack.get::<String>("key").await.unwrap().unwrap();
        assert_eq!(read, written);
        assert!(layer.get("key").await.unwrap().is_some());

        let generated = stack
            .get_or_set::<u32, CacheError, _, _>(
                "generated",
                |_, _| async { Ok(7) },
                CacheSettings::new(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        assert_eq!(generated, 7);

        stack.evict("key").await.unwrap();
        assert!(stack.get::<String>("key").await.unwrap().is_none());

        stack.cleanup().await.unwrap();
        stack.flush().await.unwrap();
        assert!(stack.get::<u32>("generated").await.unwrap().is_none());
    }
}
