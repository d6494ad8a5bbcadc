//! Observers invoked around cache stack operations.
//!
//! Extensions are best-effort: a failing hook is logged and skipped, and never
//! changes the outcome of the operation it observes.

pub mod metrics;

use async_trait::async_trait;
use std::sync::Arc;

use crate::entry::EntryMeta;

/// Result returned by every extension hook.
pub type ExtensionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// How a regeneration was run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// The caller waited for the generator (miss or hard-expired entry).
    Inline,
    /// The generator ran detached while the caller got the stale value.
    Background,
}

/// Hooks called by a `CacheStack` before and after each public operation.
///
/// Every hook has a no-op default, so implementations only override what they
/// observe.
#[async_trait]
pub trait CacheExtension: Send + Sync {
    /// A name for logging.
    fn name(&self) -> &'static str;

    async fn before_get(&self, _key: &str) -> ExtensionResult {
        Ok(())
    }

    /// `hit_layer` is the index of the layer that had the key.
    async fn after_get(&self, _key: &str, _hit_layer: Option<usize>) -> ExtensionResult {
        Ok(())
    }

    async fn before_set(&self, _key: &str, _meta: EntryMeta) -> ExtensionResult {
        Ok(())
    }

    async fn after_set(&self, _key: &str, _meta: EntryMeta, _succeeded: bool) -> ExtensionResult {
        Ok(())
    }

    async fn before_evict(&self, _key: &str) -> ExtensionResult {
        Ok(())
    }

    async fn after_evict(&self, _key: &str, _succeeded: bool) -> ExtensionResult {
        Ok(())
    }

    async fn before_cleanup(&self) -> ExtensionResult {
        Ok(())
    }

    async fn after_cleanup(&self, _succeeded: bool) -> ExtensionResult {
        Ok(())
    }

    async fn before_flush(&self) -> ExtensionResult {
        Ok(())
    }

    async fn after_flush(&self, _succeeded: bool) -> ExtensionResult {
        Ok(())
    }

    /// Called once a regeneration finished. `error` carries the generator or
    /// write failure, which is the only place background failures surface.
    async fn after_refresh(
        &self,
        _key: &str,
        _mode: RefreshMode,
        _error: Option<&str>,
    ) -> ExtensionResult {
        Ok(())
    }
}

/// Ordered set of extensions, invoked one after another.
#[derive(Clone, Default)]
pub(crate) struct Extensions {
    extensions: Vec<Arc<dyn CacheExtension>>,
}

macro_rules! dispatch {
    ($self:ident, $hook:literal, |$ext:ident| $call:expr) => {
        for $ext in &$self.extensions {
            if let Err(e) = $call.await {
                tracing::warn!(
                    "Cache extension failed: extension={}, hook={}, error={}",
                    $ext.name(),
                    $hook,
                    e
                );
            }
        }
    };
}

impl Extensions {
    pub(crate) fn new(extensions: Vec<Arc<dyn CacheExtension>>) -> Self {
        Extensions { extensions }
    }

    pub(crate) fn len(&self) -> usize {
        self.extensions.len()
    }

    pub(crate) async fn before_get(&self, key: &str) {
        dispatch!(self, "before_get", |ext| ext.before_get(key));
    }

    pub(crate) async fn after_get(&self, key: &str, hit_layer: Option<usize>) {
        dispatch!(self, "after_get", |ext| ext.after_get(key, hit_layer));
    }

    pub(crate) async fn before_set(&self, key: &str, meta: EntryMeta) {
        dispatch!(self, "before_set", |ext| ext.before_set(key, meta));
    }

    pub(crate) async fn after_set(&self, key: &str, meta: EntryMeta, succeeded: bool) {
        dispatch!(self, "after_set", |ext| ext.after_set(key, meta, succeeded));
    }

    pub(crate) async fn before_evict(&self, key: &str) {
        dispatch!(self, "before_evict", |ext| ext.before_evict(key));
    }

    pub(crate) async fn after_evict(&self, key: &str, succeeded: bool) {
        dispatch!(self, "after_evict", |ext| ext.after_evict(key, succeeded));
    }

    pub(crate) async fn before_cleanup(&self) {
        dispatch!(self, "before_cleanup", |ext| ext.before_cleanup());
    }

    pub(crate) async fn after_cleanup(&self, succeeded: bool) {
        dispatch!(self, "after_cleanup", |ext| ext.after_cleanup(succeeded));
    }

    pub(crate) async fn before_flush(&self) {
        dispatch!(self, "before_flush", |ext| ext.before_flush());
    }

    pub(crate) async fn after_flush(&self, succeeded: bool) {
        dispatch!(self, "after_flush", |ext| ext.after_flush(succeeded));
    }

    pub(crate) async fn after_refresh(&self, key: &str, mode: RefreshMode, error: Option<&str>) {
        dispatch!(self, "after_refresh", |ext| ext.after_refresh(key, mode, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingExtension;

    #[async_trait]
    impl CacheExtension for FailingExtension {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn before_get(&self, _key: &str) -> ExtensionResult {
            Err("hook exploded".into())
        }
    }

    #[derive(Default)]
    struct CountingExtension {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CacheExtension for CountingExtension {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn before_get(&self, _key: &str) -> ExtensionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_stop_later_extensions() {
        let counting = Arc::new(CountingExtension::default());
        let extensions = Extensions::new(vec![Arc::new(FailingExtension), counting.clone()]);

        extensions.before_get("key").await;
        extensions.after_get("key", None).await;

        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert_eq!(extensions.len(), 2);
    }
}
