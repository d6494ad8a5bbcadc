//! Builder API for assembling a cache stack.

use std::sync::Arc;

use crate::error::CacheError;
use crate::extensions::CacheExtension;
use crate::layer::CacheLayer;
use crate::stack::CacheStack;

/// Builder for creating a `CacheStack`.
///
/// Layers are kept in the order they are added; the first one is read first.
///
/// # Example
///
/// ```ignore
/// use cache_stack::{CacheStack, MemoryLayer, MemoryLayerConfig, RedisLayer, RedisLayerConfig};
/// use std::sync::Arc;
///
/// let stack = CacheStack::builder()
///     .layer(Arc::new(MemoryLayer::new(MemoryLayerConfig::default())))
///     .optional_layer(if use_redis {
///         Some(Arc::new(RedisLayer::new(RedisLayerConfig::default()).await?))
///     } else {
///         None
///     })
///     .context(db_pool)
///     .build()?;
/// ```
pub struct CacheStackBuilder<C = ()> {
    context: C,
    layers: Vec<Arc<dyn CacheLayer>>,
    extensions: Vec<Arc<dyn CacheExtension>>,
}

impl CacheStackBuilder<()> {
    /// Create a new CacheStackBuilder.
    pub fn new() -> Self {
        CacheStackBuilder {
            context: (),
            layers: Vec::new(),
            extensions: Vec::new(),
        }
    }
}

impl Default for CacheStackBuilder<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CacheStackBuilder<C>
where
    C: Send + Sync + 'static,
{
    /// Set the value handed to every generator.
    pub fn context<N>(self, context: N) -> CacheStackBuilder<N> {
        CacheStackBuilder {
            context,
            layers: self.layers,
            extensions: self.extensions,
        }
    }

    /// Append a layer with the next-lowest priority.
    pub fn layer(mut self, layer: Arc<dyn CacheLayer>) -> Self {
        self.layers.push(layer);
        self
    }

    /// Append a layer only when it is `Some`, for layers enabled by configuration.
    pub fn optional_layer(mut self, layer: Option<Arc<dyn CacheLayer>>) -> Self {
        self.layers.extend(layer);
        self
    }

    pub fn extension(mut self, extension: Arc<dyn CacheExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Build the stack. Fails if no layer was added.
    pub fn build(self) -> Result<CacheStack<C>, CacheError> {
        CacheStack::with_context(self.context, self.layers, self.extensions)
    }
}
