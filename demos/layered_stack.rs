//! Demonstrates a memory layer in front of an optional Redis layer, with
//! metrics collected through an extension.
//!
//! Set `REDIS_URL` to add the Redis layer, and `RUST_LOG=cache_stack=debug` to
//! watch back-population and refresh decisions.

use async_trait::async_trait;
use cache_stack::{
    CacheError, CacheLayer, CacheMetric, CacheSettings, CacheStack, MetricsExtension, MetricsSink,
    MokaLayer, MokaLayerConfig, RedisLayer, RedisLayerConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct User {
    id: String,
    name: String,
}

/// Fake database handed to every generator as the stack context.
struct Database;

impl Database {
    async fn load_user(&self, id: &str) -> Result<User, CacheError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(User {
            id: id.to_string(),
            name: format!("User {}", id),
        })
    }
}

#[derive(Default)]
struct PrintingSink {
    buffer: Mutex<Vec<CacheMetric>>,
}

#[async_trait]
impl MetricsSink for PrintingSink {
    fn emit(&self, metric: CacheMetric) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.push(metric);
        }
    }

    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let metrics = std::mem::take(&mut *self.buffer.lock().map_err(|e| e.to_string())?);
        for metric in metrics {
            println!("metric: {:?}", metric);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let redis: Option<Arc<dyn CacheLayer>> = match std::env::var("REDIS_URL") {
        Ok(url) => Some(Arc::new(
            RedisLayer::new(RedisLayerConfig {
                url,
                prefix: "demo".to_string(),
            })
            .await?,
        )),
        Err(_) => None,
    };

    let sink = Arc::new(PrintingSink::default());
    let stack = CacheStack::builder()
        .layer(Arc::new(MokaLayer::new(MokaLayerConfig::default())))
        .optional_layer(redis)
        .extension(Arc::new(MetricsExtension::new(sink.clone())))
        .context(Database)
        .build()?;

    let _cleanup = stack.spawn_auto_cleanup(Duration::from_secs(60));

    let settings =
        CacheSettings::new(Duration::from_secs(300)).with_stale_after(Duration::from_secs(60));

    for _ in 0..2 {
        let user = stack
            .get_or_set(
                "user:chronark",
                |_previous, db| async move { db.load_user("chronark").await },
                settings,
            )
            .await?;
        println!("user: {:?}", user);
    }

    println!("all layers available: {}", stack.is_available().await);
    sink.flush().await.map_err(|e| e.to_string())?;
    Ok(())
}
