//! Cache layer implementations.

pub mod memory;
pub mod moka;
pub mod redis;

pub use memory::{MemoryLayer, MemoryLayerConfig};
pub use self::moka::{MokaLayer, MokaLayerConfig};
pub use self::redis::{RedisLayer, RedisLayerConfig};
