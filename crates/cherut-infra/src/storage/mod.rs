//! Storage implementations - local file, Redis, and in-memory fallback.

mod file;
mod memory;

pub use file::{FileStorage, FileStorageConfig};
pub use memory::InMemoryStorage;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisStorage};
