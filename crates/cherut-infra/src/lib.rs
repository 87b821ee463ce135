//! # Cherut Infrastructure
//!
//! Concrete implementations of the ports defined in `cherut-core`, the
//! client fingerprint, and the async binding that guards protected
//! operations.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external services, in-memory and file storage only
//! - `redis` - Redis-backed record storage

pub mod guard;
pub mod identity;
pub mod storage;

// Re-exports
pub use guard::{GuardConfig, GuardError, GuardSnapshot, RateLimitGuard};
pub use identity::{ClientIdentity, EnvironmentSignals};
pub use storage::{FileStorage, FileStorageConfig, InMemoryStorage};

#[cfg(feature = "redis")]
pub use storage::{RedisConfig, RedisStorage};
