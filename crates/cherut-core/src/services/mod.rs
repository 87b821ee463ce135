//! Application services - the lockout state machine over persisted records.

mod limiter;
mod store;

pub use limiter::{RateLimitService, RateLimiter};
pub use store::{PersistedEntryStore, PruneReport};
