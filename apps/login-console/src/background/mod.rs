//! Background maintenance of persisted rate limit records.

#[cfg(feature = "scheduler")]
pub mod scheduler;

use cherut_core::{PruneReport, RateLimitService};

#[cfg(feature = "scheduler")]
pub use scheduler::{PruneScheduler, SchedulerConfig};

/// Remove stale and long-expired records for every configured action.
pub async fn prune_once(service: &RateLimitService) -> PruneReport {
    service.prune_expired().await
}
