//! # Cherut Core
//!
//! The domain layer of the Cherut abuse-prevention subsystem.
//! This crate contains the lockout state machine, the self-repair rules for
//! persisted records and the presentation logic, with zero infrastructure
//! dependencies. Storage and time are reached through the traits in [`ports`].

pub mod domain;
pub mod error;
pub mod ports;
pub mod presenter;
pub mod services;

pub use domain::{ActionKind, RateLimitConfig, RateLimitEntry, RateLimitPolicies, RateLimitResult};
pub use error::ConfigError;
pub use presenter::{RateLimitPresenter, Severity};
pub use services::{PersistedEntryStore, PruneReport, RateLimitService, RateLimiter};
