//! Application state - storage, limiter service and identity wiring.

use std::sync::Arc;

use cherut_core::ports::{Clock, Storage, SystemClock};
use cherut_core::{
    ActionKind, ConfigError, PersistedEntryStore, RateLimitPolicies, RateLimitService, RateLimiter,
};
use cherut_infra::{ClientIdentity, FileStorage, InMemoryStorage};

#[cfg(feature = "redis")]
use cherut_infra::{RedisConfig, RedisStorage};

use crate::authenticator::{Authenticator, SignInError};
use crate::config::{AppConfig, StorageBackend};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: RateLimitService,
    pub identity: Arc<ClientIdentity>,
    pub authenticator: Arc<Authenticator>,
    pub action: ActionKind,
}

impl AppState {
    /// Build the application state with the configured backend.
    pub async fn new(config: &AppConfig) -> Result<Self, SignInError> {
        let storage = build_storage(config.storage).await;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store = PersistedEntryStore::new(storage.clone(), clock.clone());
        let service = RateLimitService::new(RateLimitPolicies::builtin(), store);
        let identity = Arc::new(ClientIdentity::detect(storage, clock));

        let authenticator = Authenticator::new(config.demo_email.as_str(), &config.demo_password)?;

        Ok(Self {
            service,
            identity,
            authenticator: Arc::new(authenticator),
            action: config.action,
        })
    }

    /// Limiter for the configured action and this client.
    pub async fn limiter(&self) -> Result<RateLimiter, ConfigError> {
        let client_id = self.identity.client_id().await;
        self.service.limiter(self.action, client_id)
    }
}

async fn build_storage(backend: StorageBackend) -> Arc<dyn Storage> {
    match backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage, records are lost on exit");
            Arc::new(InMemoryStorage::new())
        }
        StorageBackend::File => file_storage().await,
        StorageBackend::Redis => redis_storage().await,
    }
}

async fn file_storage() -> Arc<dyn Storage> {
    match FileStorage::from_env().await {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            tracing::error!(
                "Failed to open storage file: {}. Using in-memory fallback.",
                e
            );
            Arc::new(InMemoryStorage::new())
        }
    }
}

#[cfg(feature = "redis")]
async fn redis_storage() -> Arc<dyn Storage> {
    let config = RedisConfig::from_env();
    let fallback = config.fallback_to_memory;

    match RedisStorage::new(config).await {
        Ok(storage) => Arc::new(storage),
        Err(e) if fallback => {
            tracing::error!("Failed to connect to Redis: {}. Using in-memory fallback.", e);
            Arc::new(InMemoryStorage::new())
        }
        Err(e) => {
            tracing::error!("Failed to connect to Redis: {}. Using file storage.", e);
            file_storage().await
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn redis_storage() -> Arc<dyn Storage> {
    tracing::warn!("Built without the redis feature. Using file storage.");
    file_storage().await
}
