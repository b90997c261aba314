use crate::{ModelProvider, RateLimiter};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Default admission policy applied to every provider at registration time.
/// The protocol leaves the exact limit to the deployment; these are
/// conservative defaults sized for a pair of interactive discussion
/// participants rather than a high-throughput batch workload.
const DEFAULT_MAX_CONCURRENT: u32 = 4;
const DEFAULT_RETRY_AFTER_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("provider '{0}' is not registered")]
    NotFound(String),
    #[error("provider '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Process-global registry of model providers, keyed by provider id. Each
/// registered provider gets its own [`RateLimiter`] singleton.
///
/// Reads (`get`) never block a writer and vice versa beyond the shard-local
/// locking `DashMap` already does internally; registration only happens at
/// startup, so contention is not a concern in steady state.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: DashMap<String, Arc<dyn ModelProvider>>,
    limiters: DashMap<String, Arc<RateLimiter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
            limiters: DashMap::new(),
        }
    }

    pub fn register(&self, provider: Arc<dyn ModelProvider>) -> Result<(), RegistryError> {
        let id = provider.provider_id().to_string();
        if self.providers.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        self.limiters.insert(
            id.clone(),
            Arc::new(RateLimiter::new(DEFAULT_MAX_CONCURRENT, DEFAULT_RETRY_AFTER_MS)),
        );
        info!(provider_id = %id, "provider registered");
        self.providers.insert(id, provider);
        Ok(())
    }

    pub fn unregister(&self, provider_id: &str) -> Result<(), RegistryError> {
        self.limiters.remove(provider_id);
        let result = self
            .providers
            .remove(provider_id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound(provider_id.to_string()));
        if result.is_ok() {
            info!(provider_id, "provider unregistered");
        }
        result
    }

    pub fn get(&self, provider_id: &str) -> Result<Arc<dyn ModelProvider>, RegistryError> {
        self.providers
            .get(provider_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::NotFound(provider_id.to_string()))
    }

    pub fn rate_limiter(&self, provider_id: &str) -> Result<Arc<RateLimiter>, RegistryError> {
        self.limiters
            .get(provider_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::NotFound(provider_id.to_string()))
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.providers.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[test]
    fn register_then_get_roundtrips() {
        let registry = ProviderRegistry::new();
        registry
            .register(Arc::new(MockProvider::new("mock", "ok")))
            .unwrap();
        assert!(registry.get("mock").is_ok());
    }

    #[test]
    fn registration_creates_a_rate_limiter() {
        let registry = ProviderRegistry::new();
        registry
            .register(Arc::new(MockProvider::new("mock", "ok")))
            .unwrap();
        assert!(registry.rate_limiter("mock").is_ok());
        assert!(registry.rate_limiter("missing").is_err());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = ProviderRegistry::new();
        registry
            .register(Arc::new(MockProvider::new("mock", "ok")))
            .unwrap();
        let err = registry
            .register(Arc::new(MockProvider::new("mock", "ok")))
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }

    #[test]
    fn unregister_missing_provider_errors() {
        let registry = ProviderRegistry::new();
        assert!(registry.unregister("missing").is_err());
    }
}
