//! Name → limiter registry.
//!
//! Built once at startup and handed to every consumer; there is no global.
//! Each name gets its own bucket, breaker and queue on first lookup, and the
//! same instance for the rest of the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::config::Config;
use crate::governor::limiter::{LimiterStatus, RateLimiter};
use crate::governor::provider::{LimitConfig, LimitOverrides, Provider};

/// Limiter names used by the ingestion backend.
pub const RAG_GROQ: &str = "rag_groq";
pub const RAG_GEMINI: &str = "rag_gemini";
pub const GROQ_PROCESSING: &str = "groq_processing";
pub const GEMINI_PROCESSING: &str = "gemini_processing";

#[derive(Debug, Default)]
pub struct LimiterRegistry {
    /// Applied to every limiter built for the provider.
    provider_overrides: HashMap<Provider, LimitOverrides>,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl LimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose limiters pick up the config file's per-provider overrides.
    pub fn from_config(config: &Config) -> Self {
        Self {
            provider_overrides: config.providers.clone(),
            limiters: Mutex::default(),
        }
    }

    /// Limiter for `name`, built from the provider defaults on first use.
    pub fn get(&self, name: &str, provider: Provider) -> Arc<RateLimiter> {
        self.get_with(name, provider, None)
    }

    /// Like [`get`](Self::get); `overrides` only take effect if this call
    /// creates the limiter.
    pub fn get_with(
        &self,
        name: &str,
        provider: Provider,
        overrides: Option<&LimitOverrides>,
    ) -> Arc<RateLimiter> {
        let mut limiters = self.lock();

        if let Some(existing) = limiters.get(name) {
            if existing.provider() != provider {
                warn!(
                    limiter = name,
                    existing = %existing.provider(),
                    requested = %provider,
                    "limiter already registered for another provider, reusing it"
                );
            }
            return Arc::clone(existing);
        }

        let config = self.config_for(provider, overrides);
        debug!(
            limiter = name,
            provider = %provider,
            max_tokens = config.max_tokens,
            rpm = config.requests_per_minute(),
            "creating rate limiter"
        );
        let limiter = Arc::new(RateLimiter::new(name, provider, config));
        limiters.insert(name.to_string(), Arc::clone(&limiter));
        limiter
    }

    /// Effective config a new limiter for `provider` would get.
    pub fn config_for(
        &self,
        provider: Provider,
        overrides: Option<&LimitOverrides>,
    ) -> LimitConfig {
        let base = LimitConfig::default_for(provider);
        let layered = match (self.provider_overrides.get(&provider), overrides) {
            (Some(file), Some(site)) => file.merged(site),
            (Some(file), None) => file.clone(),
            (None, Some(site)) => site.clone(),
            (None, None) => return base,
        };
        layered.apply(&base)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn statuses(&self) -> Vec<LimiterStatus> {
        let limiters: Vec<Arc<RateLimiter>> = self.lock().values().cloned().collect();
        let mut statuses: Vec<LimiterStatus> = limiters.iter().map(|l| l.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<RateLimiter>>> {
        // The map is only ever inserted into; a panic elsewhere cannot leave it torn.
        self.limiters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
