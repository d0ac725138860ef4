//! Provider Client Registry
//!
//! Explicitly constructed client cache owned by the caller. Clients are
//! keyed by a value-equality tuple of their configuration, so two equal
//! configurations share one client and there is no process-wide state.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::{ProviderConfig, SharedProvider, create_provider};
use crate::config::LlmConfig;
use crate::types::Result;

/// Value-equality identity of a provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderKey {
    pub provider: String,
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub timeout_secs: u64,
    pub temperature_bits: u32,
    pub max_tokens: usize,
    pub metered: Option<bool>,
}

impl From<&ProviderConfig> for ProviderKey {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            provider: config.provider.clone(),
            model: config.model.clone(),
            api_base: config.api_base.clone(),
            timeout_secs: config.timeout_secs,
            temperature_bits: config.temperature.to_bits(),
            max_tokens: config.max_tokens,
            metered: config.metered,
        }
    }
}

/// Injectable provider cache
#[derive(Default)]
pub struct ProviderRegistry {
    clients: DashMap<ProviderKey, SharedProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached client for `config`, creating it on first use
    pub fn get_or_create(&self, config: &ProviderConfig) -> Result<SharedProvider> {
        let key = ProviderKey::from(config);
        if let Some(existing) = self.clients.get(&key) {
            return Ok(Arc::clone(existing.value()));
        }

        let provider = create_provider(config)?;
        let entry = self.clients.entry(key).or_insert(provider);
        debug!(provider = %config.provider, "Registered provider client");
        Ok(Arc::clone(entry.value()))
    }

    /// Register a pre-built client under `config`'s key
    pub fn insert(&self, config: &ProviderConfig, provider: SharedProvider) {
        self.clients.insert(ProviderKey::from(config), provider);
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// The primary/secondary backend pair used by the section compiler
#[derive(Clone)]
pub struct Backends {
    pub primary: SharedProvider,
    pub secondary: SharedProvider,
}

impl Backends {
    pub fn new(primary: SharedProvider, secondary: SharedProvider) -> Self {
        Self { primary, secondary }
    }

    /// Resolve both backends through the registry
    pub fn from_config(registry: &ProviderRegistry, config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            primary: registry.get_or_create(&config.primary)?,
            secondary: registry.get_or_create(&config.secondary)?,
        })
    }

    /// Whether the secondary is a different client than the primary
    pub fn has_distinct_secondary(&self) -> bool {
        !Arc::ptr_eq(&self.primary, &self.secondary)
    }
}
