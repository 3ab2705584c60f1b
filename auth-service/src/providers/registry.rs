//! # Provider Registry
//!
//! Name → provider lookup, populated once at startup.
//!
//! ## Concurrency
//!
//! Registration happens during startup wiring, before the registry is
//! wrapped in an `Arc` and handed to request handlers. After that point it
//! is read-only, so lookups are lock-free map reads.

use std::collections::HashMap;

use super::{Provider, ProviderError};

/// Registry mapping provider names to provider values.
#[derive(Default)]
pub struct ProviderRegistry {
    /// Registered providers, keyed by name
    providers: HashMap<String, Provider>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under its own name.
    ///
    /// The provider's configuration is checked here so a misconfigured
    /// provider fails startup instead of failing requests.
    ///
    /// ## Errors
    ///
    /// - `Config` when the name is already registered or the provider's
    ///   own configuration check fails
    pub fn register(&mut self, provider: Provider) -> Result<(), ProviderError> {
        let name = provider.name().to_string();

        if self.providers.contains_key(&name) {
            return Err(ProviderError::Config(format!(
                "provider '{}' is already registered",
                name
            )));
        }

        provider.validate_config()?;

        tracing::info!(provider = %name, kind = provider.kind(), "Provider registered");
        self.providers.insert(name, provider);
        Ok(())
    }

    /// Looks a provider up by name.
    pub fn get(&self, name: &str) -> Option<&Provider> {
        self.providers.get(name)
    }

    /// Names of all registered providers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

// =============================================================================
// TESTS
// =============================================================================
