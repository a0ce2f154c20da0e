// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named discovery strategies.
//!
//! The application constructs one [`DiscoveryRegistry`] and passes it where a
//! discovery strategy must be looked up by name. Several facades (different
//! configs, transports or domains) may coexist.

use crate::config::{ConfigValues, DiscoveryConfig};
use crate::facade::{RtpsDiscovery, DEFAULT_DISCOVERY_KEY};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct DiscoveryRegistry {
    strategies: RwLock<HashMap<String, Arc<RtpsDiscovery>>>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `discovery` under its key, returning the strategy it replaces.
    pub fn register(&self, discovery: Arc<RtpsDiscovery>) -> Option<Arc<RtpsDiscovery>> {
        let key = discovery.key().to_string();
        log::debug!("[disco] registered strategy '{}'", key);
        self.strategies.write().insert(key, discovery)
    }

    pub fn get(&self, key: &str) -> Option<Arc<RtpsDiscovery>> {
        self.strategies.read().get(key).cloned()
    }

    /// The default strategy, created on first use with `ConfigValues::from_env()`
    /// over UDP.
    pub fn get_or_create_default(&self) -> Arc<RtpsDiscovery> {
        if let Some(existing) = self.get(DEFAULT_DISCOVERY_KEY) {
            return existing;
        }
        let mut strategies = self.strategies.write();
        let entry = strategies
            .entry(DEFAULT_DISCOVERY_KEY.to_string())
            .or_insert_with(|| {
                Arc::new(RtpsDiscovery::new(
                    DEFAULT_DISCOVERY_KEY,
                    DiscoveryConfig::new(ConfigValues::from_env()),
                ))
            });
        Arc::clone(entry)
    }

    /// Unregister a strategy. Its participants stop when the last handle drops.
    pub fn remove(&self, key: &str) -> Option<Arc<RtpsDiscovery>> {
        self.strategies.write().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.strategies.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryNetwork;

    fn strategy(key: &str) -> Arc<RtpsDiscovery> {
        Arc::new(RtpsDiscovery::with_transport(
            key,
            DiscoveryConfig::default(),
            Arc::new(MemoryNetwork::new()),
        ))
    }

    #[test]
    fn test_register_and_replace() {
        let registry = DiscoveryRegistry::new();
        assert!(registry.register(strategy("a")).is_none());
        assert!(registry.register(strategy("b")).is_none());
        assert!(registry.register(strategy("a")).is_some());
        assert_eq!(registry.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.get("b").map(|d| d.key().to_string()), Some("b".to_string()));
        assert!(registry.remove("a").is_some());
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn test_registries_are_independent() {
        let one = DiscoveryRegistry::new();
        let two = DiscoveryRegistry::new();
        one.register(strategy(DEFAULT_DISCOVERY_KEY));
        assert!(one.get(DEFAULT_DISCOVERY_KEY).is_some());
        assert!(two.get(DEFAULT_DISCOVERY_KEY).is_none());
        let default = one.get_or_create_default();
        assert!(Arc::ptr_eq(&default, &one.get_or_create_default()));
    }
}
