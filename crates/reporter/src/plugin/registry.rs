use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::{Capability, PluginArgs, PluginContext};
use crate::{Error, Result};

/// Builds one plugin instance from its entry's arguments
pub type Factory<P> =
    Box<dyn Fn(&PluginContext, PluginArgs) -> anyhow::Result<Arc<P>> + Send + Sync>;

/// Maps plugin keys to factories for a single capability.
///
/// Registries are populated once at process start; the plugin runtime only
/// reads from them.
pub struct Registry<P: ?Sized> {
    capability: Capability,
    factories: BTreeMap<String, Factory<P>>,
}

impl<P: ?Sized> Registry<P> {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            factories: BTreeMap::new(),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Register a factory under `key`, replacing any previous one.
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&PluginContext, PluginArgs) -> anyhow::Result<Arc<P>> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Box::new(factory));
        self
    }

    pub fn with<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PluginContext, PluginArgs) -> anyhow::Result<Arc<P>> + Send + Sync + 'static,
    {
        self.register(key, factory);
        self
    }

    pub fn lookup(&self, key: &str) -> Result<&Factory<P>> {
        self.factories
            .get(key)
            .ok_or_else(|| Error::UnknownCapability {
                capability: self.capability,
                key: key.to_string(),
                available: self.keys().into_iter().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn keys(&self) -> BTreeSet<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }
}
