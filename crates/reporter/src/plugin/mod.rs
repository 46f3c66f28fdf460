//! Plugin runtime
//!
//! Datasources, views and output drivers are all plugins: user-named
//! configuration entries that point at a registered factory by key. A
//! [`PluginManager`] owns the instances for one capability. It builds each
//! one on first use and keeps it for the rest of the render pass. Every
//! failure is recorded against the entry name, so a report can show all
//! broken sections instead of stopping at the first.

mod error;
mod registry;

pub use error::{PluginError, PluginErrorKind};
pub use registry::{Factory, Registry};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::metrics;
use crate::report::Report;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Datasource,
    View,
    Output,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Datasource => "datasource",
            Capability::View => "view",
            Capability::Output => "output",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named plugin entry as written in the report configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginEntry {
    /// Registry key of the plugin to build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,

    /// Arguments handed to the factory, must be a mapping when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl PluginEntry {
    pub fn new(plugin: &str) -> Self {
        Self {
            plugin: Some(plugin.to_string()),
            args: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }
}

/// Keyword arguments for a plugin factory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginArgs(Map<String, Value>);

impl PluginArgs {
    pub fn new(args: Map<String, Value>) -> Self {
        Self(args)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deserialize the arguments into a plugin's own argument struct.
    pub fn parse<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| anyhow!("Invalid arguments: {}", e))
    }
}

/// What a factory gets to see besides its arguments
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Name of the configuration entry being built
    pub name: String,
    pub report: Arc<Report>,
}

enum Slot<P: ?Sized> {
    Ready(Arc<P>),
    Failed(PluginError),
}

impl<P: ?Sized> Slot<P> {
    fn get(&self) -> Result<Arc<P>, PluginError> {
        match self {
            Slot::Ready(instance) => Ok(Arc::clone(instance)),
            Slot::Failed(err) => Err(err.clone()),
        }
    }
}

/// Lazily builds and caches plugin instances for one capability.
///
/// Resolution outcomes are memoized per entry name, failures included, so a
/// factory runs at most once per entry. The caches sit behind locks that are
/// never held across an `.await`.
pub struct PluginManager<P: ?Sized> {
    capability: Capability,
    report: Arc<Report>,
    registry: Arc<Registry<P>>,
    entries: IndexMap<String, PluginEntry>,
    slots: Mutex<HashMap<String, Slot<P>>>,
    errors: Mutex<HashMap<String, Vec<PluginError>>>,
}

impl<P: ?Sized> PluginManager<P> {
    pub fn new(
        registry: Arc<Registry<P>>,
        report: Arc<Report>,
        entries: IndexMap<String, PluginEntry>,
    ) -> Self {
        Self {
            capability: registry.capability(),
            report,
            registry,
            entries,
            slots: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    /// Configured entry names, in configuration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entry(&self, name: &str) -> Option<&PluginEntry> {
        self.entries.get(name)
    }

    /// Return the instance for `name`, building it on first access.
    pub fn resolve(&self, name: &str) -> Result<Arc<P>, PluginError> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(name) {
            return slot.get();
        }

        let slot = match self.construct(name) {
            Ok(instance) => {
                debug!(capability = %self.capability, name, "Constructed plugin instance");
                Slot::Ready(instance)
            }
            Err(err) => {
                self.record(err.clone());
                Slot::Failed(err)
            }
        };
        let result = slot.get();
        slots.insert(name.to_string(), slot);
        result
    }

    /// Run one operation against the instance for `name`.
    ///
    /// A failed operation is recorded as an invocation error for `name` and
    /// returned; it is never allowed to escape unattributed.
    pub async fn invoke<T, F, Fut>(&self, name: &str, operation: F) -> Result<T, PluginError>
    where
        F: FnOnce(Arc<P>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let instance = self.resolve(name)?;
        operation(instance).await.map_err(|cause| {
            let err = PluginError::new(name, self.capability, PluginErrorKind::Invocation, cause);
            self.record(err.clone());
            err
        })
    }

    /// Every error recorded for `name`, oldest first.
    pub fn errors(&self, name: &str) -> Vec<PluginError> {
        self.errors.lock().get(name).cloned().unwrap_or_default()
    }

    /// Every recorded error, keyed by entry name.
    pub fn all_errors(&self) -> BTreeMap<String, Vec<PluginError>> {
        self.errors
            .lock()
            .iter()
            .map(|(name, errors)| (name.clone(), errors.clone()))
            .collect()
    }

    fn construct(&self, name: &str) -> Result<Arc<P>, PluginError> {
        let configuration_error = |cause: anyhow::Error| {
            PluginError::new(name, self.capability, PluginErrorKind::Configuration, cause)
        };

        let entry = self.entries.get(name).ok_or_else(|| {
            configuration_error(anyhow!(
                "No {} configured with name '{}'",
                self.capability,
                name
            ))
        })?;

        let key = entry
            .plugin
            .as_deref()
            .ok_or_else(|| configuration_error(anyhow!("Missing required 'plugin' key")))?;

        let factory = self
            .registry
            .lookup(key)
            .map_err(|e| configuration_error(e.into()))?;

        let args = match &entry.args {
            None | Some(Value::Null) => PluginArgs::default(),
            Some(Value::Object(map)) => PluginArgs::new(map.clone()),
            Some(other) => {
                return Err(configuration_error(anyhow!(
                    "'args' must be a mapping, got {}",
                    value_kind(other)
                )))
            }
        };

        let context = PluginContext {
            name: name.to_string(),
            report: Arc::clone(&self.report),
        };

        factory(&context, args).map_err(|cause| {
            PluginError::new(name, self.capability, PluginErrorKind::Construction, cause)
        })
    }

    fn record(&self, err: PluginError) {
        warn!(
            capability = %err.capability(),
            name = err.name(),
            kind = %err.kind(),
            error = %err,
            "Plugin error"
        );
        metrics::PLUGIN_ERRORS_TOTAL
            .with_label_values(&[err.capability().as_str(), err.kind().as_str()])
            .inc();
        self.errors
            .lock()
            .entry(err.name().to_string())
            .or_default()
            .push(err);
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NAME: &str = "my_name";
    const PLUGIN: &str = "my_plugin";

    trait Echo: Send + Sync {
        fn echo(&self, input: &str) -> anyhow::Result<String>;
    }

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct EchoArgs {
        #[serde(default)]
        prefix: String,
    }

    struct Prefixed {
        prefix: String,
    }

    impl Echo for Prefixed {
        fn echo(&self, input: &str) -> anyhow::Result<String> {
            if input.is_empty() {
                anyhow::bail!("I'm a bad plugin!");
            }
            Ok(format!("{}{}", self.prefix, input))
        }
    }

    fn prefixed(_: &PluginContext, args: PluginArgs) -> anyhow::Result<Arc<dyn Echo>> {
        let args: EchoArgs = args.parse()?;
        Ok(Arc::new(Prefixed {
            prefix: args.prefix,
        }))
    }

    fn broken(_: &PluginContext, _: PluginArgs) -> anyhow::Result<Arc<dyn Echo>> {
        Err(anyhow!("Missing required parameter: 'host'"))
    }

    fn report() -> Arc<Report> {
        Arc::new(
            Report::new(
                "Test",
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap(),
            )
            .unwrap(),
        )
    }

    fn manager(entries: Vec<(&str, PluginEntry)>) -> PluginManager<dyn Echo> {
        let registry = Registry::<dyn Echo>::new(Capability::Datasource)
            .with(PLUGIN, prefixed)
            .with("broken", broken);
        PluginManager::new(
            Arc::new(registry),
            report(),
            entries
                .into_iter()
                .map(|(name, entry)| (name.to_string(), entry))
                .collect(),
        )
    }

    #[test]
    fn test_missing_plugin() {
        let mgr = manager(vec![(NAME, PluginEntry::default())]);
        assert!(mgr.resolve(NAME).is_err());

        let errors = mgr.errors(NAME);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), PluginErrorKind::Configuration);
        assert_eq!(errors[0].name(), NAME);
    }

    #[test]
    fn test_failed_resolution_is_recorded_once() {
        let mgr = manager(vec![(NAME, PluginEntry::default())]);
        assert!(mgr.resolve(NAME).is_err());
        assert!(mgr.resolve(NAME).is_err());
        assert_eq!(mgr.errors(NAME).len(), 1);
    }

    #[test]
    fn test_unconfigured_name() {
        let mgr = manager(vec![]);
        assert!(mgr.resolve("nope").is_err());
        assert_eq!(mgr.errors("nope")[0].kind(), PluginErrorKind::Configuration);
    }

    #[test]
    fn test_invalid_plugin() {
        let mgr = manager(vec![(NAME, PluginEntry::new("missing"))]);
        let err = mgr.resolve(NAME).err().unwrap();
        assert_eq!(err.kind(), PluginErrorKind::Configuration);
        assert!(matches!(
            err.find_cause::<crate::Error>(),
            Some(crate::Error::UnknownCapability { .. })
        ));
    }

    #[test]
    fn test_invalid_args() {
        let mgr = manager(vec![(NAME, PluginEntry::new(PLUGIN).with_args(json!("foo")))]);
        assert!(mgr.resolve(NAME).is_err());
        let errors = mgr.errors(NAME);
        assert_eq!(errors[0].kind(), PluginErrorKind::Configuration);
        assert!(errors[0].to_string().contains("must be a mapping"));
    }

    #[test]
    fn test_unknown_argument_fails_construction() {
        let mgr = manager(vec![(
            NAME,
            PluginEntry::new(PLUGIN).with_args(json!({"nonsense": 1})),
        )]);
        assert!(mgr.resolve(NAME).is_err());
        assert_eq!(mgr.errors(NAME)[0].kind(), PluginErrorKind::Construction);
    }

    #[test]
    fn test_error_on_construct() {
        let mgr = manager(vec![(NAME, PluginEntry::new("broken")), ("ok", PluginEntry::new(PLUGIN))]);
        assert!(mgr.resolve(NAME).is_err());
        assert_eq!(mgr.errors(NAME)[0].kind(), PluginErrorKind::Construction);
        // One broken entry does not affect the others
        assert!(mgr.resolve("ok").is_ok());
        assert!(mgr.errors("ok").is_empty());
    }

    #[test]
    fn test_resolve_is_memoized() {
        let mgr = manager(vec![(NAME, PluginEntry::new(PLUGIN))]);
        let first = mgr.resolve(NAME).unwrap();
        let second = mgr.resolve(NAME).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_factory_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = Registry::<dyn Echo>::new(Capability::View).with(
            PLUGIN,
            move |ctx: &PluginContext, args: PluginArgs| {
                counter.fetch_add(1, Ordering::SeqCst);
                prefixed(ctx, args)
            },
        );
        let mgr = PluginManager::new(
            Arc::new(registry),
            report(),
            IndexMap::from([(NAME.to_string(), PluginEntry::new(PLUGIN))]),
        );

        for _ in 0..3 {
            mgr.resolve(NAME).unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_call_instance() {
        let mgr = manager(vec![(
            NAME,
            PluginEntry::new(PLUGIN).with_args(json!({"prefix": "> "})),
        )]);
        let out = mgr
            .invoke(NAME, |echo| async move { echo.echo("hi") })
            .await
            .unwrap();
        assert_eq!(out, "> hi");
    }

    #[tokio::test]
    async fn test_error_on_invoke() {
        let mgr = manager(vec![(NAME, PluginEntry::new(PLUGIN))]);
        let result = mgr.invoke(NAME, |echo| async move { echo.echo("") }).await;
        assert!(result.is_err());

        let errors = mgr.errors(NAME);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), PluginErrorKind::Invocation);
        assert!(errors[0].to_string().contains("I'm a bad plugin!"));

        // The instance itself is still usable
        let out = mgr.invoke(NAME, |echo| async move { echo.echo("again") }).await;
        assert_eq!(out.unwrap(), "again");
    }

    #[tokio::test]
    async fn test_errors_accumulate_in_order() {
        let mgr = manager(vec![(NAME, PluginEntry::new(PLUGIN))]);
        let _ = mgr.invoke(NAME, |echo| async move { echo.echo("") }).await;
        let _ = mgr
            .invoke(NAME, |_echo| async move { Err::<String, _>(anyhow!("second")) })
            .await;

        let errors = mgr.errors(NAME);
        assert_eq!(errors.len(), 2);
        assert!(errors[1].to_string().contains("second"));
        assert_eq!(mgr.all_errors().len(), 1);
    }

    #[test]
    fn test_multiple_instances() {
        let mgr = manager(vec![
            ("first", PluginEntry::new(PLUGIN).with_args(json!({"prefix": "1:"}))),
            ("second", PluginEntry::new(PLUGIN).with_args(json!({"prefix": "2:"}))),
        ]);

        let first = mgr.resolve("first").unwrap();
        let second = mgr.resolve("second").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.echo("arg").unwrap(), "1:arg");
        assert_eq!(second.echo("arg").unwrap(), "2:arg");
    }

    #[test]
    fn test_names_keep_configuration_order() {
        let mgr = manager(vec![
            ("zeta", PluginEntry::new(PLUGIN)),
            ("alpha", PluginEntry::new(PLUGIN)),
        ]);
        assert_eq!(mgr.names().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
    }
}
