//! Plugin registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{PluginError, PluginResult};
use crate::event::Event;
use crate::plugin::{IntoPlugin, Plugin, PluginKey};
use crate::runtime::{Fork, Runtime};

/// Map from plugin identity to its live [`Runtime`].
///
/// Owned by the [`App`](crate::App); reach it through
/// [`Context::registry`].
#[derive(Default)]
pub struct Registry {
    runtimes: Mutex<HashMap<PluginKey, Arc<Runtime>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("runtimes", &self.len())
            .finish()
    }
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PluginKey, Arc<Runtime>>> {
        self.runtimes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `plugin` at `caller`'s scope.
    ///
    /// A plugin that already has a runtime gets a new fork. Otherwise a
    /// runtime is created with its first fork and started. Returns `None`
    /// when the config is `false`.
    ///
    /// # Errors
    ///
    /// - [`PluginError::InvalidPlugin`] for a declaration without a body.
    /// - [`PluginError::ConfigValidation`] when the validator rejects the
    ///   config.
    /// - Any error from the first run of the body, in which case the new
    ///   fork is rolled back.
    pub fn register(
        &self,
        caller: &Context,
        plugin: impl IntoPlugin,
        config: Value,
    ) -> PluginResult<Option<Arc<Fork>>> {
        let plugin = plugin.into_plugin()?;

        if let Some(runtime) = self.get(&plugin).filter(|runtime| !runtime.is_disposed()) {
            let Some(config) = plugin.validate_config(config)? else {
                return Ok(None);
            };
            if runtime.forker_count() == 0 && caller.warn_duplicates() {
                warn!(plugin = %plugin.name(), "Duplicate plugin registration has no effect");
                caller.emit(Event::DuplicatePlugin(runtime.info()));
            }
            return runtime.fork(caller, config).map(Some);
        }

        let Some(config) = plugin.validate_config(config)? else {
            debug!(plugin = %plugin.name(), "Plugin disabled by config");
            return Ok(None);
        };

        let runtime = Runtime::new(caller, plugin.clone(), config.clone());
        let fork = runtime.fork(caller, config)?;
        self.lock().insert(plugin.key(), Arc::clone(&runtime));
        if let Err(e) = runtime.start() {
            fork.dispose();
            return Err(e);
        }
        Ok(Some(fork))
    }

    /// Live runtime of `plugin`.
    #[must_use]
    pub fn get(&self, plugin: &Plugin) -> Option<Arc<Runtime>> {
        self.lock().get(&plugin.key()).cloned()
    }

    /// Whether `plugin` has a live runtime.
    #[must_use]
    pub fn contains(&self, plugin: &Plugin) -> bool {
        self.lock().contains_key(&plugin.key())
    }

    /// Number of live runtimes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether there are no live runtimes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of every live runtime.
    #[must_use]
    pub fn runtimes(&self) -> Vec<Arc<Runtime>> {
        self.lock().values().cloned().collect()
    }

    /// Dispose the runtime of `plugin` with all of its forks.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotRegistered`] when `plugin` has no live
    /// runtime.
    pub fn dispose(&self, plugin: &Plugin) -> PluginResult<Arc<Runtime>> {
        let runtime = self
            .get(plugin)
            .ok_or_else(|| PluginError::NotRegistered(plugin.name().to_owned()))?;
        runtime.dispose();
        Ok(runtime)
    }

    pub(crate) fn remove(&self, runtime: &Runtime) {
        let mut runtimes = self.lock();
        let key = runtime.plugin().key();
        if runtimes
            .get(&key)
            .is_some_and(|live| std::ptr::eq(Arc::as_ptr(live), runtime))
        {
            runtimes.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::App;

    #[test]
    fn test_config_false_registers_nothing() {
        let app = App::new();
        let plugin = Plugin::function("off", |_, _| Ok(()));
        assert!(app.plugin(&plugin, Value::Bool(false)).unwrap().is_none());
        assert!(!app.registry().contains(&plugin));
    }

    #[test]
    fn test_dispose_unknown_plugin() {
        let app = App::new();
        let plugin = Plugin::function("ghost", |_, _| Ok(()));
        let err = app.dispose_plugin(&plugin).unwrap_err();
        assert!(matches!(err, PluginError::NotRegistered(name) if name == "ghost"));
    }

    #[test]
    fn test_body_error_rolls_back() {
        let app = App::new();
        let plugin = Plugin::function("broken", |_, _| {
            Err(PluginError::ExecutionFailed("nope".into()))
        });
        let err = app.plugin(&plugin, Value::Null).unwrap_err();
        assert!(matches!(err, PluginError::ExecutionFailed(_)));
        assert!(app.registry().is_empty());
        assert_eq!(app.disposable_count(), 0);
    }
}
