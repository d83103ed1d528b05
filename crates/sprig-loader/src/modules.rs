//! Module resolution.
//!
//! Entries name a module; a [`ModuleSource`] turns that name into the
//! [`Plugin`] handle to register. Handles must be stable: resolving the same
//! name twice has to yield the same plugin, or every reload would look like a
//! plugin change.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sprig_runtime::Plugin;

use crate::error::{LoaderError, LoaderResult};
use crate::group::group_plugin;

/// Name of the built-in group module.
pub const GROUP_MODULE: &str = "group";

/// Resolves module names to plugins.
#[async_trait]
pub trait ModuleSource: Send + Sync + 'static {
    /// Resolve `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::ModuleNotFound`] when nothing is registered
    /// under `name`.
    async fn resolve(&self, name: &str) -> LoaderResult<Plugin>;

    /// Every name this source knows about, for diagnostics.
    fn names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A fixed table of modules.
#[derive(Debug, Clone, Default)]
pub struct StaticModules {
    modules: BTreeMap<String, Plugin>,
}

impl StaticModules {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding the built-in modules.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new().with(GROUP_MODULE, group_plugin())
    }

    /// Add `plugin` under `name`.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, plugin: Plugin) -> Self {
        self.insert(name, plugin);
        self
    }

    /// Add or replace `plugin` under `name`.
    pub fn insert(&mut self, name: impl Into<String>, plugin: Plugin) -> Option<Plugin> {
        self.modules.insert(name.into(), plugin)
    }

    /// Look up `name` without going through the async trait.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Plugin> {
        self.modules.get(name)
    }
}

#[async_trait]
impl ModuleSource for StaticModules {
    async fn resolve(&self, name: &str) -> LoaderResult<Plugin> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| LoaderError::ModuleNotFound(name.to_owned()))
    }

    fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }
}
