//! The `loader` service.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use sprig_config::LoaderSection;
use sprig_runtime::{BindOptions, Capability, Context, Plugin, PluginResult, Service, bind};
use tokio::sync::watch;
use tracing::info;

use crate::entry::{Entry, EntryTable};
use crate::group::EntryGroup;
use crate::modules::ModuleSource;

/// Applies declarative entry lists.
///
/// Owns the module source, the entry table shared by every group, and the
/// root group. Bound as the `loader` capability; the initial entries are
/// applied when the service starts and everything is stopped with it.
pub struct Loader {
    modules: Arc<dyn ModuleSource>,
    table: EntryTable,
    root: Arc<EntryGroup>,
    initial: Mutex<Option<LoaderSection>>,
    started: watch::Sender<Option<usize>>,
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("modules", &self.modules.names())
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Loader {
    /// Capability name the loader is published under.
    pub const CAPABILITY: &'static str = "loader";

    /// A loader whose root group lives in `ctx`.
    pub fn new(ctx: &Context, modules: Arc<dyn ModuleSource>, initial: LoaderSection) -> Self {
        let table: EntryTable = Arc::new(Mutex::new(HashMap::new()));
        let root = Arc::new(EntryGroup::new(ctx, Arc::clone(&table), Arc::clone(&modules)));
        Self {
            modules,
            table,
            root,
            initial: Mutex::new(Some(initial)),
            started: watch::Sender::new(None),
        }
    }

    /// Build a loader in `ctx` and bind it as the `loader` capability.
    ///
    /// The capability is published right away; `initial` is applied once
    /// the app is ready.
    ///
    /// # Errors
    ///
    /// Propagates binding errors.
    pub fn install(
        ctx: &Context,
        modules: impl ModuleSource,
        initial: LoaderSection,
    ) -> PluginResult<Capability<Self>> {
        let loader = Self::new(ctx, Arc::new(modules), initial);
        bind(ctx, loader, BindOptions::default().immediate(true))
    }

    /// A plugin that installs a loader into the scope it is registered in.
    #[must_use]
    pub fn plugin(modules: Arc<dyn ModuleSource>, initial: LoaderSection) -> Plugin {
        Plugin::service(true, move |ctx: &Context, _config: &Value| {
            Ok(Self::new(ctx, Arc::clone(&modules), initial.clone()))
        })
    }

    /// Module source entries resolve against.
    #[must_use]
    pub fn modules(&self) -> &Arc<dyn ModuleSource> {
        &self.modules
    }

    /// The root group.
    #[must_use]
    pub fn root(&self) -> &Arc<EntryGroup> {
        &self.root
    }

    /// A new group in `ctx` sharing this loader's modules and entry table.
    #[must_use]
    pub fn group(&self, ctx: &Context) -> EntryGroup {
        EntryGroup::new(ctx, Arc::clone(&self.table), Arc::clone(&self.modules))
    }

    /// Re-apply the root group. Returns the number of entries that failed.
    pub async fn reload(&self, section: LoaderSection) -> usize {
        info!(entries = section.entries.len(), "Reloading entries");
        self.root.set_allowed(section.allowed);
        self.root.update(section.entries).await
    }

    /// Wait until the initial entries have been applied and return how many
    /// of them failed.
    ///
    /// Resolves only after the service started.
    pub async fn started(&self) -> usize {
        let mut rx = self.started.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(failed) => (*failed).unwrap_or_default(),
            Err(_) => 0,
        }
    }

    /// Look up a live entry by id.
    #[must_use]
    pub fn entry(&self, id: &str) -> Option<Arc<Entry>> {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Every live entry, sorted by id.
    #[must_use]
    pub fn entries(&self) -> Vec<Arc<Entry>> {
        let mut entries: Vec<_> = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.id().cmp(b.id()));
        entries
    }
}

#[async_trait]
impl Service for Loader {
    const PROVIDE: Option<&'static str> = Some(Self::CAPABILITY);

    async fn start(&self) -> PluginResult<()> {
        let initial = self
            .initial
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let failed = match initial {
            Some(section) => self.reload(section).await,
            None => 0,
        };
        self.started.send_replace(Some(failed));
        Ok(())
    }

    async fn stop(&self) -> PluginResult<()> {
        self.root.dispose();
        Ok(())
    }
}
