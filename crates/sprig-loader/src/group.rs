//! Entry groups and the built-in `group` module.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use serde_json::Value;
use sprig_config::{EntryConfig, LoaderSection};
use sprig_runtime::{Capability, Context, Event, Plugin, PluginError};
use tracing::{debug, error, info};

use crate::entry::{Entry, EntryTable, GroupId};
use crate::error::{LoaderError, LoaderResult};
use crate::loader::Loader;
use crate::modules::{GROUP_MODULE, ModuleSource};
use crate::plan::{ReconcileOp, plan};

/// A list of entries reconciled as a unit.
///
/// Entries live in the loader's shared table, so an id can move from one
/// group to another between passes. A group only stops entries it still
/// owns.
pub struct EntryGroup {
    id: GroupId,
    ctx: Context,
    table: EntryTable,
    modules: Arc<dyn ModuleSource>,
    allowed: Mutex<Option<Vec<String>>>,
    applied: Mutex<Vec<EntryConfig>>,
    pass: tokio::sync::Mutex<()>,
    disposed: AtomicBool,
}

impl fmt::Debug for EntryGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryGroup")
            .field("id", &self.id)
            .field("entries", &self.ids())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl EntryGroup {
    pub(crate) fn new(ctx: &Context, table: EntryTable, modules: Arc<dyn ModuleSource>) -> Self {
        Self {
            id: GroupId::new(),
            ctx: ctx.clone(),
            table,
            modules,
            allowed: Mutex::new(None),
            applied: Mutex::new(Vec::new()),
            pass: tokio::sync::Mutex::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Group id.
    #[must_use]
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Ids applied by the last pass, in list order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|config| config.id.clone())
            .collect()
    }

    /// Descriptors applied by the last pass, with ids filled in.
    #[must_use]
    pub fn applied(&self) -> Vec<EntryConfig> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether [`EntryGroup::dispose`] has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Restrict entries to the named modules. `None` allows everything.
    pub fn set_allowed(&self, allowed: Option<Vec<String>>) {
        *self.allowed.lock().unwrap_or_else(PoisonError::into_inner) = allowed;
    }

    /// Converge the group onto `entries`.
    ///
    /// Entry failures never abort the pass: each one is reported on
    /// `internal/error` and counted in the return value.
    pub async fn update(&self, entries: Vec<EntryConfig>) -> usize {
        let _pass = self.pass.lock().await;
        if self.is_disposed() {
            return 0;
        }

        let plan = {
            let mut applied = self.applied.lock().unwrap_or_else(PoisonError::into_inner);
            let plan = plan(&applied, &entries);
            applied.clone_from(&plan.applied);
            plan
        };
        debug!(group = ?self.id, ops = plan.ops.len(), "Reconciling entries");

        let mut failed = Vec::new();
        for op in plan.ops {
            if self.is_disposed() {
                break;
            }
            match op {
                ReconcileOp::Create(config) | ReconcileOp::Update { next: config, .. } => {
                    let id = config.id.clone().unwrap_or_default();
                    if let Err(e) = self.apply(&id, config).await {
                        let e = e.for_entry(&id);
                        error!(entry = %id, error = %e, "Entry failed to apply");
                        self.ctx.emit(Event::internal_error("loader", e));
                        failed.push(id);
                    }
                },
                ReconcileOp::Remove(config) => {
                    self.remove(config.id.as_deref().unwrap_or_default());
                },
            }
        }

        if !failed.is_empty() {
            info!(group = ?self.id, failed = ?failed, "Reconciled with failures");
        }
        failed.len()
    }

    async fn apply(&self, id: &str, config: EntryConfig) -> LoaderResult<()> {
        let entry = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                table
                    .entry(id.to_owned())
                    .or_insert_with(|| Arc::new(Entry::new(id))),
            )
        };
        entry.attach(self.id);

        let plugin = if config.disabled {
            None
        } else {
            self.check_allowed(&config.name)?;
            Some(self.modules.resolve(&config.name).await?)
        };
        if self.is_disposed() {
            return Ok(());
        }
        entry.update(&self.ctx, config, plugin.as_ref())
    }

    fn check_allowed(&self, name: &str) -> LoaderResult<()> {
        let allowed = self.allowed.lock().unwrap_or_else(PoisonError::into_inner);
        match allowed.as_ref() {
            Some(names) if !names.iter().any(|n| n == name) => {
                Err(LoaderError::ModuleNotAllowed(name.to_owned()))
            },
            _ => Ok(()),
        }
    }

    fn remove(&self, id: &str) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let owned = table.get(id).is_some_and(|entry| entry.group() == Some(self.id));
        if !owned {
            return;
        }
        if let Some(entry) = table.remove(id) {
            drop(table);
            entry.stop();
            debug!(entry = %id, "Entry removed");
        }
    }

    /// Remove every tracked entry, in list order.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let applied = std::mem::take(
            &mut *self.applied.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for config in &applied {
            self.remove(config.id.as_deref().unwrap_or_default());
        }
        debug!(group = ?self.id, entries = applied.len(), "Group disposed");
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GroupConfig {
    List(Vec<EntryConfig>),
    Section(LoaderSection),
}

impl From<GroupConfig> for LoaderSection {
    fn from(config: GroupConfig) -> Self {
        match config {
            GroupConfig::List(entries) => Self {
                allowed: None,
                entries,
            },
            GroupConfig::Section(section) => section,
        }
    }
}

/// Read a group config: a list of entries or `{ entries, allowed }`.
///
/// # Errors
///
/// Returns [`LoaderError::InvalidGroupConfig`] for anything else.
pub fn parse_group_config(value: &Value) -> LoaderResult<LoaderSection> {
    GroupConfig::deserialize(value)
        .map(LoaderSection::from)
        .map_err(|e| LoaderError::InvalidGroupConfig(e.to_string()))
}

/// The built-in `group` module.
///
/// Every fork reconciles its own nested group through the `loader`
/// capability and disposes it with the fork. A changed config is applied to
/// the live group, so unchanged children keep running.
pub(crate) fn group_plugin() -> Plugin {
    Plugin::using(GROUP_MODULE, [Loader::CAPABILITY], |ctx: &Context, _config: &Value| {
        let loader = ctx
            .get::<Capability<Loader>>(Loader::CAPABILITY)
            .ok_or_else(|| PluginError::ExecutionFailed("loader capability missing".into()))?;
        ctx.on_fork(move |fork_ctx, config| {
            let section = parse_group_config(config).map_err(PluginError::body)?;
            let group = Arc::new(loader.group(fork_ctx));
            let disposer = Arc::clone(&group);
            fork_ctx.on_dispose(move || disposer.dispose());

            // Config changes are reconciled into the same group.
            let accepted = Arc::clone(&group);
            let scope = fork_ctx.clone();
            fork_ctx.accept(move |config| {
                let section = parse_group_config(config).map_err(PluginError::body)?;
                schedule(&scope, &accepted, section);
                Ok(())
            })?;

            schedule(fork_ctx, &group, section);
            Ok(())
        })?;
        Ok(())
    })
}

fn schedule(ctx: &Context, group: &Arc<EntryGroup>, section: LoaderSection) {
    group.set_allowed(section.allowed);
    let group = Arc::clone(group);
    ctx.spawn("group-update", async move {
        group.update(section.entries).await;
    });
}
