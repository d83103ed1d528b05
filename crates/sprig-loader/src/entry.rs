//! Live entries.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use sprig_config::EntryConfig;
use sprig_runtime::{Context, Fork, Plugin};
use tracing::debug;
use uuid::Uuid;

use crate::error::LoaderResult;

/// Identifies the group that currently owns an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(Uuid);

impl GroupId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Entry table shared by every group of one loader.
pub(crate) type EntryTable = Arc<Mutex<HashMap<String, Arc<Entry>>>>;

#[derive(Default)]
struct EntryState {
    config: Option<EntryConfig>,
    plugin: Option<Plugin>,
    fork: Option<Arc<Fork>>,
    group: Option<GroupId>,
}

/// One declarative entry and the fork it currently drives.
pub struct Entry {
    id: String,
    state: Mutex<EntryState>,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("config", &state.config)
            .field("running", &state.fork.is_some())
            .finish()
    }
}

impl Entry {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(EntryState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The descriptor applied last.
    #[must_use]
    pub fn config(&self) -> Option<EntryConfig> {
        self.state().config.clone()
    }

    /// The live fork, if the entry is running.
    #[must_use]
    pub fn fork(&self) -> Option<Arc<Fork>> {
        self.state()
            .fork
            .as_ref()
            .filter(|fork| !fork.is_disposed())
            .cloned()
    }

    /// Whether the entry currently drives a live fork.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.fork().is_some()
    }

    /// Group that owns the entry.
    #[must_use]
    pub fn group(&self) -> Option<GroupId> {
        self.state().group
    }

    pub(crate) fn attach(&self, group: GroupId) {
        self.state().group = Some(group);
    }

    /// Apply `config` in `ctx`.
    ///
    /// A disabled descriptor, or a missing `plugin`, stops the entry. The
    /// live fork is kept when the plugin and its config are unchanged, or
    /// when the fork takes the new config through its accept handler;
    /// anything else restarts the entry.
    ///
    /// # Errors
    ///
    /// Propagates registration errors, in which case the entry is left
    /// stopped. An error from the accept handler leaves the fork running
    /// with its previous config.
    pub fn update(
        &self,
        ctx: &Context,
        config: EntryConfig,
        plugin: Option<&Plugin>,
    ) -> LoaderResult<()> {
        let plugin = match plugin {
            Some(plugin) if !config.disabled => plugin,
            _ => {
                self.stop();
                self.state().config = Some(config);
                debug!(entry = %self.id, "Entry disabled");
                return Ok(());
            },
        };

        let live = {
            let mut state = self.state();
            let live = state
                .fork
                .clone()
                .filter(|fork| !fork.is_disposed())
                .filter(|_| state.plugin.as_ref().is_some_and(|p| p.same_as(plugin)));
            if live.is_some() && state.config.as_ref().map(|c| &c.config) == Some(&config.config) {
                state.config = Some(config);
                return Ok(());
            }
            live
        };

        if let Some(fork) = live
            && fork.update(config.config.clone())?
        {
            debug!(entry = %self.id, module = %config.name, "Entry updated in place");
            self.state().config = Some(config);
            return Ok(());
        }

        self.stop();
        let fork = ctx.plugin(plugin, config.config.clone())?;
        debug!(entry = %self.id, module = %config.name, running = fork.is_some(), "Entry applied");

        let mut state = self.state();
        state.plugin = Some(plugin.clone());
        state.fork = fork;
        state.config = Some(config);
        Ok(())
    }

    /// Dispose the live fork, if any.
    pub fn stop(&self) -> bool {
        let fork = {
            let mut state = self.state();
            state.plugin = None;
            state.fork.take()
        };
        fork.is_some_and(|fork| fork.dispose())
    }
}
