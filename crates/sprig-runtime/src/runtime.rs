//! Runtime and fork lifecycle.
//!
//! A [`Runtime`] is the one live record of a plugin inside a registry. Each
//! registration of the plugin produces a [`Fork`] tied to the scope that
//! registered it; the runtime lives exactly as long as it has forks.
//!
//! Runtime teardown is split in two lists. The *structural* list holds the
//! fork disposers and the dependency watch, and only runs when the runtime
//! itself goes away. The *effects* list holds everything the plugin body
//! did, and is also drained whenever a dependency change forces the body to
//! run again.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::context::{Context, Handler};
use crate::disposable::{Disposable, DisposableList};
use crate::error::PluginResult;
use crate::event::{Event, IsolationKey, PluginInfo, RuntimeId};
use crate::plugin::{ApplyFn, Plugin};

/// Handler for config changes of a live fork.
pub type AcceptFn = Arc<dyn Fn(&Value) -> PluginResult<()> + Send + Sync>;

#[derive(Default)]
struct RuntimeState {
    forks: Vec<Arc<Fork>>,
    forkers: Vec<(Uuid, ApplyFn)>,
    active: bool,
}

/// The shared record of one registered plugin.
pub struct Runtime {
    id: RuntimeId,
    plugin: Plugin,
    config: Value,
    context: Context,
    structural: Arc<DisposableList>,
    effects: Arc<DisposableList>,
    state: Mutex<RuntimeState>,
    disposed: AtomicBool,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id)
            .field("name", &self.plugin.name())
            .field("using", &self.plugin.dependencies())
            .field("active", &self.is_active())
            .field("forks", &self.fork_count())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub(crate) fn new(caller: &Context, plugin: Plugin, config: Value) -> Arc<Self> {
        let effects = DisposableList::new();
        Arc::new_cyclic(|weak| Self {
            id: RuntimeId::new(),
            plugin,
            config,
            context: caller.derive(Arc::clone(&effects), Some(Weak::clone(weak))),
            structural: DisposableList::new(),
            effects,
            state: Mutex::new(RuntimeState::default()),
            disposed: AtomicBool::new(false),
        })
    }

    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runtime identifier.
    #[must_use]
    pub fn id(&self) -> RuntimeId {
        self.id
    }

    /// The plugin this runtime runs.
    #[must_use]
    pub fn plugin(&self) -> &Plugin {
        &self.plugin
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    /// Validated config of the first registration.
    #[must_use]
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Capability names the body waits for.
    #[must_use]
    pub fn using(&self) -> &[String] {
        self.plugin.dependencies()
    }

    /// The scope the plugin body runs in.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Whether the body is currently applied.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state().active
    }

    /// Whether this runtime has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Number of live forks.
    #[must_use]
    pub fn fork_count(&self) -> usize {
        self.state().forks.len()
    }

    /// Number of extension points registered by the body.
    #[must_use]
    pub fn forker_count(&self) -> usize {
        self.state().forkers.len()
    }

    /// Snapshot of the live forks.
    #[must_use]
    pub fn forks(&self) -> Vec<Arc<Fork>> {
        self.state().forks.clone()
    }

    /// Diagnostic description.
    #[must_use]
    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            runtime_id: self.id,
            name: self.plugin.name().to_owned(),
        }
    }

    /// Announce the runtime, watch its dependencies, and run the body.
    pub(crate) fn start(self: &Arc<Self>) -> PluginResult<()> {
        info!(plugin = %self.name(), runtime_id = %self.id, "Plugin added");
        self.context.emit(Event::PluginAdded(self.info()));

        if !self.using().is_empty() {
            let weak = Arc::downgrade(self);
            let handler: Handler = Arc::new(move |event: &Event| {
                let Event::CapabilityChanged { name, key } = event else {
                    return;
                };
                if let Some(runtime) = weak.upgrade()
                    && runtime.watches(name, *key)
                {
                    runtime.restart();
                }
            });
            self.context
                .hook_in(&self.structural, "capability-changed", handler);
        }

        self.callback()
    }

    fn watches(&self, name: &str, key: IsolationKey) -> bool {
        self.using().iter().any(|dep| dep == name) && self.context.isolation_key(name) == key
    }

    /// Run the body if every dependency is present.
    fn callback(self: &Arc<Self>) -> PluginResult<()> {
        if self.is_disposed() {
            return Ok(());
        }
        if let Some(missing) = self.using().iter().find(|dep| !self.context.has(dep)) {
            debug!(plugin = %self.name(), capability = %missing, "Dependency unmet, staying dormant");
            return Ok(());
        }

        self.plugin.apply(&self.context, &self.config)?;
        // The body may have disposed its own runtime.
        if self.is_disposed() {
            return Ok(());
        }

        let (forks, forkers) = {
            let mut state = self.state();
            state.active = true;
            let forkers: Vec<ApplyFn> = state.forkers.iter().map(|(_, f)| Arc::clone(f)).collect();
            (state.forks.clone(), forkers)
        };
        debug!(plugin = %self.name(), forks = forks.len(), "Runtime activated");
        for fork in &forks {
            fork.run(&forkers)?;
        }
        Ok(())
    }

    /// Tear down the body's effects and run it again.
    fn restart(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }
        self.deactivate();
        if let Err(e) = self.callback() {
            error!(plugin = %self.name(), error = %e, "Plugin body failed on re-activation");
            self.context
                .emit(Event::internal_error(self.name().to_owned(), e));
        }
    }

    fn deactivate(&self) {
        let forks = {
            let mut state = self.state();
            state.active = false;
            state.forks.clone()
        };
        let disposed = self.effects.dispose_all();
        for fork in &forks {
            fork.disposables.dispose_all();
        }
        debug!(plugin = %self.name(), disposed, "Runtime deactivated");
    }

    /// Register an extension point; its removal belongs to `scope`.
    pub(crate) fn add_forker(
        self: &Arc<Self>,
        scope: &Arc<DisposableList>,
        forker: ApplyFn,
    ) -> PluginResult<Disposable> {
        let id = Uuid::new_v4();
        let live = {
            let mut state = self.state();
            state.forkers.push((id, Arc::clone(&forker)));
            if state.active {
                state.forks.clone()
            } else {
                Vec::new()
            }
        };

        let weak = Arc::downgrade(self);
        let handle = scope.push(move || {
            if let Some(runtime) = weak.upgrade() {
                runtime.state().forkers.retain(|(forker_id, _)| *forker_id != id);
            }
        });

        let forker = [forker];
        for fork in &live {
            fork.run(&forker)?;
        }
        Ok(handle)
    }

    /// Create a fork for `caller`.
    pub(crate) fn fork(self: &Arc<Self>, caller: &Context, config: Value) -> PluginResult<Arc<Fork>> {
        let disposables = DisposableList::new();
        let fork = Arc::new_cyclic(|weak| Fork {
            runtime: Arc::downgrade(self),
            context: caller
                .derive(Arc::clone(&disposables), None)
                .with_fork(Weak::clone(weak)),
            disposables,
            config: Mutex::new(config),
            acceptor: Mutex::new(None),
            disposed: AtomicBool::new(false),
            links: Mutex::new(Vec::new()),
        });

        let links = [&self.structural, caller.scope()].map(|list| {
            let fork = Arc::clone(&fork);
            list.push(move || {
                fork.dispose();
            })
        });
        fork.links().extend(links);

        let (count, forkers) = {
            let mut state = self.state();
            state.forks.push(Arc::clone(&fork));
            let forkers: Option<Vec<ApplyFn>> = state
                .active
                .then(|| state.forkers.iter().map(|(_, f)| Arc::clone(f)).collect());
            (state.forks.len(), forkers)
        };
        debug!(plugin = %self.name(), forks = count, "Fork created");

        if let Some(forkers) = forkers
            && let Err(e) = fork.run(&forkers)
        {
            fork.dispose();
            return Err(e);
        }
        Ok(fork)
    }

    fn remove_fork(&self, fork: &Fork) -> usize {
        let mut state = self.state();
        state.forks.retain(|f| !std::ptr::eq(Arc::as_ptr(f), fork));
        state.forks.len()
    }

    /// Dispose the runtime and every fork it still has.
    ///
    /// Returns `false` if it was already disposed.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        // Teardowns may register this plugin again; they must get a new runtime.
        self.context.registry().remove(self);
        self.structural.dispose_all();
        self.effects.dispose_all();
        {
            let mut state = self.state();
            state.active = false;
            state.forkers.clear();
            state.forks.clear();
        }
        info!(plugin = %self.name(), runtime_id = %self.id, "Plugin removed");
        self.context.emit(Event::PluginRemoved(self.info()));
        true
    }
}

/// One activation of a [`Runtime`] at one scope.
pub struct Fork {
    runtime: Weak<Runtime>,
    context: Context,
    disposables: Arc<DisposableList>,
    config: Mutex<Value>,
    acceptor: Mutex<Option<(Uuid, AcceptFn)>>,
    disposed: AtomicBool,
    links: Mutex<Vec<Disposable>>,
}

impl fmt::Debug for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fork")
            .field("config", &self.config())
            .field("disposed", &self.is_disposed())
            .field("disposables", &self.disposables.len())
            .finish_non_exhaustive()
    }
}

impl Fork {
    fn links(&self) -> MutexGuard<'_, Vec<Disposable>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The owning runtime, unless it is already gone.
    #[must_use]
    pub fn runtime(&self) -> Option<Arc<Runtime>> {
        self.runtime.upgrade()
    }

    /// The fork's own scope.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Validated config for this registration.
    #[must_use]
    pub fn config(&self) -> Value {
        self.config.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn acceptor(&self) -> MutexGuard<'_, Option<(Uuid, AcceptFn)>> {
        self.acceptor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_acceptor(
        self: &Arc<Self>,
        scope: &Arc<DisposableList>,
        accept: AcceptFn,
    ) -> Disposable {
        let id = Uuid::new_v4();
        *self.acceptor() = Some((id, accept));
        let weak = Arc::downgrade(self);
        scope.push(move || {
            if let Some(fork) = weak.upgrade() {
                let mut acceptor = fork.acceptor();
                if acceptor.as_ref().is_some_and(|(current, _)| *current == id) {
                    *acceptor = None;
                }
            }
        })
    }

    /// Whether a handler registered with [`Context::accept`] is live.
    #[must_use]
    pub fn accepts_updates(&self) -> bool {
        self.acceptor().is_some()
    }

    /// Hand a new config to the fork without recreating it.
    ///
    /// Returns `Ok(false)` when the fork is disposed, has no handler, or
    /// `config` is `false`. The caller recreates the fork in that case.
    ///
    /// # Errors
    ///
    /// Returns config validation errors and the handler's own error. The
    /// fork keeps its previous config then.
    pub fn update(&self, config: Value) -> PluginResult<bool> {
        if self.is_disposed() {
            return Ok(false);
        }
        let Some(accept) = self.acceptor().as_ref().map(|(_, f)| Arc::clone(f)) else {
            return Ok(false);
        };
        let Some(runtime) = self.runtime() else {
            return Ok(false);
        };
        let Some(config) = runtime.plugin().validate_config(config)? else {
            return Ok(false);
        };

        accept(&config)?;
        debug!(plugin = %runtime.name(), "Fork config updated");
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(true)
    }

    /// Whether [`Fork::dispose`] has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Number of pending teardowns in the fork's own scope.
    #[must_use]
    pub fn disposable_count(&self) -> usize {
        self.disposables.len()
    }

    fn run(&self, forkers: &[ApplyFn]) -> PluginResult<()> {
        if self.is_disposed() {
            return Ok(());
        }
        let config = self.config();
        for forker in forkers {
            forker(&self.context, &config)?;
        }
        Ok(())
    }

    /// Tear down this fork.
    ///
    /// Disposes the runtime as well when this was its last fork. Returns
    /// `false` if the fork was already disposed.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.disposables.dispose_all();
        self.acceptor().take();
        let links = std::mem::take(&mut *self.links());
        for link in &links {
            link.detach();
        }

        if let Some(runtime) = self.runtime.upgrade() {
            let remaining = runtime.remove_fork(self);
            debug!(plugin = %runtime.name(), remaining, "Fork disposed");
            if remaining == 0 {
                runtime.dispose();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::App;
    use serde_json::json;

    #[test]
    fn test_fork_dispose_is_idempotent() {
        let app = App::new();
        let fork = app
            .plugin(Plugin::function("noop", |_, _| Ok(())), Value::Null)
            .unwrap()
            .unwrap();

        assert!(fork.dispose());
        assert!(!fork.dispose());
        assert!(app.registry().is_empty());
    }

    #[test]
    fn test_fork_detaches_from_caller_scope() {
        let app = App::new();
        let fork = app
            .plugin(Plugin::function("noop", |_, _| Ok(())), Value::Null)
            .unwrap()
            .unwrap();
        assert_eq!(app.disposable_count(), 1);

        fork.dispose();
        assert_eq!(app.disposable_count(), 0);
    }

    #[test]
    fn test_runtime_dispose_cascades_to_forks() {
        let app = App::new();
        let plugin = Plugin::function("noop", |_, _| Ok(()));
        let a = app.plugin(&plugin, Value::Null).unwrap().unwrap();
        let b = app.plugin(&plugin, json!({ "n": 2 })).unwrap().unwrap();
        let runtime = a.runtime().unwrap();
        assert_eq!(runtime.fork_count(), 2);
        assert_eq!(b.config(), json!({ "n": 2 }));

        assert!(runtime.dispose());
        assert!(!runtime.dispose());
        assert!(a.is_disposed());
        assert!(b.is_disposed());
        assert_eq!(app.disposable_count(), 0);
    }

    #[test]
    fn test_forkers_run_for_late_forks() {
        let app = App::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let plugin = Plugin::function("forked", move |ctx, _| {
            let sink = Arc::clone(&sink);
            ctx.on_fork(move |_, config| {
                sink.lock().unwrap().push(config.clone());
                Ok(())
            })?;
            Ok(())
        });

        app.plugin(&plugin, json!({ "n": 1 })).unwrap();
        app.plugin(&plugin, json!({ "n": 2 })).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![json!({ "n": 1 }), json!({ "n": 2 })]);
        assert_eq!(app.registry().get(&plugin).unwrap().forker_count(), 1);
    }

    fn accepting(seen: &Arc<Mutex<Vec<Value>>>) -> Plugin {
        let sink = Arc::clone(seen);
        Plugin::function("accepting", move |ctx, _| {
            let sink = Arc::clone(&sink);
            ctx.on_fork(move |fork_ctx, _| {
                let sink = Arc::clone(&sink);
                fork_ctx.accept(move |config| {
                    sink.lock().unwrap().push(config.clone());
                    Ok(())
                })?;
                Ok(())
            })?;
            Ok(())
        })
    }

    #[test]
    fn test_update_hands_config_to_acceptor() {
        let app = App::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let fork = app
            .plugin(accepting(&seen), json!({ "n": 1 }))
            .unwrap()
            .unwrap();
        assert!(fork.accepts_updates());

        assert!(fork.update(json!({ "n": 2 })).unwrap());
        assert_eq!(fork.config(), json!({ "n": 2 }));
        assert_eq!(*seen.lock().unwrap(), vec![json!({ "n": 2 })]);
        assert!(!fork.is_disposed());

        assert!(!fork.update(json!(false)).unwrap());
        assert_eq!(fork.config(), json!({ "n": 2 }));
    }

    #[test]
    fn test_update_without_acceptor() {
        let app = App::new();
        let fork = app
            .plugin(Plugin::function("noop", |_, _| Ok(())), Value::Null)
            .unwrap()
            .unwrap();
        assert!(!fork.accepts_updates());
        assert!(!fork.update(json!({ "n": 1 })).unwrap());
        assert_eq!(fork.config(), json!({}));
    }

    #[test]
    fn test_disposed_fork_drops_acceptor() {
        let app = App::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let fork = app.plugin(accepting(&seen), Value::Null).unwrap().unwrap();

        fork.dispose();
        assert!(!fork.accepts_updates());
        assert!(!fork.update(json!({ "n": 1 })).unwrap());
        assert!(seen.lock().unwrap().is_empty());
    }
}
