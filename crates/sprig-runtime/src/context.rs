//! Scope tree, event hooks, and the capability table.
//!
//! An [`App`] owns everything shared by one plugin tree: the hook table, the
//! capability table, the [`Registry`], and the root scope. A [`Context`] is a
//! cheap handle onto that state plus the disposable list of the scope that
//! is currently acting, so every side effect made through a context is torn
//! down with the scope that made it.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::disposable::{Disposable, DisposableList};
use crate::error::{PluginError, PluginResult};
use crate::event::{Event, IsolationKey};
use crate::plugin::{IntoPlugin, Plugin};
use crate::registry::Registry;
use crate::runtime::{Fork, Runtime};

/// Event handler.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HookId(Uuid);

struct Hook {
    id: HookId,
    handler: Handler,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    name: String,
    key: IsolationKey,
}

#[derive(Default)]
struct Slot {
    value: Option<Arc<dyn Any + Send + Sync>>,
    publication: Option<Uuid>,
    withdraw: Option<Disposable>,
    provided: bool,
    immediate: bool,
}

/// Snapshot of one capability slot as seen from a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRecord {
    /// Capability name.
    pub name: String,
    /// Isolation key of the slot.
    pub key: IsolationKey,
    /// Whether a value is currently published.
    pub present: bool,
    /// Whether some component declared it will host this capability.
    pub provided: bool,
    /// Whether the current value was published at bind time.
    pub immediate: bool,
}

/// Options for an [`App`].
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Emit [`Event::DuplicatePlugin`] when a re-registration has no effect.
    pub warn_duplicates: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            warn_duplicates: true,
        }
    }
}

pub(crate) struct Shared {
    hooks: Mutex<HashMap<String, Vec<Hook>>>,
    slots: Mutex<HashMap<SlotKey, Slot>>,
    registry: Registry,
    ready: AtomicBool,
    options: AppOptions,
}

impl Shared {
    fn hooks(&self) -> MutexGuard<'_, HashMap<String, Vec<Hook>>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<SlotKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_hook(&self, event: &str, id: HookId) {
        let mut hooks = self.hooks();
        if let Some(list) = hooks.get_mut(event) {
            list.retain(|hook| hook.id != id);
            if list.is_empty() {
                hooks.remove(event);
            }
        }
    }

    fn emit(&self, event: &Event) -> usize {
        // Snapshot so handlers may add or remove hooks while we iterate.
        let handlers: Vec<Handler> = self
            .hooks()
            .get(event.event_type())
            .map(|list| list.iter().map(|hook| Arc::clone(&hook.handler)).collect())
            .unwrap_or_default();

        trace!(
            event_type = %event.event_type(),
            handler_count = handlers.len(),
            "Emitting event"
        );
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    fn withdraw(&self, name: &str, key: IsolationKey, publication: Uuid) -> bool {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(&SlotKey {
            name: name.to_owned(),
            key,
        }) else {
            return false;
        };
        if slot.publication != Some(publication) {
            return false;
        }
        slot.value = None;
        slot.publication = None;
        slot.withdraw = None;
        slot.immediate = false;
        true
    }
}

/// Handle to one scope of a plugin tree.
#[derive(Clone)]
pub struct Context {
    shared: Arc<Shared>,
    scope: Arc<DisposableList>,
    isolation: Arc<HashMap<String, IsolationKey>>,
    runtime: Option<Weak<Runtime>>,
    fork: Option<Weak<Fork>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("scope", &self.scope)
            .field("isolated", &self.isolation.keys().collect::<Vec<_>>())
            .field("has_runtime", &self.runtime.is_some())
            .finish()
    }
}

impl Context {
    /// Same shared state and isolation, different owning scope.
    pub(crate) fn derive(
        &self,
        scope: Arc<DisposableList>,
        runtime: Option<Weak<Runtime>>,
    ) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            scope,
            isolation: Arc::clone(&self.isolation),
            runtime,
            fork: None,
        }
    }

    /// Same context, acting for `fork`.
    pub(crate) fn with_fork(mut self, fork: Weak<Fork>) -> Self {
        self.fork = Some(fork);
        self
    }

    pub(crate) fn scope(&self) -> &Arc<DisposableList> {
        &self.scope
    }

    pub(crate) fn warn_duplicates(&self) -> bool {
        self.shared.options.warn_duplicates
    }

    /// The registry shared by this plugin tree.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// The runtime whose body owns this scope, if any.
    #[must_use]
    pub fn runtime(&self) -> Option<Arc<Runtime>> {
        self.runtime.as_ref().and_then(Weak::upgrade)
    }

    /// Number of pending teardowns in this scope.
    #[must_use]
    pub fn disposable_count(&self) -> usize {
        self.scope.len()
    }

    // -----------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------

    /// Register a handler for `event`, scoped to this context.
    pub fn on<F>(&self, event: &str, handler: F) -> Disposable
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.hook_in(&self.scope, event, Arc::new(handler))
    }

    /// Register a handler whose removal belongs to `scope`.
    pub(crate) fn hook_in(
        &self,
        scope: &Arc<DisposableList>,
        event: &str,
        handler: Handler,
    ) -> Disposable {
        let id = HookId(Uuid::new_v4());
        self.shared
            .hooks()
            .entry(event.to_owned())
            .or_default()
            .push(Hook { id, handler });

        let shared = Arc::downgrade(&self.shared);
        let event = event.to_owned();
        scope.push(move || {
            if let Some(shared) = shared.upgrade() {
                shared.remove_hook(&event, id);
            }
        })
    }

    /// Remove a handler registered with [`Context::on`].
    pub fn off(&self, hook: &Disposable) -> bool {
        hook.dispose()
    }

    /// Deliver `event` to every handler registered for its type.
    ///
    /// Returns the number of handlers that ran.
    pub fn emit(&self, event: Event) -> usize {
        self.shared.emit(&event)
    }

    /// Number of handlers registered for `event`.
    #[must_use]
    pub fn hook_count(&self, event: &str) -> usize {
        self.shared.hooks().get(event).map_or(0, Vec::len)
    }

    /// Handler counts for every event that has at least one handler.
    #[must_use]
    pub fn hook_counts(&self) -> BTreeMap<String, usize> {
        self.shared
            .hooks()
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(name, list)| (name.clone(), list.len()))
            .collect()
    }

    /// Whether the application has started.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    /// Run `f` once the application is ready.
    ///
    /// Runs immediately when it already is; otherwise registers a scoped
    /// `ready` handler and returns its handle.
    pub fn on_ready<F>(&self, f: F) -> Option<Disposable>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if self.is_ready() {
            f();
            return None;
        }
        Some(self.on("ready", move |_| f()))
    }

    /// Run `f` when this scope is torn down.
    pub fn on_dispose<F>(&self, f: F) -> Disposable
    where
        F: FnOnce() + Send + 'static,
    {
        self.scope.push(f)
    }

    /// Spawn a task that is cancelled when this scope is torn down.
    pub fn spawn<F>(&self, label: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let guard = self.scope.push(move || cancel.cancel());
        let finished = guard.clone();
        let spawned = spawn_detached(label, async move {
            tokio::select! {
                biased;
                () = token.cancelled() => trace!(task = label, "Scoped task cancelled"),
                () = task => {},
            }
            finished.detach();
        });
        if !spawned {
            guard.detach();
        }
    }

    // -----------------------------------------------------------------
    // Capabilities
    // -----------------------------------------------------------------

    /// Isolation key this context uses for `name`.
    #[must_use]
    pub fn isolation_key(&self, name: &str) -> IsolationKey {
        self.isolation
            .get(name)
            .copied()
            .unwrap_or(IsolationKey::SHARED)
    }

    /// Derive a context with a private slot for capability `name`.
    ///
    /// Capabilities published under `name` through the derived context are
    /// invisible to contexts outside it, and vice versa.
    #[must_use]
    pub fn isolate(&self, name: &str) -> Self {
        let mut isolation = (*self.isolation).clone();
        isolation.insert(name.to_owned(), IsolationKey::fresh());
        Self {
            shared: Arc::clone(&self.shared),
            scope: Arc::clone(&self.scope),
            isolation: Arc::new(isolation),
            runtime: self.runtime.clone(),
            fork: self.fork.clone(),
        }
    }

    /// Whether this context and `other` see the same slot for `name`.
    #[must_use]
    pub fn shares_capability(&self, other: &Context, name: &str) -> bool {
        self.isolation_key(name) == other.isolation_key(name)
    }

    fn slot_key(&self, name: &str) -> SlotKey {
        SlotKey {
            name: name.to_owned(),
            key: self.isolation_key(name),
        }
    }

    /// Declare that some component will host capability `name`.
    pub fn provide(&self, name: &str) {
        self.shared.slots().entry(self.slot_key(name)).or_default().provided = true;
        trace!(capability = name, "Capability provided");
    }

    /// Publish `value` as capability `name`.
    ///
    /// The value is withdrawn when this scope is torn down or the returned
    /// handle is disposed, whichever comes first.
    pub fn set<T>(&self, name: &str, value: Arc<T>) -> Disposable
    where
        T: Any + Send + Sync,
    {
        self.publish(name, value, false)
    }

    pub(crate) fn publish(
        &self,
        name: &str,
        value: Arc<dyn Any + Send + Sync>,
        immediate: bool,
    ) -> Disposable {
        let key = self.isolation_key(name);
        let publication = Uuid::new_v4();
        let replaced = {
            let mut slots = self.shared.slots();
            let slot = slots.entry(self.slot_key(name)).or_default();
            slot.value = Some(value);
            slot.publication = Some(publication);
            slot.immediate = immediate;
            slot.withdraw.take()
        };
        // The previous publication can no longer be withdrawn.
        if let Some(previous) = replaced {
            previous.detach();
        }
        debug!(capability = name, immediate, "Capability published");
        self.emit(Event::CapabilityChanged {
            name: name.to_owned(),
            key,
        });

        let shared = Arc::downgrade(&self.shared);
        let slot_name = name.to_owned();
        let handle = self.scope.push(move || {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            if shared.withdraw(&slot_name, key, publication) {
                debug!(capability = %slot_name, "Capability withdrawn");
                shared.emit(&Event::CapabilityChanged {
                    name: slot_name,
                    key,
                });
            }
        });

        if let Some(slot) = self.shared.slots().get_mut(&self.slot_key(name))
            && slot.publication == Some(publication)
        {
            slot.withdraw = Some(handle.clone());
        }
        handle
    }

    fn get_any(&self, name: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.shared
            .slots()
            .get(&self.slot_key(name))
            .and_then(|slot| slot.value.clone())
    }

    /// Look up capability `name` as a `T`.
    ///
    /// Returns `None` when it is absent or holds a different type.
    #[must_use]
    pub fn get<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.get_any(name)?.downcast::<T>().ok()
    }

    /// Whether capability `name` currently has a value.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.get_any(name).is_some()
    }

    /// Whether capability `name` was declared with [`Context::provide`].
    #[must_use]
    pub fn is_provided(&self, name: &str) -> bool {
        self.shared
            .slots()
            .get(&self.slot_key(name))
            .is_some_and(|slot| slot.provided)
    }

    /// Snapshot of the slot for `name`.
    #[must_use]
    pub fn capability(&self, name: &str) -> CapabilityRecord {
        let key = self.isolation_key(name);
        let slots = self.shared.slots();
        let slot = slots.get(&self.slot_key(name));
        CapabilityRecord {
            name: name.to_owned(),
            key,
            present: slot.is_some_and(|s| s.value.is_some()),
            provided: slot.is_some_and(|s| s.provided),
            immediate: slot.is_some_and(|s| s.immediate),
        }
    }

    // -----------------------------------------------------------------
    // Registry delegates
    // -----------------------------------------------------------------

    /// Register `plugin` at this scope.
    ///
    /// See [`Registry::register`].
    ///
    /// # Errors
    ///
    /// Propagates registration and plugin body errors.
    pub fn plugin(&self, plugin: impl IntoPlugin, config: Value) -> PluginResult<Option<Arc<Fork>>> {
        self.shared.registry.register(self, plugin, config)
    }

    /// Register an anonymous plugin gated on `using`.
    ///
    /// # Errors
    ///
    /// Propagates errors from the first activation of `f`.
    pub fn using<I, S, F>(&self, using: I, f: F) -> PluginResult<Option<Arc<Fork>>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Context, &Value) -> PluginResult<()> + Send + Sync + 'static,
    {
        self.plugin(Plugin::using("using", using, f), Value::Null)
    }

    /// Dispose the runtime of `plugin`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotRegistered`] when it has no live runtime.
    pub fn dispose_plugin(&self, plugin: &Plugin) -> PluginResult<Arc<Runtime>> {
        self.shared.registry.dispose(plugin)
    }

    /// Register an extension point run once per fork of the current plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NoRuntime`] outside a plugin body, or the
    /// callback's own error when it is run immediately for live forks.
    pub fn on_fork<F>(&self, f: F) -> PluginResult<Disposable>
    where
        F: Fn(&Context, &Value) -> PluginResult<()> + Send + Sync + 'static,
    {
        let runtime = self.runtime().ok_or(PluginError::NoRuntime)?;
        runtime.add_forker(&self.scope, Arc::new(f))
    }

    /// Take config changes for the current fork in place.
    ///
    /// While a handler is set, [`Fork::update`] passes new configs to it
    /// instead of the fork being recreated.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NoFork`] outside an extension point.
    pub fn accept<F>(&self, f: F) -> PluginResult<Disposable>
    where
        F: Fn(&Value) -> PluginResult<()> + Send + Sync + 'static,
    {
        let fork = self
            .fork
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(PluginError::NoFork)?;
        Ok(fork.set_acceptor(&self.scope, Arc::new(f)))
    }
}

/// Spawn onto the ambient tokio runtime, if there is one.
pub(crate) fn spawn_detached<F>(label: &'static str, task: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            drop(handle.spawn(task));
            true
        },
        Err(_) => {
            warn!(task = label, "No async runtime available, task dropped");
            false
        },
    }
}

/// Root of a plugin tree.
///
/// Dereferences to the root [`Context`]. Dropping the app tears down the
/// root scope and with it every plugin registered there.
pub struct App {
    context: Context,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("ready", &self.context.is_ready())
            .field("runtimes", &self.context.registry().len())
            .finish()
    }
}

impl App {
    /// Create an app with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(AppOptions::default())
    }

    /// Create an app with explicit options.
    #[must_use]
    pub fn with_options(options: AppOptions) -> Self {
        let shared = Arc::new(Shared {
            hooks: Mutex::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
            registry: Registry::new(),
            ready: AtomicBool::new(false),
            options,
        });
        Self {
            context: Context {
                shared,
                scope: DisposableList::new(),
                isolation: Arc::new(HashMap::new()),
                runtime: None,
                fork: None,
            },
        }
    }

    /// The root context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Mark the app ready and emit [`Event::Ready`].
    pub fn start(&self) {
        if self.context.shared.ready.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Application started");
        self.context.emit(Event::Ready);
    }

    /// Tear down the root scope.
    ///
    /// Everything registered at the root, plugins included, is disposed. The
    /// app can be started again afterwards.
    pub fn stop(&self) {
        self.context.shared.ready.store(false, Ordering::SeqCst);
        let disposed = self.context.scope.dispose_all();
        info!(disposed, "Application stopped");
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for App {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.context
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.context.scope.dispose_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_: &Event| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_on_and_emit() {
        let app = App::new();
        let (count, handler) = counter();
        app.on("tick", handler);

        assert_eq!(app.emit(Event::custom("tick", Value::Null)), 1);
        assert_eq!(app.emit(Event::custom("other", Value::Null)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_removes_handler_and_scope_entry() {
        let app = App::new();
        let (count, handler) = counter();
        let hook = app.on("tick", handler);
        assert_eq!(app.disposable_count(), 1);

        assert!(app.off(&hook));
        assert!(!app.off(&hook));
        app.emit(Event::custom("tick", Value::Null));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(app.disposable_count(), 0);
        assert_eq!(app.hook_count("tick"), 0);
    }

    #[test]
    fn test_handler_can_unregister_itself_during_emit() {
        let app = App::new();
        let slot: Arc<Mutex<Option<Disposable>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let hook = app.on("tick", move |_| {
            if let Some(hook) = inner.lock().unwrap().take() {
                hook.dispose();
            }
        });
        *slot.lock().unwrap() = Some(hook);

        assert_eq!(app.emit(Event::custom("tick", Value::Null)), 1);
        assert_eq!(app.emit(Event::custom("tick", Value::Null)), 0);
    }

    #[test]
    fn test_set_get_and_withdraw() {
        let app = App::new();
        let (changes, handler) = counter();
        app.on("capability-changed", handler);

        let handle = app.set("answer", Arc::new(42_u32));
        assert_eq!(app.get::<u32>("answer").as_deref(), Some(&42));
        assert!(app.get::<String>("answer").is_none());
        assert!(app.has("answer"));

        assert!(handle.dispose());
        assert!(!app.has("answer"));
        assert_eq!(changes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stale_withdraw_keeps_newer_value() {
        let app = App::new();
        let first = app.set("answer", Arc::new(1_u32));
        let _second = app.set("answer", Arc::new(2_u32));

        first.dispose();
        assert_eq!(app.get::<u32>("answer").as_deref(), Some(&2));
    }

    #[test]
    fn test_republish_replaces_withdraw_entry() {
        let app = App::new();
        for n in 0..5_u32 {
            let _handle = app.set("answer", Arc::new(n));
        }
        assert_eq!(app.disposable_count(), 1);
        assert_eq!(app.get::<u32>("answer").as_deref(), Some(&4));

        app.stop();
        assert!(!app.has("answer"));
    }

    #[test]
    fn test_accept_outside_fork_fails() {
        let app = App::new();
        let err = app.accept(|_| Ok(())).unwrap_err();
        assert!(matches!(err, PluginError::NoFork));
    }

    #[test]
    fn test_isolated_context_has_private_slot() {
        let app = App::new();
        let isolated = app.isolate("db");
        let _handle = isolated.set("db", Arc::new("private"));

        assert!(isolated.has("db"));
        assert!(!app.has("db"));
        assert!(!app.shares_capability(&isolated, "db"));
        assert!(app.shares_capability(&isolated, "cache"));
    }

    #[test]
    fn test_provide_marks_slot() {
        let app = App::new();
        app.provide("cache");
        let record = app.capability("cache");
        assert!(record.provided);
        assert!(!record.present);
        assert!(app.is_provided("cache"));
    }

    #[test]
    fn test_on_ready_runs_immediately_once_started() {
        let app = App::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        assert!(
            app.on_ready(move || {
                handle.fetch_add(1, Ordering::SeqCst);
            })
            .is_some()
        );

        app.start();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let handle = Arc::clone(&count);
        assert!(
            app.on_ready(move || {
                handle.fetch_add(1, Ordering::SeqCst);
            })
            .is_none()
        );
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_on_fork_outside_body_fails() {
        let app = App::new();
        let err = app.on_fork(|_, _| Ok(())).unwrap_err();
        assert!(matches!(err, PluginError::NoRuntime));
    }

    #[tokio::test]
    async fn test_spawn_cancelled_with_scope() {
        let app = App::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        app.spawn("test", async move {
            tokio::task::yield_now().await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(app.disposable_count(), 1);

        app.stop();
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawn_detaches_guard_when_finished() {
        let app = App::new();
        app.spawn("test", async {});
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(app.disposable_count(), 0);
    }
}
