//! Named services with a start/stop lifecycle.
//!
//! [`bind`] registers a [`Service`] under a capability name in the current
//! scope. The name is marked as provided right away; the value itself is
//! published either at bind time (`immediate`) or once `start` resolves.
//! `stop` runs when the scope is torn down.

use std::any::type_name;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::context::{Context, spawn_detached};
use crate::error::{PluginError, PluginResult};
use crate::event::Event;

/// A component that can be bound into a scope as a capability.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Capability name used when none is given at bind time.
    const PROVIDE: Option<&'static str> = None;

    /// Whether [`Service::fork`] should run for every fork of the plugin
    /// that constructed this service.
    const FORKABLE: bool = false;

    /// Called once per bind, one scheduling tick after the app is ready.
    async fn start(&self) -> PluginResult<()> {
        Ok(())
    }

    /// Called once per bind when the owning scope is torn down.
    async fn stop(&self) -> PluginResult<()> {
        Ok(())
    }

    /// Per-fork extension point.
    fn fork(&self, ctx: &Context, config: &Value) -> PluginResult<()> {
        let _ = (ctx, config);
        Ok(())
    }
}

/// A service that can also be called directly.
pub trait Invoke: Service {
    /// Handle a call made through [`Capability::call`].
    fn invoke(&self, args: Value) -> PluginResult<Value>;
}

type InvokeFn<S> = fn(&S, Value) -> PluginResult<Value>;

/// A bound service.
///
/// Dereferences to the service instance. This is the value published into
/// the capability table, so dependents fetch it with
/// `ctx.get::<Capability<S>>(name)`.
pub struct Capability<S: Service> {
    name: Arc<str>,
    instance: Arc<S>,
    ctx: Context,
    attributes: Arc<Map<String, Value>>,
    invoker: Option<InvokeFn<S>>,
}

impl<S: Service> Clone for Capability<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            instance: Arc::clone(&self.instance),
            ctx: self.ctx.clone(),
            attributes: Arc::clone(&self.attributes),
            invoker: self.invoker,
        }
    }
}

impl<S: Service> fmt::Debug for Capability<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("service", &type_name::<S>())
            .field("attributes", &self.attributes)
            .field("invocable", &self.invoker.is_some())
            .finish()
    }
}

impl<S: Service> Deref for Capability<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.instance
    }
}

impl<S: Service> Capability<S> {
    /// Capability name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared service instance.
    #[must_use]
    pub fn instance(&self) -> &Arc<S> {
        &self.instance
    }

    /// The context this capability is bound in.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Attribute lookup.
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// All attributes.
    #[must_use]
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Whether [`Capability::call`] is available.
    #[must_use]
    pub fn is_invocable(&self) -> bool {
        self.invoker.is_some()
    }

    /// Call the service's [`Invoke::invoke`].
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotInvocable`] when the service was bound
    /// without [`bind_invocable`], or the invoke operation's own error.
    pub fn call(&self, args: Value) -> PluginResult<Value> {
        let invoke = self
            .invoker
            .ok_or_else(|| PluginError::NotInvocable(self.name.to_string()))?;
        invoke(&self.instance, args)
    }

    /// Derive a capability for `ctx` that shares this instance.
    ///
    /// The derived capability carries its own attributes (these merged with
    /// `overrides`). Its service is not started again.
    #[must_use]
    pub fn extend(&self, ctx: &Context, overrides: Map<String, Value>) -> Self {
        let mut attributes = (*self.attributes).clone();
        attributes.extend(overrides);
        Self {
            name: Arc::clone(&self.name),
            instance: Arc::clone(&self.instance),
            ctx: ctx.clone(),
            attributes: Arc::new(attributes),
            invoker: self.invoker,
        }
    }

    /// Run the service's per-fork hook.
    ///
    /// # Errors
    ///
    /// Propagates the hook's error.
    pub fn fork(&self, ctx: &Context, config: &Value) -> PluginResult<()> {
        self.instance.fork(ctx, config)
    }
}

/// Options for [`bind`].
#[derive(Debug, Clone, Default)]
pub struct BindOptions {
    name: Option<String>,
    immediate: bool,
}

impl BindOptions {
    /// Bind under `name` instead of [`Service::PROVIDE`].
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Publish at bind time rather than after `start`.
    #[must_use]
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }
}

/// Bind `service` into `ctx`.
///
/// # Errors
///
/// Returns [`PluginError::MissingCapabilityName`] when no name was given and
/// the service type declares none.
pub fn bind<S: Service>(ctx: &Context, service: S, options: BindOptions) -> PluginResult<Capability<S>> {
    bind_with(ctx, service, options, None)
}

/// Bind `service` into `ctx` so that it can also be called.
///
/// # Errors
///
/// Same as [`bind`].
pub fn bind_invocable<S: Invoke>(
    ctx: &Context,
    service: S,
    options: BindOptions,
) -> PluginResult<Capability<S>> {
    bind_with(ctx, service, options, Some(<S as Invoke>::invoke))
}

fn bind_with<S: Service>(
    ctx: &Context,
    service: S,
    options: BindOptions,
    invoker: Option<InvokeFn<S>>,
) -> PluginResult<Capability<S>> {
    let name = options
        .name
        .or_else(|| S::PROVIDE.map(str::to_owned))
        .ok_or_else(|| PluginError::MissingCapabilityName(type_name::<S>().to_owned()))?;
    let immediate = options.immediate;

    let capability = Capability {
        name: Arc::from(name.as_str()),
        instance: Arc::new(service),
        ctx: ctx.clone(),
        attributes: Arc::new(Map::new()),
        invoker,
    };

    ctx.provide(&name);
    if immediate {
        ctx.publish(&name, Arc::new(capability.clone()), true);
    }

    let started = Arc::new(AtomicBool::new(false));
    let starter = capability.clone();
    ctx.on_ready(move || {
        if started.swap(true, Ordering::SeqCst) {
            return;
        }
        let capability = starter.clone();
        starter.ctx.spawn("service-start", async move {
            // Let the code that bound us finish before `start` observes it.
            tokio::task::yield_now().await;
            match capability.instance.start().await {
                Ok(()) => {
                    debug!(capability = %capability.name, "Service started");
                    if !immediate {
                        capability
                            .ctx
                            .publish(&capability.name, Arc::new(capability.clone()), false);
                    }
                },
                Err(e) => {
                    error!(capability = %capability.name, error = %e, "Service failed to start");
                    capability
                        .ctx
                        .emit(Event::internal_error(capability.name.to_string(), e));
                },
            }
        });
    });

    let stopper = capability.clone();
    ctx.on_dispose(move || {
        spawn_detached("service-stop", async move {
            match stopper.instance.stop().await {
                Ok(()) => debug!(capability = %stopper.name, "Service stopped"),
                Err(e) => {
                    warn!(capability = %stopper.name, error = %e, "Service failed to stop");
                    stopper
                        .ctx
                        .emit(Event::internal_error(stopper.name.to_string(), e));
                },
            }
        });
    });

    debug!(capability = %name, immediate, "Service bound");
    Ok(capability)
}
