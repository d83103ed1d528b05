//! Sprig Runtime - plugin lifecycle and capability injection.
//!
//! This crate provides:
//! - A scope tree with event hooks and a capability table ([`App`], [`Context`])
//! - Plugin identity and declaration ([`Plugin`], [`PluginDecl`])
//! - One shared [`Runtime`] per plugin with one [`Fork`] per registration
//! - Dependency-gated activation through `using`
//! - Services bound as named capabilities with a start/stop lifecycle
//!
//! # Architecture
//!
//! Every side effect is recorded on the disposable list of the scope that
//! made it. Disposing a fork drains its list; disposing the last fork of a
//! runtime drains the runtime's lists, which in turn disposes the forks of
//! every plugin the body registered. Nothing outlives the scope that
//! created it.
//!
//! # Example
//!
//! ```rust
//! use sprig_runtime::{App, Plugin};
//! use serde_json::Value;
//!
//! let app = App::new();
//! let plugin = Plugin::function("hello", |ctx, _config| {
//!     ctx.on("greet", |_| {});
//!     Ok(())
//! });
//!
//! let fork = app.plugin(&plugin, Value::Null).unwrap().unwrap();
//! assert_eq!(app.hook_count("greet"), 1);
//!
//! fork.dispose();
//! assert_eq!(app.hook_count("greet"), 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod disposable;
mod error;
mod event;
mod plugin;
mod registry;
mod runtime;
mod service;

pub use context::{App, AppOptions, CapabilityRecord, Context, Handler};
pub use disposable::{Disposable, DisposableId, DisposableList};
pub use error::{PluginError, PluginResult};
pub use event::{Event, IsolationKey, PluginInfo, RuntimeId};
pub use plugin::{ApplyFn, IntoPlugin, Plugin, PluginDecl, PluginKey, PluginKind, Validator};
pub use registry::Registry;
pub use runtime::{AcceptFn, Fork, Runtime};
pub use service::{BindOptions, Capability, Invoke, Service, bind, bind_invocable};

/// Re-exported so [`Service`] implementors can use the attribute without a
/// direct dependency.
pub use async_trait::async_trait;
