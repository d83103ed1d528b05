//! Prelude module - commonly used types for convenient import.
//!
//! Use `use sprig_runtime::prelude::*;` to import all essential types.

// Scope tree
pub use crate::{App, AppOptions, Context, Disposable};

// Plugins
pub use crate::{Fork, IntoPlugin, Plugin, PluginDecl, Registry, Runtime, Validator};

// Services
pub use crate::{BindOptions, Capability, Invoke, Service, async_trait, bind, bind_invocable};

// Events and errors
pub use crate::{Event, PluginError, PluginResult};
