//! Sprig Loader - declarative plugin entries.
//!
//! This crate provides:
//! - A module table resolving entry names to plugins ([`ModuleSource`])
//! - Live entries that keep their fork while their descriptor is unchanged
//! - Reconciliation of entry lists by stable id ([`EntryGroup`], [`plan`])
//! - The [`Loader`] service and the built-in `group` module
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use serde_json::Value;
//! use sprig_config::{EntryConfig, LoaderSection};
//! use sprig_loader::{Loader, StaticModules};
//! use sprig_runtime::{App, Plugin};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let modules = StaticModules::with_builtins()
//!     .with("hello", Plugin::function("hello", |ctx, _| {
//!         ctx.on("greet", |_| {});
//!         Ok(())
//!     }));
//! let section = LoaderSection {
//!     allowed: None,
//!     entries: vec![EntryConfig::new("hello").with_id("hello")],
//! };
//!
//! let app = App::new();
//! app.plugin(Loader::plugin(Arc::new(modules), section), Value::Null)?;
//! app.start();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod entry;
mod error;
mod group;
mod loader;
mod modules;
mod plan;

pub use entry::{Entry, GroupId};
pub use error::{LoaderError, LoaderResult};
pub use group::{EntryGroup, parse_group_config};
pub use loader::Loader;
pub use modules::{GROUP_MODULE, ModuleSource, StaticModules};
pub use plan::{ReconcileOp, ReconcilePlan, plan};
