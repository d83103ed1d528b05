//! Sprig Test - Shared test utilities for the Sprig runtime.
//!
//! This crate provides mock services, event probes and plugin fixtures that
//! can be used across multiple Sprig crates as a dev-dependency.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! sprig-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use sprig_runtime::App;
//! use sprig_test::{CallCounter, EventProbe, counting_plugin};
//!
//! let app = App::new();
//! let probe = EventProbe::attach(&app, &["plugin-added"]);
//! let calls = CallCounter::new();
//! app.plugin(counting_plugin("counted", &calls), serde_json::Value::Null)?;
//! assert_eq!(calls.count(), 1);
//! assert_eq!(probe.count("plugin-added"), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
