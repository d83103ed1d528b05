#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Layered configuration for Sprig.
//!
//! # Usage
//!
//! ```rust,no_run
//! use sprig_config::SprigConfig;
//!
//! let resolved = SprigConfig::load(Some(std::path::Path::new("sprig.toml"))).unwrap();
//! for entry in &resolved.config.loader.entries {
//!     println!("{}", entry.name);
//! }
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **File** passed to the loader
//! 2. **Environment variables** (`SPRIG_*`), fallback only
//! 3. **Embedded defaults** (`defaults.toml` compiled into binary)
//!
//! This crate has no dependencies on other sprig crates. The loader crate
//! consumes [`EntryConfig`] directly.

/// Environment variable fallback resolution.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file loading.
pub mod loader;
/// Layered configuration merging.
pub mod merge;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::ResolvedConfig;
pub use merge::{ConfigLayer, FieldSources};
pub use types::*;

impl SprigConfig {
    /// Load defaults, an optional file and the `SPRIG_*` environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file is malformed or the final
    /// configuration fails validation.
    pub fn load(path: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(path)
    }

    /// Parse a TOML document over the defaults, ignoring the environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the document is malformed or invalid.
    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        loader::load_str(contents)
    }
}
