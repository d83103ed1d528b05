//! Loader error types.

use sprig_runtime::PluginError;
use thiserror::Error;

/// Errors from resolving modules and applying entries.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// No module is registered under the name.
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// The module exists but the group does not allow it.
    #[error("module not allowed here: {0}")]
    ModuleNotAllowed(String),

    /// A single entry failed to apply.
    #[error("entry {id} failed: {source}")]
    Entry {
        /// Entry id.
        id: String,
        /// What went wrong.
        #[source]
        source: Box<LoaderError>,
    },

    /// Registering the entry's plugin failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// A group plugin received a config it cannot read.
    #[error("invalid group config: {0}")]
    InvalidGroupConfig(String),
}

impl LoaderError {
    /// Attribute this error to entry `id`.
    #[must_use]
    pub fn for_entry(self, id: impl Into<String>) -> Self {
        Self::Entry {
            id: id.into(),
            source: Box::new(self),
        }
    }
}

/// Result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;
