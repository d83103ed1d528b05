//! Plugin runtime error types.

use thiserror::Error;

/// Errors from registering, running, or disposing plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin declaration has nothing to run.
    #[error("invalid plugin {0}: expected an apply callback or a service constructor")]
    InvalidPlugin(String),

    /// The plugin's validator rejected the supplied config.
    #[error("config validation failed for plugin {plugin}: {message}")]
    ConfigValidation {
        /// Plugin whose config was rejected.
        plugin: String,
        /// Validator message.
        message: String,
    },

    /// No live runtime exists for the plugin.
    #[error("plugin not registered: {0}")]
    NotRegistered(String),

    /// A service was bound without a name and its type declares no default.
    #[error("no capability name given for service {0}")]
    MissingCapabilityName(String),

    /// `call` was used on a capability that has no invoke operation.
    #[error("capability is not invocable: {0}")]
    NotInvocable(String),

    /// Extension points can only be registered from a plugin body.
    #[error("extension points can only be registered from a plugin body")]
    NoRuntime,

    /// Config handlers can only be registered from an extension point.
    #[error("config handlers can only be registered from an extension point")]
    NoFork,

    /// A service `start` or `stop` hook failed.
    #[error("service {name} failed: {message}")]
    ServiceFailed {
        /// Capability name of the service.
        name: String,
        /// Failure reason.
        message: String,
    },

    /// A plugin body reported a failure.
    #[error("plugin execution failed: {0}")]
    ExecutionFailed(String),

    /// A plugin body failed with an error from another layer.
    #[error("plugin body failed: {0}")]
    Body(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PluginError {
    /// Wrap an arbitrary error raised inside a plugin body.
    pub fn body(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Body(Box::new(error))
    }
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
