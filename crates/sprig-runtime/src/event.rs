//! Events delivered through a [`Context`](crate::Context).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifier of a [`Runtime`](crate::Runtime), stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuntimeId(Uuid);

impl RuntimeId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        let simple = self.0.simple().to_string();
        f.write_str(simple.get(..8).unwrap_or(&simple))
    }
}

/// Isolation key for one capability name.
///
/// Two contexts see the same capability slot for a name only when their keys
/// for that name are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IsolationKey(Uuid);

impl IsolationKey {
    /// The key every context starts with.
    pub const SHARED: Self = Self(Uuid::nil());

    pub(crate) fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Diagnostic description of a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Runtime identifier.
    pub runtime_id: RuntimeId,
    /// Plugin name.
    pub name: String,
}

/// Everything that can be emitted on a context.
#[derive(Debug, Clone)]
pub enum Event {
    /// The application started.
    Ready,

    /// A capability was published or withdrawn.
    CapabilityChanged {
        /// Capability name.
        name: String,
        /// Isolation key of the slot that changed.
        key: IsolationKey,
    },

    /// A runtime was created.
    PluginAdded(PluginInfo),

    /// A runtime was disposed.
    PluginRemoved(PluginInfo),

    /// A plugin was registered again while its runtime has no extension
    /// points, so the extra registration has no observable effect.
    DuplicatePlugin(PluginInfo),

    /// An error that could not be returned to a caller.
    InternalError {
        /// Component that reported the error.
        source: String,
        /// The error itself.
        error: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// Application-defined event.
    Custom {
        /// Event name.
        name: String,
        /// Event payload.
        payload: Value,
    },
}

impl Event {
    /// Hook name this event is delivered to.
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::Ready => "ready",
            Self::CapabilityChanged { .. } => "capability-changed",
            Self::PluginAdded(_) => "plugin-added",
            Self::PluginRemoved(_) => "plugin-removed",
            Self::DuplicatePlugin(_) => "duplicate-plugin",
            Self::InternalError { .. } => "internal/error",
            Self::Custom { name, .. } => name,
        }
    }

    /// Build an [`Event::InternalError`].
    pub fn internal_error(
        source: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::InternalError {
            source: source.into(),
            error: Arc::new(error),
        }
    }

    /// Build an [`Event::Custom`].
    pub fn custom(name: impl Into<String>, payload: Value) -> Self {
        Self::Custom {
            name: name.into(),
            payload,
        }
    }
}
