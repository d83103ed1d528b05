//! Mock implementations for testing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use sprig_runtime::{Context, Event, Invoke, PluginError, PluginResult, Service};

/// Shared call counter.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    /// Create a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// Current value.
    #[must_use]
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records every event of the watched types.
#[derive(Debug, Clone, Default)]
pub struct EventProbe {
    seen: Arc<Mutex<Vec<Event>>>,
}

impl EventProbe {
    /// Attach handlers for `event_types` to `ctx`.
    #[must_use]
    pub fn attach(ctx: &Context, event_types: &[&str]) -> Self {
        let probe = Self::default();
        for event_type in event_types {
            let seen = Arc::clone(&probe.seen);
            ctx.on(event_type, move |event| {
                seen.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(event.clone());
            });
        }
        probe
    }

    /// Every recorded event in delivery order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded events of `event_type`.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.event_type() == event_type)
            .count()
    }

    /// Sources of every recorded `internal/error`.
    #[must_use]
    pub fn error_sources(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|event| match event {
                Event::InternalError { source, .. } => Some(source.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Handler counts per event, for before/after leak comparisons.
#[must_use]
pub fn hook_snapshot(ctx: &Context) -> BTreeMap<String, usize> {
    ctx.hook_counts()
}

/// Service that counts its lifecycle calls.
///
/// Published as `mock` unless bound under another name.
#[derive(Debug, Clone, Default)]
pub struct MockService {
    /// Incremented by every `start`.
    pub starts: CallCounter,
    /// Incremented by every `stop`.
    pub stops: CallCounter,
    /// Incremented by every per-fork hook.
    pub forks: CallCounter,
    fail_start: bool,
}

impl MockService {
    /// Create a service whose hooks succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `start` fail.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

#[async_trait]
impl Service for MockService {
    const PROVIDE: Option<&'static str> = Some("mock");
    const FORKABLE: bool = true;

    async fn start(&self) -> PluginResult<()> {
        self.starts.increment();
        if self.fail_start {
            return Err(PluginError::ServiceFailed {
                name: "mock".into(),
                message: "start refused".into(),
            });
        }
        Ok(())
    }

    async fn stop(&self) -> PluginResult<()> {
        self.stops.increment();
        Ok(())
    }

    fn fork(&self, _ctx: &Context, _config: &Value) -> PluginResult<()> {
        self.forks.increment();
        Ok(())
    }
}

impl Invoke for MockService {
    fn invoke(&self, args: Value) -> PluginResult<Value> {
        Ok(args)
    }
}
