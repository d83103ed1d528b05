//! Plugin and config fixtures.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use sprig_runtime::Plugin;
use tempfile::NamedTempFile;

use crate::mocks::CallCounter;

/// A plugin whose body only counts how often it ran.
#[must_use]
pub fn counting_plugin(name: &str, calls: &CallCounter) -> Plugin {
    let calls = calls.clone();
    Plugin::function(name, move |_, _| {
        calls.increment();
        Ok(())
    })
}

/// A plugin that registers one handler for `event` and counts its calls.
#[must_use]
pub fn listener_plugin(name: &str, event: &str, calls: &CallCounter) -> Plugin {
    let calls = calls.clone();
    let event = event.to_owned();
    Plugin::function(name, move |ctx, _| {
        let calls = calls.clone();
        ctx.on(&event, move |_| calls.increment());
        Ok(())
    })
}

/// A plugin that records every config it is applied with, one per fork.
#[must_use]
pub fn recording_plugin(name: &str, sink: &Arc<Mutex<Vec<Value>>>) -> Plugin {
    let sink = Arc::clone(sink);
    Plugin::function(name, move |ctx, _| {
        let sink = Arc::clone(&sink);
        ctx.on_fork(move |_, config| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(config.clone());
            Ok(())
        })?;
        Ok(())
    })
}

/// A TOML config file that lives as long as the value.
#[derive(Debug)]
pub struct TempConfig {
    file: NamedTempFile,
}

impl TempConfig {
    /// Write `contents` to a fresh temporary `.toml` file.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be created or written.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(contents: &str) -> Self {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("create temp config");
        file.write_all(contents.as_bytes()).expect("write temp config");
        Self { file }
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
