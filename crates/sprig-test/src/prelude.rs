//! Prelude module - commonly used test helpers.
//!
//! Use `use sprig_test::prelude::*;` to import all essential helpers.

pub use crate::{
    CallCounter, EventProbe, MockService, TempConfig, counting_plugin, hook_snapshot,
    init_tracing, listener_plugin, recording_plugin, settle,
};
