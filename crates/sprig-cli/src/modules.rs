//! Modules available to `sprig run`.

use serde_json::Value;
use sprig_loader::StaticModules;
use sprig_runtime::{Event, Plugin};
use tracing::info;

/// Built-in modules plus `echo`.
pub(crate) fn builtin_modules() -> StaticModules {
    StaticModules::with_builtins().with("echo", echo_plugin())
}

/// Logs its `message` once per entry and announces itself on `echo`.
fn echo_plugin() -> Plugin {
    Plugin::function("echo", |ctx, _config| {
        ctx.on_fork(|fork_ctx, config| {
            let message = config
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("hello")
                .to_owned();
            info!(message = %message, "echo");
            fork_ctx.emit(Event::custom("echo", Value::String(message.clone())));
            fork_ctx.on_dispose(move || info!(message = %message, "echo stopped"));
            Ok(())
        })?;
        Ok(())
    })
}
