//! Run command - apply a configuration's entries and keep them alive.

use std::path::Path;

use anyhow::{Context, Result};
use sprig_config::SprigConfig;
use sprig_loader::Loader;
use sprig_runtime::{App, AppOptions, Event};
use sprig_telemetry::{LogConfig, setup_logging};
use tracing::{info, warn};

use crate::modules::builtin_modules;

/// Load `path`, start its entries and wait for Ctrl-C (or return at once
/// with `once`).
pub(crate) async fn run(path: Option<&Path>, verbose: bool, once: bool) -> Result<()> {
    let resolved = SprigConfig::load(path).context("failed to load configuration")?;
    let config = resolved.config;

    let mut log_config = LogConfig::try_from(&config.logging)?;
    if verbose {
        log_config.level = "debug".to_owned();
    }
    if let Err(e) = setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let app = App::with_options(AppOptions {
        warn_duplicates: config.registry.warn_duplicates,
    });
    report_diagnostics(&app);

    let loader = Loader::install(&app, builtin_modules(), config.loader)?;
    app.start();
    let failed = loader.started().await;

    for entry in loader.entries() {
        let state = if entry.is_running() { "running" } else { "stopped" };
        println!("  {}: {state}", entry.id());
    }
    if failed > 0 {
        println!("{failed} entries failed to apply");
    }

    if !once {
        info!("Running, press Ctrl-C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
    }

    app.stop();
    info!("Stopped");
    Ok(())
}

fn report_diagnostics(app: &App) {
    app.on("internal/error", |event| {
        if let Event::InternalError { source, error } = event {
            warn!(source = %source, error = %error, "Internal error");
        }
    });
    app.on("duplicate-plugin", |event| {
        if let Event::DuplicatePlugin(info) = event {
            warn!(plugin = %info.name, "Plugin registered twice with no effect");
        }
    });
}
