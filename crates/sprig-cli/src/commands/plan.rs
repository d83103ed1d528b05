//! Plan command - preview a reconciliation between two configs.

use std::path::Path;

use anyhow::{Context, Result};
use sprig_config::SprigConfig;
use sprig_loader::{ReconcilePlan, plan};

/// Print the operations that turn the entries of `from` into those of `to`.
pub(crate) fn run_plan(from: &Path, to: &Path) -> Result<()> {
    let before = SprigConfig::load(Some(from))
        .with_context(|| format!("failed to load {}", from.display()))?;
    let after = SprigConfig::load(Some(to))
        .with_context(|| format!("failed to load {}", to.display()))?;

    let plan = plan(&before.config.loader.entries, &after.config.loader.entries);
    print!("{}", render(&plan));
    Ok(())
}

fn render(plan: &ReconcilePlan) -> String {
    if plan.ops.is_empty() {
        return "No entries.\n".to_owned();
    }
    let mut out = String::new();
    for op in &plan.ops {
        out.push_str(&op.to_string());
        out.push('\n');
    }
    if plan.is_noop() {
        out.push_str("No changes.\n");
    }
    out
}
