//! Check command - load and validate a configuration file.

use std::path::Path;

use anyhow::{Context, Result};
use sprig_config::{ConfigLayer, ResolvedConfig, SprigConfig};

/// Load `path` and print a summary.
pub(crate) fn run_check(path: Option<&Path>, show: bool) -> Result<()> {
    let resolved = SprigConfig::load(path).context("configuration is invalid")?;
    print!("{}", summary(&resolved));
    if show {
        println!();
        print!("{}", resolved.to_toml()?);
    }
    Ok(())
}

fn summary(resolved: &ResolvedConfig) -> String {
    let config = &resolved.config;
    let mut out = String::new();
    out.push_str("Configuration OK\n");
    for file in &resolved.loaded_files {
        out.push_str(&format!("  File: {file}\n"));
    }
    out.push_str(&format!(
        "  Logging: {} ({})\n",
        config.logging.level, config.logging.format
    ));

    let enabled = config.loader.entries.iter().filter(|e| !e.disabled).count();
    out.push_str(&format!(
        "  Entries: {} ({enabled} enabled)\n",
        config.loader.entries.len()
    ));
    for entry in &config.loader.entries {
        let id = entry.id.as_deref().unwrap_or("<anonymous>");
        let state = if entry.disabled { " [disabled]" } else { "" };
        out.push_str(&format!("    {id}: {}{state}\n", entry.name));
    }

    let mut from_env: Vec<&str> = resolved
        .field_sources
        .iter()
        .filter(|(_, layer)| **layer == ConfigLayer::Environment)
        .map(|(field, _)| field.as_str())
        .collect();
    from_env.sort_unstable();
    if !from_env.is_empty() {
        out.push_str(&format!("  From environment: {}\n", from_env.join(", ")));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use sprig_test::TempConfig;

    use super::*;

    #[test]
    fn test_summary_lists_entries() {
        let file = TempConfig::new(
            r#"
[[loader.entries]]
id = "hello"
name = "echo"

[[loader.entries]]
name = "echo"
disabled = true
"#,
        );
        let resolved =
            sprig_config::loader::load_with_env(Some(file.path()), &HashMap::new()).unwrap();

        let text = summary(&resolved);
        assert!(text.contains("Entries: 2 (1 enabled)"));
        assert!(text.contains("hello: echo"));
        assert!(text.contains("<anonymous>: echo [disabled]"));
    }

    #[test]
    fn test_check_rejects_invalid() {
        let file = TempConfig::new("[logging]\nlevel = \"loud\"\n");
        assert!(run_check(Some(file.path()), false).is_err());
    }
}
