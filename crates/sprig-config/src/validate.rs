//! Post-merge configuration validation.

use std::collections::HashSet;

use crate::error::{ConfigError, ConfigResult};
use crate::types::SprigConfig;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &SprigConfig) -> ConfigResult<()> {
    validate_logging(config)?;
    validate_loader(config)?;
    Ok(())
}

fn validate_logging(config: &SprigConfig) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::ValidationError {
            field: "logging.level".to_owned(),
            message: format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        });
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(ConfigError::ValidationError {
            field: "logging.format".to_owned(),
            message: format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        });
    }

    Ok(())
}

fn validate_loader(config: &SprigConfig) -> ConfigResult<()> {
    if let Some(allowed) = &config.loader.allowed
        && allowed.iter().any(|name| name.trim().is_empty())
    {
        return Err(ConfigError::ValidationError {
            field: "loader.allowed".to_owned(),
            message: "module names must not be empty".to_owned(),
        });
    }

    let mut seen = HashSet::new();
    for (index, entry) in config.loader.entries.iter().enumerate() {
        if entry.name.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: format!("loader.entries[{index}].name"),
                message: "module name must not be empty".to_owned(),
            });
        }
        let Some(id) = &entry.id else {
            continue;
        };
        if id.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: format!("loader.entries[{index}].id"),
                message: "id must not be empty; omit it instead".to_owned(),
            });
        }
        if !seen.insert(id.as_str()) {
            return Err(ConfigError::ValidationError {
                field: format!("loader.entries[{index}].id"),
                message: format!("duplicate entry id '{id}'"),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryConfig;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&SprigConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_unknown_level() {
        let mut config = SprigConfig::default();
        config.logging.level = "loud".into();
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == "logging.level"));
    }

    #[test]
    fn test_rejects_unknown_format() {
        let mut config = SprigConfig::default();
        config.logging.format = "xml".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let mut config = SprigConfig::default();
        config.loader.entries = vec![
            EntryConfig::new("a").with_id("x"),
            EntryConfig::new("b"),
            EntryConfig::new("c").with_id("x"),
        ];
        let err = validate(&config).unwrap_err();
        assert!(
            matches!(err, ConfigError::ValidationError { ref field, .. } if field == "loader.entries[2].id")
        );
    }

    #[test]
    fn test_anonymous_entries_may_repeat() {
        let mut config = SprigConfig::default();
        config.loader.entries = vec![EntryConfig::new("a"), EntryConfig::new("a")];
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_empty_name() {
        let mut config = SprigConfig::default();
        config.loader.entries = vec![EntryConfig::new(" ")];
        assert!(validate(&config).is_err());
    }
}
