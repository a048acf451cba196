//! Configuration validation.

use super::{MigrationOptions, RunConfig};
use crate::error::{MigrateError, Result};

/// Validate migration options.
pub fn validate_options(options: &MigrationOptions) -> Result<()> {
    if options.paquet == 0 {
        return Err(MigrateError::Config("paquet must be at least 1".into()));
    }
    options.text_encoding()?;
    if options.csv_delimiter == '\n' || options.csv_delimiter == '"' {
        return Err(MigrateError::Config(format!(
            "csv_delimiter cannot be {:?}",
            options.csv_delimiter
        )));
    }
    if !options.csv_delimiter.is_ascii() {
        return Err(MigrateError::Config(format!(
            "csv_delimiter must be a single ASCII character, got {:?}",
            options.csv_delimiter
        )));
    }
    Ok(())
}

/// Validate a run file. Endpoints may still come from the command line.
pub fn validate(config: &RunConfig) -> Result<()> {
    validate_options(&config.options)?;
    for (field, url) in [
        ("source", &config.source),
        ("destination", &config.destination),
    ] {
        if let Some(url) = url {
            if !url.contains(":::") {
                return Err(MigrateError::Config(format!(
                    "{} must have the form <backend>:::<locator>, got '{}'",
                    field, url
                )));
            }
        }
    }
    for pattern in &config.exclude {
        regex::Regex::new(pattern).map_err(|e| {
            MigrateError::Config(format!("invalid exclude pattern '{}': {}", pattern, e))
        })?;
    }
    Ok(())
}
