//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;
pub use validation::validate_options;

use crate::error::Result;
use std::path::Path;

impl RunConfig {
    /// Load a run description from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a run description from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RunConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl MigrationOptions {
    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        validation::validate_options(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrateError;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "source: \"jsonfile:::in\"").unwrap();
        writeln!(file, "destination: \"jsonfile:::out\"").unwrap();
        writeln!(file, "tables: [users]").unwrap();
        let cfg = RunConfig::load(file.path()).unwrap();
        assert_eq!(cfg.tables, vec!["users".to_string()]);
        assert_eq!(cfg.options.paquet, DEFAULT_PAQUET);
    }

    #[test]
    fn test_invalid_yaml_is_yaml_error() {
        let err = RunConfig::from_yaml("source: [").unwrap_err();
        assert!(matches!(err, MigrateError::Yaml(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = RunConfig::load("/nonexistent/run.yaml").unwrap_err();
        assert!(matches!(err, MigrateError::Io(_)));
    }
}
