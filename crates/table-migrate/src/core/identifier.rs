//! Identifier validation and quoting.
//!
//! Table and column names come from the source store (or from file names) and
//! end up inside dynamic SQL and file paths, so every name is checked once
//! before use and quoted by the dialect that emits it.

use crate::error::{MigrateError, Result};

/// Maximum identifier length (conservative limit across databases).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Reject empty names, null bytes and overlong names.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// A table name that is also used as a file stem: no separators, no `..`.
pub fn validate_file_table_name(name: &str) -> Result<()> {
    validate_identifier(name)?;
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(MigrateError::Config(format!(
            "Table name {:?} cannot be used as a file name",
            name
        )));
    }
    Ok(())
}

/// ANSI double-quoted identifier (`"name"`), used by SQLite and PostgreSQL.
pub fn quote_double(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Bracketed identifier (`[name]`), used for SQL Server over ODBC.
pub fn quote_bracket(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("bad\0name").is_err());
        assert!(validate_identifier(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_validate_file_table_name() {
        assert!(validate_file_table_name("hda_log").is_ok());
        assert!(validate_file_table_name("../etc").is_err());
        assert!(validate_file_table_name("a/b").is_err());
        assert!(validate_file_table_name("..").is_err());
    }

    #[test]
    fn test_quoting_escapes() {
        assert_eq!(quote_double("users"), "\"users\"");
        assert_eq!(quote_double("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_bracket("Order]s"), "[Order]]s]");
    }
}
