//! Error types for the migration library.

use regex::Regex;
use thiserror::Error;

/// Exit code for configuration errors (bad URL, unknown backend, bad option).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for command-line usage errors.
pub const EXIT_USAGE_ERROR: u8 = 2;
/// Exit code for database connection or query errors.
pub const EXIT_DATABASE_ERROR: u8 = 3;
/// Exit code for failures while transferring table data.
pub const EXIT_TRANSFER_ERROR: u8 = 5;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code when the run was interrupted.
pub const EXIT_CANCELLED: u8 = 130;

/// Sub-kind of an integrity violation reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityKind {
    /// A NOT NULL constraint failed. `column` is set when the driver reports it.
    NotNull { column: Option<String> },
    /// A unique or primary key constraint failed.
    Unique,
    /// A foreign key constraint failed.
    ForeignKey,
    /// Any other constraint failure.
    Other,
}

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (malformed URL, unknown backend tag, bad option)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The driver could not load a table's metadata
    #[error("Schema introspection failed for table {table}: {message}")]
    SchemaIntrospection { table: String, message: String },

    /// A construct the engine cannot migrate (composite autoincrement PK, non-serializable value)
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Constraint violation raised by the destination store
    #[error("Integrity error on table {table}: {message}")]
    Integrity {
        table: String,
        kind: IntegrityKind,
        message: String,
    },

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// PostgreSQL error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// ODBC error
    #[error("ODBC error: {0}")]
    Odbc(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Operation not implemented by a backend
    #[error("Operation '{operation}' is not supported by the {backend} backend")]
    NotSupported { backend: String, operation: String },

    /// Report rendering failed
    #[error("Report rendering failed: {0}")]
    Render(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a SchemaIntrospection error
    pub fn schema(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        MigrateError::SchemaIntrospection {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a NotSupported error
    pub fn not_supported(backend: impl Into<String>, operation: impl Into<String>) -> Self {
        MigrateError::NotSupported {
            backend: backend.into(),
            operation: operation.into(),
        }
    }

    /// Attach the table name to an integrity error raised without one.
    pub fn with_table(self, name: &str) -> Self {
        match self {
            MigrateError::Integrity {
                table,
                kind,
                message,
            } if table.is_empty() => MigrateError::Integrity {
                table: name.to_string(),
                kind,
                message,
            },
            other => other,
        }
    }

    /// True when this is a NOT NULL violation on `table.pk`.
    ///
    /// Drivers that report the failing column are matched on it; otherwise the
    /// message is searched for `<table>.<pk>` as a whole word, which covers
    /// SQLite (`NOT NULL constraint failed: t.id`) and the older
    /// `t.id may not be NULL` wording.
    pub fn is_null_pk_violation(&self, table: &str, pk: &str) -> bool {
        match self {
            MigrateError::Integrity {
                kind: IntegrityKind::NotNull { column },
                message,
                ..
            } => match column {
                Some(column) => column == pk,
                None => mentions_column(message, table, pk, r"(?:\W|$)"),
            },
            MigrateError::Integrity { message, .. } => {
                mentions_column(message, table, pk, r"\s+may not be NULL")
            }
            _ => false,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG_ERROR,
            MigrateError::Database(_)
            | MigrateError::Postgres(_)
            | MigrateError::Odbc(_)
            | MigrateError::Pool { .. }
            | MigrateError::SchemaIntrospection { .. } => EXIT_DATABASE_ERROR,
            MigrateError::Io(_) | MigrateError::Csv(_) | MigrateError::Json(_) => EXIT_IO_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Unsupported(_)
            | MigrateError::Integrity { .. }
            | MigrateError::Transfer { .. }
            | MigrateError::NotSupported { .. }
            | MigrateError::Render(_) => EXIT_TRANSFER_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Whether `message` names `table.column` after a non-word character and
/// right before `tail` (a regex fragment that must not start a word).
fn mentions_column(message: &str, table: &str, column: &str, tail: &str) -> bool {
    let pattern = format!(
        r"(?:^|\W){}\.{}{}",
        regex::escape(table),
        regex::escape(column),
        tail
    );
    Regex::new(&pattern)
        .map(|re| re.is_match(message))
        .unwrap_or(false)
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn not_null(column: Option<&str>, message: &str) -> MigrateError {
        MigrateError::Integrity {
            table: "X".into(),
            kind: IntegrityKind::NotNull {
                column: column.map(String::from),
            },
            message: message.into(),
        }
    }

    #[test]
    fn test_null_pk_violation_by_column() {
        assert!(not_null(Some("id"), "null value in column").is_null_pk_violation("X", "id"));
        assert!(!not_null(Some("name"), "null value in column").is_null_pk_violation("X", "id"));
    }

    #[test]
    fn test_null_pk_violation_by_message() {
        let err = not_null(None, "NOT NULL constraint failed: X.id");
        assert!(err.is_null_pk_violation("X", "id"));
        assert!(!err.is_null_pk_violation("Y", "id"));

        let legacy = MigrateError::Integrity {
            table: "X".into(),
            kind: IntegrityKind::Other,
            message: "X.id may not be NULL".into(),
        };
        assert!(legacy.is_null_pk_violation("X", "id"));
    }

    #[test]
    fn test_null_pk_violation_needs_whole_column_name() {
        let longer = not_null(None, "NOT NULL constraint failed: X.identifier");
        assert!(!longer.is_null_pk_violation("X", "id"));

        let prefixed = not_null(None, "NOT NULL constraint failed: AX.id");
        assert!(!prefixed.is_null_pk_violation("X", "id"));

        let qualified = not_null(None, "NOT NULL constraint failed: main.X.id");
        assert!(qualified.is_null_pk_violation("X", "id"));

        let legacy = MigrateError::Integrity {
            table: "X".into(),
            kind: IntegrityKind::Other,
            message: "X.identifier may not be NULL".into(),
        };
        assert!(!legacy.is_null_pk_violation("X", "id"));
    }

    #[test]
    fn test_other_errors_are_not_null_pk_violations() {
        assert!(!MigrateError::Config("x".into()).is_null_pk_violation("X", "id"));
        let unique = MigrateError::Integrity {
            table: "X".into(),
            kind: IntegrityKind::Unique,
            message: "UNIQUE constraint failed: X.id".into(),
        };
        assert!(!unique.is_null_pk_violation("X", "id"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("bad".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(MigrateError::Cancelled.exit_code(), EXIT_CANCELLED);
        assert_eq!(
            MigrateError::transfer("t", "boom").exit_code(),
            EXIT_TRANSFER_ERROR
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(MigrateError::from(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = MigrateError::pool("refused", "connecting");
        let text = err.format_detailed();
        assert!(text.starts_with("Error: Pool error: refused"));
        assert!(text.contains("Context: connecting"));
    }
}
