//! SQLite SQL dialect.

use crate::core::identifier::quote_double;
use crate::core::schema::{Column, LogicalType};
use crate::core::traits::Dialect;

/// SQLite dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_double(name)
    }

    fn param_placeholder(&self, _index: usize, _column: Option<&Column>) -> String {
        "?".to_string()
    }

    // Generated ids are read back with `ORDER BY pk DESC LIMIT n`; SQLite does
    // not guarantee the row order of `RETURNING`.
    fn supports_returning(&self) -> bool {
        false
    }

    fn column_ddl(&self, column: &Column, single_pk: bool) -> String {
        if single_pk && column.is_server_assigned_key() {
            return "INTEGER PRIMARY KEY AUTOINCREMENT".to_string();
        }

        let ty = match column.logical_type {
            LogicalType::Integer => "INTEGER",
            LogicalType::Float => "REAL",
            LogicalType::Numeric => "NUMERIC",
            LogicalType::Boolean | LogicalType::Bit => "BOOLEAN",
            LogicalType::Blob => "BLOB",
            LogicalType::Date => "DATE",
            LogicalType::Time => "TIME",
            LogicalType::DateTime | LogicalType::DateTimeTz => "DATETIME",
            LogicalType::Text | LogicalType::Uuid | LogicalType::Json | LogicalType::Null => {
                "TEXT"
            }
        };

        let mut ddl = ty.to_string();
        if single_pk && column.primary_key {
            ddl.push_str(" PRIMARY KEY");
        } else if !column.nullable {
            ddl.push_str(" NOT NULL");
        }
        ddl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::TableMeta;

    #[test]
    fn test_create_table_with_autoincrement_pk() {
        let table = TableMeta::new("parent")
            .with_column(Column::new("id", "INTEGER").primary_key().autoincrement())
            .with_column(Column::new("name", "VARCHAR(50)").not_null())
            .with_column(Column::untyped("note"));
        assert_eq!(
            SqliteDialect.build_create_table(&table),
            r#"CREATE TABLE "parent" ("id" INTEGER PRIMARY KEY AUTOINCREMENT, "name" TEXT NOT NULL, "note" TEXT)"#
        );
    }

    #[test]
    fn test_create_table_with_text_pk() {
        let table = TableMeta::new("tags").with_column(Column::new("tag", "TEXT").primary_key());
        assert_eq!(
            SqliteDialect.build_create_table(&table),
            r#"CREATE TABLE "tags" ("tag" TEXT PRIMARY KEY)"#
        );
    }

    #[test]
    fn test_insert_uses_positional_placeholders() {
        let table = TableMeta::new("t").with_column(Column::new("a", "INTEGER"));
        assert_eq!(
            SqliteDialect.build_insert(&table, &["a".to_string()], 2, Some("a")),
            r#"INSERT INTO "t" ("a") VALUES (?), (?)"#
        );
    }
}
