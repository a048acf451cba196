//! PostgreSQL SQL dialect.
//!
//! Parameters are always sent as text and cast server-side to the column's
//! type (`$1::text::int4`), so one `Option<String>` encoding serves every
//! column type.

use crate::core::identifier::quote_double;
use crate::core::schema::{Column, LogicalType};
use crate::core::traits::Dialect;

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_double(name)
    }

    fn param_placeholder(&self, index: usize, column: Option<&Column>) -> String {
        match column.map(|c| c.native_type.trim()).filter(|t| !t.is_empty()) {
            Some(native) => format!("${}::text::{}", index, native),
            None => format!("${}::text", index),
        }
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn max_bind_params(&self) -> usize {
        65_535
    }

    fn column_ddl(&self, column: &Column, single_pk: bool) -> String {
        if column.autoincrement && column.is_numeric() {
            let mut ddl = "BIGINT GENERATED BY DEFAULT AS IDENTITY".to_string();
            if single_pk && column.primary_key {
                ddl.push_str(" PRIMARY KEY");
            }
            return ddl;
        }

        let ty = match column.logical_type {
            LogicalType::Integer => "BIGINT",
            LogicalType::Float => "DOUBLE PRECISION",
            LogicalType::Numeric => "NUMERIC",
            LogicalType::Boolean | LogicalType::Bit => "BOOLEAN",
            LogicalType::Blob => "BYTEA",
            LogicalType::Date => "DATE",
            LogicalType::Time => "TIME",
            LogicalType::DateTime => "TIMESTAMP",
            LogicalType::DateTimeTz => "TIMESTAMPTZ",
            LogicalType::Uuid => "UUID",
            LogicalType::Json => "JSONB",
            LogicalType::Text | LogicalType::Null => "TEXT",
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
    use crate::core::value::SqlValue;

    #[test]
    fn test_placeholder_casts_through_text() {
        let col = Column::new("id", "int4");
        assert_eq!(PostgresDialect.param_placeholder(3, Some(&col)), "$3::text::int4");
        assert_eq!(PostgresDialect.param_placeholder(1, None), "$1::text");
    }

    #[test]
    fn test_insert_returning() {
        let table = TableMeta::new("parent")
            .with_column(Column::new("id", "int8").primary_key().autoincrement())
            .with_column(Column::new("name", "varchar"));
        assert_eq!(
            PostgresDialect.build_insert(&table, &["name".to_string()], 2, Some("id")),
            r#"INSERT INTO "parent" ("name") VALUES ($1::text::varchar), ($2::text::varchar) RETURNING "id""#
        );
    }

    #[test]
    fn test_select_matching_numbers_non_null_params() {
        let table = TableMeta::new("t")
            .with_column(Column::new("a", "int4"))
            .with_column(Column::new("b", "text"));
        let (sql, params) = PostgresDialect.build_select_matching(
            &table,
            &[("a".into(), SqlValue::Null), ("b".into(), SqlValue::from("x"))],
        );
        assert_eq!(
            sql,
            r#"SELECT "a", "b" FROM "t" WHERE "a" IS NULL AND "b" = $1::text::text"#
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_create_table_identity() {
        let table = TableMeta::new("parent")
            .with_column(Column::new("id", "INTEGER").primary_key().autoincrement())
            .with_column(Column::new("flag", "bit"))
            .with_column(Column::untyped("note"));
        assert_eq!(
            PostgresDialect.build_create_table(&table),
            r#"CREATE TABLE "parent" ("id" BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY, "flag" BOOLEAN, "note" TEXT)"#
        );
    }
}
