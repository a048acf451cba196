//! SQL Server dialect, used for `creator://` ODBC connections.
//!
//! Parameters are bound as text. Blob columns go through
//! `CONVERT(VARBINARY(MAX), ?, 2)` so the hex text is decoded server-side.

use crate::core::identifier::quote_bracket;
use crate::core::schema::{Column, LogicalType};
use crate::core::traits::Dialect;

/// SQL Server has a hard limit of 2100 parameters per request.
const MAX_PARAMS: usize = 2100;

#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_bracket(name)
    }

    fn param_placeholder(&self, _index: usize, column: Option<&Column>) -> String {
        match column.map(|c| c.logical_type) {
            Some(LogicalType::Blob) => "CONVERT(VARBINARY(MAX), ?, 2)".to_string(),
            _ => "?".to_string(),
        }
    }

    fn supports_returning(&self) -> bool {
        false
    }

    fn max_bind_params(&self) -> usize {
        MAX_PARAMS - 1
    }

    fn build_last_ids(&self, table: &str, pk: &str, limit: usize) -> String {
        let pk = self.quote_ident(pk);
        format!(
            "SELECT TOP {} {pk} FROM {} ORDER BY {pk} DESC",
            limit,
            self.quote_ident(table)
        )
    }

    fn column_ddl(&self, column: &Column, single_pk: bool) -> String {
        if column.autoincrement && column.is_numeric() {
            let mut ddl = "BIGINT IDENTITY(1,1)".to_string();
            if single_pk && column.primary_key {
                ddl.push_str(" PRIMARY KEY");
            }
            return ddl;
        }

        // Key columns cannot be NVARCHAR(MAX).
        let text = if column.primary_key {
            "NVARCHAR(450)"
        } else {
            "NVARCHAR(MAX)"
        };
        let ty = match column.logical_type {
            LogicalType::Integer => "BIGINT",
            LogicalType::Float => "FLOAT",
            LogicalType::Numeric => "DECIMAL(38, 10)",
            LogicalType::Boolean | LogicalType::Bit => "BIT",
            LogicalType::Blob => "VARBINARY(MAX)",
            LogicalType::Date => "DATE",
            LogicalType::Time => "TIME",
            LogicalType::DateTime => "DATETIME2",
            LogicalType::DateTimeTz => "DATETIMEOFFSET",
            LogicalType::Uuid => "UNIQUEIDENTIFIER",
            LogicalType::Text | LogicalType::Json | LogicalType::Null => text,
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
    fn test_last_ids_use_top() {
        assert_eq!(
            MssqlDialect.build_last_ids("parent", "id", 3),
            "SELECT TOP 3 [id] FROM [parent] ORDER BY [id] DESC"
        );
    }

    #[test]
    fn test_blob_placeholder_converts_hex() {
        let table = TableMeta::new("files")
            .with_column(Column::new("name", "nvarchar"))
            .with_column(Column::new("data", "varbinary"));
        assert_eq!(
            MssqlDialect.build_insert(
                &table,
                &["name".to_string(), "data".to_string()],
                1,
                Some("id")
            ),
            "INSERT INTO [files] ([name], [data]) VALUES (?, CONVERT(VARBINARY(MAX), ?, 2))"
        );
    }

    #[test]
    fn test_create_table_identity() {
        let table = TableMeta::new("parent")
            .with_column(Column::new("id", "int").primary_key().autoincrement())
            .with_column(Column::new("flag", "boolean").not_null())
            .with_column(Column::untyped("note"));
        assert_eq!(
            MssqlDialect.build_create_table(&table),
            "CREATE TABLE [parent] ([id] BIGINT IDENTITY(1,1) PRIMARY KEY, [flag] BIT NOT NULL, [note] NVARCHAR(MAX))"
        );
    }
}
