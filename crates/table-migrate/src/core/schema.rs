//! Table, column and foreign key metadata.
//!
//! Drivers translate their catalog into these types; the engine never looks at
//! native type names except to hand them back to the driver that produced them.

use serde::{Deserialize, Serialize};

/// Store-independent classification of a column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    Integer,
    Float,
    Numeric,
    Boolean,
    Text,
    Blob,
    Date,
    Time,
    DateTime,
    DateTimeTz,
    Uuid,
    Json,
    /// Vendor bit type (SQL Server `bit`), coerced to boolean on table creation.
    Bit,
    /// Untyped column, e.g. a file-backend shim. Coerced to text on table creation.
    Null,
}

impl LogicalType {
    /// Numeric columns are the only ones eligible for PK remapping.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            LogicalType::Integer | LogicalType::Float | LogicalType::Numeric
        )
    }

    /// Classify a native type name. Unknown names map to `Text`.
    pub fn from_native(native: &str) -> Self {
        let t = native.trim().to_lowercase();
        let base = t.split('(').next().unwrap_or("").trim();
        match base {
            "" | "null" => LogicalType::Null,
            "bit" => LogicalType::Bit,
            "bool" | "boolean" => LogicalType::Boolean,
            "int" | "int2" | "int4" | "int8" | "integer" | "smallint" | "bigint" | "tinyint"
            | "mediumint" | "serial" | "bigserial" | "smallserial" => LogicalType::Integer,
            "real" | "float" | "float4" | "float8" | "double" | "double precision" => {
                LogicalType::Float
            }
            "numeric" | "decimal" | "money" | "smallmoney" => LogicalType::Numeric,
            "blob" | "bytea" | "binary" | "varbinary" | "image" => LogicalType::Blob,
            "date" => LogicalType::Date,
            "time" | "time without time zone" => LogicalType::Time,
            "datetime" | "datetime2" | "smalldatetime" | "timestamp"
            | "timestamp without time zone" => LogicalType::DateTime,
            "timestamptz" | "timestamp with time zone" | "datetimeoffset" => {
                LogicalType::DateTimeTz
            }
            "uuid" | "uniqueidentifier" => LogicalType::Uuid,
            "json" | "jsonb" => LogicalType::Json,
            _ => LogicalType::Text,
        }
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Type name as reported by the store.
    pub native_type: String,
    /// Classified type.
    pub logical_type: LogicalType,
    /// Server assigns the value (identity, serial, SQLite rowid alias).
    pub autoincrement: bool,
    /// Part of the primary key.
    pub primary_key: bool,
    /// Accepts NULL.
    pub nullable: bool,
}

impl Column {
    /// Create a nullable, non-key column of the given native type.
    pub fn new(name: impl Into<String>, native_type: impl Into<String>) -> Self {
        let native_type = native_type.into();
        Self {
            name: name.into(),
            logical_type: LogicalType::from_native(&native_type),
            native_type,
            autoincrement: false,
            primary_key: false,
            nullable: true,
        }
    }

    /// Untyped column, as produced by the file backends.
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native_type: String::new(),
            logical_type: LogicalType::Null,
            autoincrement: false,
            primary_key: false,
            nullable: true,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn is_numeric(&self) -> bool {
        self.logical_type.is_numeric()
    }

    /// Numeric, autoincrement and primary key at once: the server owns its value.
    pub fn is_server_assigned_key(&self) -> bool {
        self.is_numeric() && self.autoincrement && self.primary_key
    }
}

/// Foreign key: `column` of the owning table references `ref_table.ref_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

impl ForeignKey {
    pub fn new(
        column: impl Into<String>,
        ref_table: impl Into<String>,
        ref_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            ref_table: ref_table.into(),
            ref_column: ref_column.into(),
        }
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<Column>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// All primary key columns in declaration order.
    pub fn pk_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// The primary key column, when the key has exactly one column.
    pub fn single_pk(&self) -> Option<&Column> {
        match self.pk_columns().as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// First primary key column, whatever the key width.
    pub fn first_pk(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// True for a multi-column key that includes an autoincrement column.
    pub fn has_composite_autoincrement_pk(&self) -> bool {
        let pks = self.pk_columns();
        pks.len() > 1 && pks.iter().any(|c| c.autoincrement)
    }

    /// The single autoincrement numeric PK whose ids get remapped, if any.
    pub fn remappable_pk(&self) -> Option<&Column> {
        self.single_pk()
            .filter(|c| c.is_numeric() && c.autoincrement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_type_from_native() {
        assert_eq!(LogicalType::from_native("INTEGER"), LogicalType::Integer);
        assert_eq!(LogicalType::from_native("int4"), LogicalType::Integer);
        assert_eq!(LogicalType::from_native("VARCHAR(255)"), LogicalType::Text);
        assert_eq!(LogicalType::from_native("numeric(10,2)"), LogicalType::Numeric);
        assert_eq!(LogicalType::from_native("bit"), LogicalType::Bit);
        assert_eq!(LogicalType::from_native(""), LogicalType::Null);
        assert_eq!(LogicalType::from_native("timestamptz"), LogicalType::DateTimeTz);
    }

    #[test]
    fn test_remappable_pk() {
        let t = TableMeta::new("parent")
            .with_column(Column::new("id", "INTEGER").primary_key().autoincrement())
            .with_column(Column::new("name", "TEXT"));
        assert_eq!(t.remappable_pk().map(|c| c.name.as_str()), Some("id"));
        assert!(t.columns[0].is_server_assigned_key());

        let text_pk = TableMeta::new("t")
            .with_column(Column::new("code", "TEXT").primary_key().autoincrement());
        assert!(text_pk.remappable_pk().is_none());
    }

    #[test]
    fn test_composite_autoincrement_pk() {
        let t = TableMeta::new("c")
            .with_column(Column::new("a", "INTEGER").primary_key().autoincrement())
            .with_column(Column::new("b", "INTEGER").primary_key());
        assert!(t.has_composite_autoincrement_pk());
        assert!(t.single_pk().is_none());
        assert!(t.remappable_pk().is_none());
        assert_eq!(t.first_pk().map(|c| c.name.as_str()), Some("a"));
    }
}
