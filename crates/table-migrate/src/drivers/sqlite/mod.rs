//! SQLite driver built on sqlx.
//!
//! Locators are sqlx URLs: `sqlite://relative.db`, `sqlite:///abs/path.db`,
//! `sqlite::memory:`. Missing database files are created.

mod dialect;

pub use dialect::SqliteDialect;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::error::ErrorKind;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as _, Row, TypeInfo, ValueRef};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::identifier::quote_double;
use crate::core::schema::{Column, ForeignKey, LogicalType, TableMeta};
use crate::core::traits::{Dialect, RowCursor, SqlDriver};
use crate::core::value::{Record, SqlValue};
use crate::error::{IntegrityKind, MigrateError, Result};

use super::log_statement;

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Connections per file database.
const MAX_CONNECTIONS: u32 = 4;

/// SQLite driver.
pub struct SqliteDriver {
    pool: SqlitePool,
    dialect: SqliteDialect,
    echo: bool,
}

impl SqliteDriver {
    /// Open (or create) the database at `url`.
    pub async fn connect(url: &str, echo: bool) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| MigrateError::Config(format!("Invalid SQLite URL '{}': {}", url, e)))?
            .create_if_missing(true);

        // Every connection to `:memory:` opens a fresh database, so keep exactly one alive.
        let in_memory = url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { MAX_CONNECTIONS })
            .acquire_timeout(POOL_CONNECTION_TIMEOUT);
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::pool(e, format!("opening SQLite database {}", url)))?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| MigrateError::pool(e, "testing SQLite connection"))?;

        info!("Connected to SQLite: {}", url);

        Ok(Self {
            pool,
            dialect: SqliteDialect::new(),
            echo,
        })
    }

    async fn primary_key_of(&self, table: &str) -> Result<Option<String>> {
        let sql = format!("PRAGMA table_info({})", quote_double(table));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        for row in rows {
            if row.try_get::<i64, _>("pk")? == 1 {
                return Ok(Some(row.try_get("name")?));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl SqlDriver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        let sql = "SELECT name FROM sqlite_master \
                   WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
                   ORDER BY name";
        log_statement(self.echo, self.name(), sql);
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>(0).map_err(MigrateError::from))
            .collect()
    }

    async fn load_table(&self, name: &str) -> Result<TableMeta> {
        let sql = format!("PRAGMA table_info({})", quote_double(name));
        log_statement(self.echo, self.name(), &sql);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::schema(name, e))?;
        if rows.is_empty() {
            return Err(MigrateError::schema(name, "table does not exist"));
        }

        let mut table = TableMeta::new(name);
        let mut pk_count = 0;
        for row in &rows {
            let col_name: String = row.try_get("name").map_err(|e| MigrateError::schema(name, e))?;
            let col_type: String = row.try_get("type").map_err(|e| MigrateError::schema(name, e))?;
            let not_null: i64 = row.try_get("notnull").map_err(|e| MigrateError::schema(name, e))?;
            let pk: i64 = row.try_get("pk").map_err(|e| MigrateError::schema(name, e))?;

            let mut column = Column::new(col_name, col_type);
            if pk > 0 {
                column = column.primary_key();
                pk_count += 1;
            } else if not_null != 0 {
                column = column.not_null();
            }
            table.columns.push(column);
        }

        // A lone INTEGER PRIMARY KEY aliases the rowid and is assigned by SQLite.
        if pk_count == 1 {
            if let Some(pk) = table.columns.iter_mut().find(|c| c.primary_key) {
                if pk.native_type.eq_ignore_ascii_case("INTEGER") {
                    pk.autoincrement = true;
                }
            }
        }

        let sql = format!("PRAGMA foreign_key_list({})", quote_double(name));
        log_statement(self.echo, self.name(), &sql);
        let fk_rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::schema(name, e))?;
        for row in fk_rows {
            let ref_table: String = row.try_get("table").map_err(|e| MigrateError::schema(name, e))?;
            let from: String = row.try_get("from").map_err(|e| MigrateError::schema(name, e))?;
            let to: Option<String> = row.try_get("to").map_err(|e| MigrateError::schema(name, e))?;
            let to = match to {
                Some(to) => to,
                None => self
                    .primary_key_of(&ref_table)
                    .await?
                    .unwrap_or_else(|| "rowid".to_string()),
            };
            table.foreign_keys.push(ForeignKey::new(from, ref_table, to));
        }

        debug!(
            "Loaded {} columns and {} foreign keys for {}",
            table.columns.len(),
            table.foreign_keys.len(),
            name
        );
        Ok(table)
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?
        .try_get(0)?;
        Ok(count > 0)
    }

    async fn select_all(&self, table: &TableMeta, chunk_size: usize) -> Result<RowCursor> {
        let sql = self.dialect.build_select_all(table);
        log_statement(self.echo, self.name(), &sql);

        let chunk_size = chunk_size.max(1);
        let (tx, rx) = mpsc::channel(RowCursor::BUFFERED_CHUNKS);
        let pool = self.pool.clone();

        let producer = tokio::spawn(async move {
            let mut rows = sqlx::query(&sql).fetch(&pool);
            let mut chunk = Vec::with_capacity(chunk_size);
            while let Some(row) = rows.next().await {
                match row {
                    Ok(row) => {
                        chunk.push(decode_row(&row));
                        if chunk.len() >= chunk_size
                            && tx.send(Ok(std::mem::take(&mut chunk))).await.is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(map_sqlx_error(e))).await;
                        return;
                    }
                }
            }
            if !chunk.is_empty() {
                let _ = tx.send(Ok(chunk)).await;
            }
        });

        Ok(RowCursor::new(rx, producer))
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
        log_statement(self.echo, self.name(), sql);
        let rows = params
            .iter()
            .fold(sqlx::query(sql), bind_value)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        log_statement(self.echo, self.name(), sql);
        let result = params
            .iter()
            .fold(sqlx::query(sql), bind_value)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Bytes(v) => query.bind(v.clone()),
        other => query.bind(other.to_text()),
    }
}

/// Translate constraint failures into typed integrity errors.
fn map_sqlx_error(err: sqlx::Error) -> MigrateError {
    let kind = match &err {
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::NotNullViolation => IntegrityKind::NotNull { column: None },
            ErrorKind::UniqueViolation => IntegrityKind::Unique,
            ErrorKind::ForeignKeyViolation => IntegrityKind::ForeignKey,
            ErrorKind::CheckViolation => IntegrityKind::Other,
            _ => return MigrateError::Database(err),
        },
        _ => return MigrateError::Database(err),
    };
    let message = match &err {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    };
    MigrateError::Integrity {
        table: String::new(),
        kind,
        message,
    }
}

fn decode_row(row: &SqliteRow) -> Record {
    let mut record = Record::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let logical = LogicalType::from_native(column.type_info().name());
        record.insert(column.name(), decode_value(row, idx, logical));
    }
    record
}

/// Decode by declared type first, then by whatever the cell actually stores:
/// SQLite columns accept any storage class.
fn decode_value(row: &SqliteRow, idx: usize, logical: LogicalType) -> SqlValue {
    let is_null = row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true);
    if is_null {
        return SqlValue::Null;
    }

    let typed = match logical {
        LogicalType::Boolean | LogicalType::Bit => {
            row.try_get::<bool, _>(idx).ok().map(SqlValue::Bool)
        }
        LogicalType::Date => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .ok()
            .map(SqlValue::Date),
        LogicalType::Time => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .ok()
            .map(SqlValue::Time),
        LogicalType::DateTime => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .ok()
            .map(SqlValue::DateTime),
        LogicalType::DateTimeTz => row
            .try_get::<chrono::DateTime<chrono::FixedOffset>, _>(idx)
            .ok()
            .map(SqlValue::DateTimeTz),
        LogicalType::Blob => row.try_get::<Vec<u8>, _>(idx).ok().map(SqlValue::Bytes),
        LogicalType::Float => row.try_get::<f64, _>(idx).ok().map(SqlValue::Float),
        _ => None,
    };

    typed.unwrap_or_else(|| decode_by_storage(row, idx))
}

fn decode_by_storage(row: &SqliteRow, idx: usize) -> SqlValue {
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return SqlValue::Int(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return SqlValue::Float(v);
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return SqlValue::Text(v);
    }
    row.try_get::<Vec<u8>, _>(idx)
        .map(SqlValue::Bytes)
        .unwrap_or(SqlValue::Null)
}
