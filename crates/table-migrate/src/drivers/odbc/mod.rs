//! ODBC driver for `creator://` locators.
//!
//! The text after `creator://` is handed to the ODBC driver manager as a
//! connection string, unchanged. Statements use SQL Server syntax.
//!
//! ODBC calls are blocking, so each one runs on the blocking thread pool with
//! its own connection. Statements on one driver are serialized through an
//! async mutex; a `select_all` cursor uses a connection of its own.

mod dialect;

pub use dialect::MssqlDialect;

use std::sync::Arc;

use async_trait::async_trait;
use odbc_api::buffers::TextRowSet;
use odbc_api::{
    Connection, ConnectionOptions, Cursor, DataType, Environment, IntoParameter,
    ResultSetMetadata,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::core::schema::{Column, ForeignKey, LogicalType, TableMeta};
use crate::core::traits::{Dialect, RowCursor, SqlDriver};
use crate::core::value::{Record, SqlValue};
use crate::error::{IntegrityKind, MigrateError, Result};

use super::log_statement;

/// Rows fetched per ODBC round trip.
const FETCH_BATCH: usize = 1000;

/// Longest text value fetched, in bytes.
const MAX_TEXT_BYTES: usize = 65536;

/// ODBC driver.
pub struct OdbcDriver {
    env: Arc<Environment>,
    connection_string: Arc<str>,
    /// Serializes statements; ODBC handles are not shared between threads.
    conn_mutex: Mutex<()>,
    dialect: MssqlDialect,
    echo: bool,
}

impl OdbcDriver {
    /// Open the environment and check that `connection_string` connects.
    pub async fn connect(connection_string: &str, echo: bool) -> Result<Self> {
        let env = Environment::new().map_err(|e| {
            MigrateError::pool(
                format!(
                    "Failed to create ODBC environment: {}. Make sure an ODBC driver manager \
                     (unixODBC on Linux/macOS) and the database's ODBC driver are installed.",
                    e
                ),
                "ODBC connection",
            )
        })?;
        let env = Arc::new(env);
        let connection_string: Arc<str> = Arc::from(connection_string);

        let check_env = env.clone();
        let check_string = connection_string.clone();
        run_blocking(move || {
            let conn = open(&check_env, &check_string)?;
            conn.execute("SELECT 1", ()).map_err(map_odbc_error)?;
            Ok(())
        })
        .await?;

        info!("Connected via ODBC: {}", redact_connection_string(&connection_string));

        Ok(Self {
            env,
            connection_string,
            conn_mutex: Mutex::new(()),
            dialect: MssqlDialect::new(),
            echo,
        })
    }

    /// Run a row-returning statement and decode every row.
    async fn fetch(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
        log_statement(self.echo, self.name(), sql);
        let _lock = self.conn_mutex.lock().await;

        let env = self.env.clone();
        let connection_string = self.connection_string.clone();
        let sql = sql.to_string();
        let params = text_params(params);
        run_blocking(move || {
            let conn = open(&env, &connection_string)?;
            let params: Vec<_> = params.into_iter().map(|p| p.into_parameter()).collect();
            let mut records = Vec::new();
            if let Some(cursor) = conn
                .execute(&sql, params.as_slice())
                .map_err(map_odbc_error)?
            {
                drain_cursor(cursor, |chunk| {
                    records.extend(chunk);
                    true
                })?;
            }
            Ok(records)
        })
        .await
    }

    /// First column of every row, as text.
    async fn fetch_strings(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<String>> {
        Ok(self
            .fetch(sql, params)
            .await?
            .iter()
            .filter_map(|r| r.iter().next().and_then(|(_, v)| v.to_text()))
            .collect())
    }
}

#[async_trait]
impl SqlDriver for OdbcDriver {
    fn name(&self) -> &str {
        "odbc"
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        self.fetch_strings(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_TYPE = 'BASE TABLE' AND TABLE_SCHEMA = SCHEMA_NAME() \
             ORDER BY TABLE_NAME",
            &[],
        )
        .await
    }

    async fn load_table(&self, name: &str) -> Result<TableMeta> {
        let name_param = [SqlValue::from(name)];

        let columns_sql = r#"
            SELECT
                COLUMN_NAME,
                DATA_TYPE,
                CASE WHEN IS_NULLABLE = 'YES' THEN 1 ELSE 0 END,
                COLUMNPROPERTY(OBJECT_ID(QUOTENAME(TABLE_SCHEMA) + '.' + QUOTENAME(TABLE_NAME)),
                               COLUMN_NAME, 'IsIdentity')
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = SCHEMA_NAME() AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;
        let rows = self
            .fetch(columns_sql, &name_param)
            .await
            .map_err(|e| MigrateError::schema(name, e))?;
        if rows.is_empty() {
            return Err(MigrateError::schema(name, "table does not exist"));
        }

        let mut table = TableMeta::new(name);
        for row in &rows {
            let values: Vec<Option<String>> = row.iter().map(|(_, v)| v.to_text()).collect();
            let text = |i: usize| values.get(i).cloned().flatten().unwrap_or_default();
            let flag = |i: usize| matches!(text(i).as_str(), "1" | "true");

            let mut column = Column::new(text(0), text(1));
            column.nullable = flag(2);
            column.autoincrement = flag(3);
            table.columns.push(column);
        }

        let pk_sql = r#"
            SELECT c.COLUMN_NAME
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            INNER JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE c
                ON tc.CONSTRAINT_NAME = c.CONSTRAINT_NAME
                AND tc.TABLE_SCHEMA = c.TABLE_SCHEMA
                AND tc.TABLE_NAME = c.TABLE_NAME
            WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
                AND tc.TABLE_SCHEMA = SCHEMA_NAME()
                AND tc.TABLE_NAME = ?
            ORDER BY c.ORDINAL_POSITION
        "#;
        for pk in self.fetch_strings(pk_sql, &name_param).await? {
            if let Some(col) = table.columns.iter_mut().find(|c| c.name == pk) {
                col.primary_key = true;
                col.nullable = false;
            }
        }

        let fk_sql = r#"
            SELECT
                COL_NAME(fkc.parent_object_id, fkc.parent_column_id),
                OBJECT_NAME(fkc.referenced_object_id),
                COL_NAME(fkc.referenced_object_id, fkc.referenced_column_id)
            FROM sys.foreign_keys fk
            INNER JOIN sys.foreign_key_columns fkc ON fk.object_id = fkc.constraint_object_id
            WHERE fk.parent_object_id = OBJECT_ID(QUOTENAME(SCHEMA_NAME()) + '.' + QUOTENAME(?))
            ORDER BY fk.name, fkc.constraint_column_id
        "#;
        for row in self.fetch(fk_sql, &name_param).await? {
            let values: Vec<String> = row
                .iter()
                .map(|(_, v)| v.to_text().unwrap_or_default())
                .collect();
            if let [column, ref_table, ref_column] = values.as_slice() {
                table
                    .foreign_keys
                    .push(ForeignKey::new(column, ref_table, ref_column));
            }
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
        let found = self
            .fetch_strings(
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = SCHEMA_NAME() AND TABLE_NAME = ?",
                &[SqlValue::from(name)],
            )
            .await?;
        Ok(!found.is_empty())
    }

    async fn select_all(&self, table: &TableMeta, chunk_size: usize) -> Result<RowCursor> {
        let sql = self.dialect.build_select_all(table);
        log_statement(self.echo, self.name(), &sql);

        let chunk_size = chunk_size.max(1);
        let (tx, rx) = mpsc::channel(RowCursor::BUFFERED_CHUNKS);
        let env = self.env.clone();
        let connection_string = self.connection_string.clone();

        let producer = tokio::task::spawn_blocking(move || {
            let outcome = (|| -> Result<()> {
                let conn = open(&env, &connection_string)?;
                let Some(cursor) = conn.execute(&sql, ()).map_err(map_odbc_error)? else {
                    return Ok(());
                };
                let mut pending: Vec<Record> = Vec::with_capacity(chunk_size);
                let mut open_channel = true;
                drain_cursor(cursor, |rows| {
                    pending.extend(rows);
                    while pending.len() >= chunk_size {
                        let rest = pending.split_off(chunk_size);
                        let chunk = std::mem::replace(&mut pending, rest);
                        if tx.blocking_send(Ok(chunk)).is_err() {
                            open_channel = false;
                            return false;
                        }
                    }
                    true
                })?;
                if open_channel && !pending.is_empty() {
                    let _ = tx.blocking_send(Ok(pending));
                }
                Ok(())
            })();
            if let Err(e) = outcome {
                let _ = tx.blocking_send(Err(e));
            }
        });

        Ok(RowCursor::new(rx, producer))
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
        self.fetch(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        log_statement(self.echo, self.name(), sql);
        let _lock = self.conn_mutex.lock().await;

        let env = self.env.clone();
        let connection_string = self.connection_string.clone();
        let sql = sql.to_string();
        let params = text_params(params);
        run_blocking(move || {
            let conn = open(&env, &connection_string)?;
            let params: Vec<_> = params.into_iter().map(|p| p.into_parameter()).collect();
            let mut statement = conn.preallocate().map_err(map_odbc_error)?;
            statement
                .execute(&sql, params.as_slice())
                .map_err(map_odbc_error)?;
            let affected = statement.row_count().map_err(map_odbc_error)?;
            Ok(affected.unwrap_or(0) as u64)
        })
        .await
    }

    async fn close(&self) {
        // Connections are opened per statement and closed when dropped.
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| MigrateError::Odbc(format!("ODBC worker failed: {}", e)))?
}

fn open<'env>(env: &'env Environment, connection_string: &str) -> Result<Connection<'env>> {
    env.connect_with_connection_string(connection_string, ConnectionOptions::default())
        .map_err(|e| MigrateError::pool(e, "opening ODBC connection"))
}

/// Fetch the cursor in batches, handing decoded rows to `sink` until it
/// returns false or the result set ends.
fn drain_cursor(
    mut cursor: impl Cursor,
    mut sink: impl FnMut(Vec<Record>) -> bool,
) -> Result<()> {
    let num_cols = cursor.num_result_cols().map_err(map_odbc_error)?.max(0) as u16;
    let mut columns = Vec::with_capacity(num_cols as usize);
    for idx in 1..=num_cols {
        let name = cursor.col_name(idx).map_err(map_odbc_error)?;
        let data_type = cursor.col_data_type(idx).map_err(map_odbc_error)?;
        columns.push((name, logical_type(data_type)));
    }

    let mut buffers = TextRowSet::for_cursor(FETCH_BATCH, &mut cursor, Some(MAX_TEXT_BYTES))
        .map_err(map_odbc_error)?;
    let mut row_cursor = cursor.bind_buffer(&mut buffers).map_err(map_odbc_error)?;

    while let Some(batch) = row_cursor.fetch().map_err(map_odbc_error)? {
        let mut rows = Vec::with_capacity(batch.num_rows());
        for row_idx in 0..batch.num_rows() {
            let mut record = Record::with_capacity(columns.len());
            for (col_idx, (name, logical)) in columns.iter().enumerate() {
                let text = batch
                    .at(col_idx, row_idx)
                    .map(|bytes| String::from_utf8_lossy(bytes).to_string());
                record.insert(name.clone(), convert_text(text, *logical));
            }
            rows.push(record);
        }
        if !sink(rows) {
            break;
        }
    }
    Ok(())
}

fn logical_type(data_type: DataType) -> LogicalType {
    match data_type {
        DataType::Bit { .. } => LogicalType::Bit,
        DataType::TinyInt { .. }
        | DataType::SmallInt { .. }
        | DataType::Integer { .. }
        | DataType::BigInt { .. } => LogicalType::Integer,
        DataType::Real { .. } | DataType::Float { .. } | DataType::Double { .. } => {
            LogicalType::Float
        }
        DataType::Numeric { .. } | DataType::Decimal { .. } => LogicalType::Numeric,
        DataType::Binary { .. } | DataType::Varbinary { .. } | DataType::LongVarbinary { .. } => {
            LogicalType::Blob
        }
        DataType::Date { .. } => LogicalType::Date,
        DataType::Time { .. } => LogicalType::Time,
        DataType::Timestamp { .. } => LogicalType::DateTime,
        _ => LogicalType::Text,
    }
}

/// Convert fetched text back to a typed value. Unparseable text is kept as text.
fn convert_text(text: Option<String>, logical: LogicalType) -> SqlValue {
    let Some(s) = text else {
        return SqlValue::Null;
    };

    let parsed = match logical {
        LogicalType::Bit | LogicalType::Boolean => match s.as_str() {
            "1" | "true" | "True" | "TRUE" => Some(SqlValue::Bool(true)),
            "0" | "false" | "False" | "FALSE" => Some(SqlValue::Bool(false)),
            _ => None,
        },
        LogicalType::Integer => s.trim().parse::<i64>().ok().map(SqlValue::Int),
        LogicalType::Float => s.trim().parse::<f64>().ok().map(SqlValue::Float),
        LogicalType::Numeric => {
            let cleaned = s.replace(['$', ','], "");
            rust_decimal::Decimal::from_str_exact(&cleaned)
                .ok()
                .map(SqlValue::Decimal)
        }
        LogicalType::Blob => {
            let hex_str = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(&s);
            hex::decode(hex_str).ok().map(SqlValue::Bytes)
        }
        LogicalType::DateTime => chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f"))
            .ok()
            .map(SqlValue::DateTime),
        LogicalType::Date => chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .ok()
            .map(SqlValue::Date),
        LogicalType::Time => chrono::NaiveTime::parse_from_str(&s, "%H:%M:%S%.f")
            .ok()
            .map(SqlValue::Time),
        _ => None,
    };
    parsed.unwrap_or(SqlValue::Text(s))
}

fn text_params(params: &[SqlValue]) -> Vec<Option<String>> {
    params.iter().map(SqlValue::to_text).collect()
}

fn map_odbc_error(err: odbc_api::Error) -> MigrateError {
    let message = err.to_string();
    match classify_integrity(&message) {
        Some(kind) => MigrateError::Integrity {
            table: String::new(),
            kind,
            message,
        },
        None => MigrateError::Odbc(message),
    }
}

/// SQLSTATE 23000 is the ODBC integrity constraint class; SQL Server names
/// the constraint kind in the message text.
fn classify_integrity(message: &str) -> Option<IntegrityKind> {
    if !message.contains("23000") {
        return None;
    }
    if let Some(rest) = message.split("Cannot insert the value NULL into column '").nth(1) {
        let column = rest.split('\'').next().map(String::from);
        return Some(IntegrityKind::NotNull { column });
    }
    if message.contains("FOREIGN KEY") {
        Some(IntegrityKind::ForeignKey)
    } else if message.contains("PRIMARY KEY") || message.contains("duplicate key") {
        Some(IntegrityKind::Unique)
    } else {
        Some(IntegrityKind::Other)
    }
}

/// Hide `PWD=`/`Password=` values of a connection string.
fn redact_connection_string(connection_string: &str) -> String {
    connection_string
        .split(';')
        .map(|part| match part.split_once('=') {
            Some((key, _))
                if key.trim().eq_ignore_ascii_case("pwd")
                    || key.trim().eq_ignore_ascii_case("password") =>
            {
                format!("{}=***", key)
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}
