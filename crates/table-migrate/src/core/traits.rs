//! Driver capability interface.
//!
//! The migration engine talks to relational stores only through these traits:
//!
//! - [`SqlDriver`]: table listing, metadata, batched reads and writes
//! - [`Dialect`]: SQL syntax strategy (quoting, placeholders, DDL types)
//! - [`RowCursor`]: chunked, ordered stream over a table
//!
//! Statement builders live on [`Dialect`] as default methods and
//! [`SqlDriver::insert_many`] is a template method on top of
//! [`SqlDriver::query`] and [`SqlDriver::execute`], so a new store only has to
//! supply connection handling, introspection and value conversion.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;

use super::schema::{Column, TableMeta};
use super::value::{Record, SqlValue};

/// Outcome of a multi-row insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertResult {
    /// Rows written.
    pub rows_affected: u64,
    /// Server-assigned ids in insertion order, when the statement returned them.
    pub inserted_ids: Option<Vec<SqlValue>>,
}

/// SQL syntax strategy for one store.
pub trait Dialect: Send + Sync {
    /// Get the dialect identifier (e.g., "sqlite", "postgres").
    fn name(&self) -> &str;

    /// Quote an identifier (table name, column name, etc.).
    fn quote_ident(&self, name: &str) -> String;

    /// Placeholder for the 1-based parameter `index` bound to `column`.
    fn param_placeholder(&self, index: usize, column: Option<&Column>) -> String;

    /// Whether `INSERT ... RETURNING` is available.
    fn supports_returning(&self) -> bool;

    /// DDL type for a column on table creation.
    fn column_ddl(&self, column: &Column, single_pk: bool) -> String;

    /// Most bind parameters one statement may carry.
    fn max_bind_params(&self) -> usize {
        32_766
    }

    /// `SELECT <all columns> FROM <table>`.
    fn build_select_all(&self, table: &TableMeta) -> String {
        let cols = table
            .columns
            .iter()
            .map(|c| self.quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let cols = if cols.is_empty() { "*".to_string() } else { cols };
        format!("SELECT {} FROM {}", cols, self.quote_ident(&table.name))
    }

    /// `SELECT <column> FROM <table>`.
    fn build_select_column(&self, table: &str, column: &str) -> String {
        format!(
            "SELECT {} FROM {}",
            self.quote_ident(column),
            self.quote_ident(table)
        )
    }

    /// Select rows matching every `(column, value)` pair; NULLs compare with `IS NULL`.
    ///
    /// Returns the SQL and the non-null parameters in placeholder order.
    fn build_select_matching(
        &self,
        table: &TableMeta,
        conditions: &[(String, SqlValue)],
    ) -> (String, Vec<SqlValue>) {
        let mut clauses = Vec::with_capacity(conditions.len());
        let mut params = Vec::new();
        for (column, value) in conditions {
            let quoted = self.quote_ident(column);
            if value.is_null() {
                clauses.push(format!("{} IS NULL", quoted));
            } else {
                params.push(value.clone());
                let placeholder = self.param_placeholder(params.len(), table.column(column));
                clauses.push(format!("{} = {}", quoted, placeholder));
            }
        }
        let mut sql = self.build_select_all(table);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        (sql, params)
    }

    /// `SELECT pk FROM t ORDER BY pk DESC LIMIT n`.
    fn build_last_ids(&self, table: &str, pk: &str, limit: usize) -> String {
        let pk = self.quote_ident(pk);
        format!(
            "SELECT {pk} FROM {} ORDER BY {pk} DESC LIMIT {}",
            self.quote_ident(table),
            limit
        )
    }

    /// Multi-row `INSERT` with one placeholder tuple per row.
    ///
    /// Without columns the statement is `INSERT ... DEFAULT VALUES`, which
    /// always inserts exactly one row.
    fn build_insert(
        &self,
        table: &TableMeta,
        columns: &[String],
        row_count: usize,
        returning: Option<&str>,
    ) -> String {
        if columns.is_empty() {
            let mut sql = format!("INSERT INTO {} DEFAULT VALUES", self.quote_ident(&table.name));
            if let Some(pk) = returning.filter(|_| self.supports_returning()) {
                sql.push_str(&format!(" RETURNING {}", self.quote_ident(pk)));
            }
            return sql;
        }

        let col_list = columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut idx = 0;
        let tuples = (0..row_count)
            .map(|_| {
                let row = columns
                    .iter()
                    .map(|c| {
                        idx += 1;
                        self.param_placeholder(idx, table.column(c))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({})", row)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.quote_ident(&table.name),
            col_list,
            tuples
        );
        if let Some(pk) = returning.filter(|_| self.supports_returning()) {
            sql.push_str(&format!(" RETURNING {}", self.quote_ident(pk)));
        }
        sql
    }

    /// `CREATE TABLE` from metadata. Foreign keys are not declared.
    fn build_create_table(&self, table: &TableMeta) -> String {
        let pks = table.pk_columns();
        let single_pk = pks.len() == 1;
        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                format!(
                    "{} {}",
                    self.quote_ident(&c.name),
                    self.column_ddl(c, single_pk)
                )
            })
            .collect();
        if pks.len() > 1 {
            defs.push(format!(
                "PRIMARY KEY ({})",
                pks.iter()
                    .map(|c| self.quote_ident(&c.name))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        format!(
            "CREATE TABLE {} ({})",
            self.quote_ident(&table.name),
            defs.join(", ")
        )
    }
}

/// Relational store access used by the `dbms` backend.
#[async_trait]
pub trait SqlDriver: Send + Sync {
    /// Driver identifier for logs and errors.
    fn name(&self) -> &str;

    /// SQL syntax of this store.
    fn dialect(&self) -> &dyn Dialect;

    /// All user tables, sorted by name.
    async fn table_names(&self) -> Result<Vec<String>>;

    /// Columns, primary key and foreign keys of one table.
    async fn load_table(&self, name: &str) -> Result<TableMeta>;

    async fn table_exists(&self, name: &str) -> Result<bool>;

    /// Create the table. Column types are taken from the dialect.
    async fn create_table(&self, table: &TableMeta) -> Result<()> {
        let sql = self.dialect().build_create_table(table);
        self.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Open a cursor over every row of `table`, yielding chunks of `chunk_size`.
    async fn select_all(&self, table: &TableMeta, chunk_size: usize) -> Result<RowCursor>;

    /// Run a row-returning statement.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>>;

    /// Run a statement and report the affected row count.
    ///
    /// Integrity violations are reported as `MigrateError::Integrity` with
    /// `table` set to the statement's target when known.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Insert `rows` (values in `columns` order) with a single statement.
    ///
    /// When `returning` names a column and the dialect supports it, the
    /// generated values of that column come back in `inserted_ids`.
    async fn insert_many(
        &self,
        table: &TableMeta,
        columns: &[String],
        rows: &[Vec<SqlValue>],
        returning: Option<&str>,
    ) -> Result<InsertResult> {
        if rows.is_empty() {
            return Ok(InsertResult::default());
        }
        let returning = returning.filter(|_| self.dialect().supports_returning());
        let rows_per_statement = if columns.is_empty() {
            1
        } else {
            (self.dialect().max_bind_params() / columns.len()).max(1)
        };

        let mut result = InsertResult {
            rows_affected: 0,
            inserted_ids: returning.map(|_| Vec::with_capacity(rows.len())),
        };
        for part in rows.chunks(rows_per_statement) {
            let sql = self
                .dialect()
                .build_insert(table, columns, part.len(), returning);
            let params: Vec<SqlValue> = part.iter().flatten().cloned().collect();

            match returning {
                Some(pk) => {
                    let returned = self.query(&sql, &params).await?;
                    result.rows_affected += returned.len() as u64;
                    if let Some(ids) = result.inserted_ids.as_mut() {
                        ids.extend(
                            returned
                                .iter()
                                .map(|r| r.get(pk).cloned().unwrap_or(SqlValue::Null)),
                        );
                    }
                }
                None => result.rows_affected += self.execute(&sql, &params).await?,
            }
        }
        Ok(result)
    }

    /// Release pooled connections.
    async fn close(&self);
}

/// Ordered stream of row chunks over one table.
///
/// Chunks are produced by a background task into a bounded channel, so at
/// most a couple of chunks are buffered ahead of the consumer. Dropping the
/// cursor aborts the producer and releases its connection.
pub struct RowCursor {
    rx: mpsc::Receiver<Result<Vec<Record>>>,
    producer: Option<JoinHandle<()>>,
}

impl RowCursor {
    /// Channel capacity between producer and consumer.
    pub const BUFFERED_CHUNKS: usize = 2;

    /// Wrap a receiver fed by `producer`.
    pub fn new(rx: mpsc::Receiver<Result<Vec<Record>>>, producer: JoinHandle<()>) -> Self {
        Self {
            rx,
            producer: Some(producer),
        }
    }

    /// Cursor over rows that are already in memory.
    pub fn from_rows(rows: Vec<Record>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let chunks: Vec<Vec<Record>> = rows
            .chunks(chunk_size)
            .map(|c| c.to_vec())
            .collect();
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            // Capacity covers every chunk, so this cannot fail.
            let _ = tx.try_send(Ok(chunk));
        }
        Self { rx, producer: None }
    }

    /// Next chunk; an empty vector once the table is exhausted.
    pub async fn fetch_many(&mut self) -> Result<Vec<Record>> {
        match self.rx.recv().await {
            Some(chunk) => chunk,
            None => Ok(Vec::new()),
        }
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}
