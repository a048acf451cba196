//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use table_migrate::core::traits::Dialect;
use table_migrate::drivers::{SqliteDialect, SqliteDriver};
use table_migrate::{
    IntegrityKind, MigrateError, Record, Result, RowCursor, SqlDriver, SqlValue, TableMeta,
};

/// `dbms` locator of a SQLite file inside `dir`.
pub fn sqlite_url(dir: &Path, name: &str) -> String {
    format!("sqlite://{}", dir.join(name).display())
}

/// Open `url` and run each statement.
pub async fn sqlite_exec(url: &str, statements: &[&str]) -> SqliteDriver {
    let driver = SqliteDriver::connect(url, false).await.unwrap();
    for sql in statements {
        driver.execute(sql, &[]).await.unwrap();
    }
    driver
}

pub async fn sqlite_rows(driver: &SqliteDriver, sql: &str) -> Vec<Record> {
    driver.query(sql, &[]).await.unwrap()
}

/// Text rendering of one column over `rows`.
pub fn column(rows: &[Record], name: &str) -> Vec<Option<String>> {
    rows.iter()
        .map(|r| r.get(name).and_then(SqlValue::to_text))
        .collect()
}

pub fn record(values: &[(&str, SqlValue)]) -> Record {
    values
        .iter()
        .map(|(c, v)| (c.to_string(), v.clone()))
        .collect()
}

/// In-memory driver over one table that records every statement.
///
/// The first `failures` executions fail with `<table>.<pk> may not be NULL`.
pub struct MockDriver {
    pub table: TableMeta,
    pub rows: Vec<Record>,
    pub statements: Mutex<Vec<String>>,
    pub failures: Mutex<usize>,
    dialect: SqliteDialect,
}

impl MockDriver {
    pub fn new(table: TableMeta, rows: Vec<Record>, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            table,
            rows,
            statements: Mutex::new(Vec::new()),
            failures: Mutex::new(failures),
            dialect: SqliteDialect::new(),
        })
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn inserts(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.starts_with("INSERT"))
            .collect()
    }
}

#[async_trait]
impl SqlDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        Ok(vec![self.table.name.clone()])
    }

    async fn load_table(&self, name: &str) -> Result<TableMeta> {
        if name == self.table.name {
            Ok(self.table.clone())
        } else {
            Err(MigrateError::schema(name, "no such table"))
        }
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(name == self.table.name)
    }

    async fn select_all(&self, _table: &TableMeta, chunk_size: usize) -> Result<RowCursor> {
        Ok(RowCursor::from_rows(self.rows.clone(), chunk_size))
    }

    async fn query(&self, sql: &str, _params: &[SqlValue]) -> Result<Vec<Record>> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(Vec::new())
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.statements.lock().unwrap().push(sql.to_string());
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            let pk = self
                .table
                .first_pk()
                .map(|c| c.name.clone())
                .unwrap_or_default();
            return Err(MigrateError::Integrity {
                table: self.table.name.clone(),
                kind: IntegrityKind::Other,
                message: format!("{}.{} may not be NULL", self.table.name, pk),
            });
        }
        Ok(params.len() as u64)
    }

    async fn close(&self) {}
}
