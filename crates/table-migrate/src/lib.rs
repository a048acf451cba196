//! # table-migrate
//!
//! Bulk table-to-table data migration between relational databases and
//! JSON/CSV files.
//!
//! - **Foreign key ordering**: parents are copied before the tables that
//!   reference them
//! - **Id remapping**: server-assigned keys are recorded per table and
//!   substituted into dependent foreign keys
//! - **Incremental runs**: DIFF mode skips rows the destination already has
//! - **Verification and reporting**: compare both ends after a run, render
//!   the statistics as HTML or JSON
//!
//! Endpoints are `tag:::locator` URLs: `dbms:::sqlite:app.db`,
//! `dbms:::postgres://user@host/db`, `dbms:::creator://<odbc connection string>`,
//! `jsonfile:::/path/to/dir`, `csvfile:::/path/to/dir`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use table_migrate::{Migration, MigrationOptions};
//!
//! #[tokio::main]
//! async fn main() -> table_migrate::Result<()> {
//!     let mut migration = Migration::new(
//!         "dbms:::sqlite:app.db",
//!         "jsonfile:::/tmp/export",
//!         MigrationOptions::default(),
//!         None,
//!     )
//!     .await?;
//!     let exceptions = migration.migrate(None, 10_000, Vec::new()).await?;
//!     println!("{} rows, {} exceptions", migration.stats().total_records_transferred, exceptions.len());
//!     migration.close().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod compare;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod logger;
pub mod migration;
pub mod report;
pub mod resolver;
pub mod stats;

pub use backend::{
    Backend, BackendCatalog, BackendContext, DbmsBackend, EndpointUrl, FileBackend, FileFormat,
    MigrateArgs, TableFilter,
};
pub use config::{CompareMode, MigrationOptions, RunConfig, TextEncoding, TransferMode};
pub use core::{Column, ForeignKey, LogicalType, Record, RowCursor, SqlDriver, SqlValue, TableMeta};
pub use error::{IntegrityKind, MigrateError, Result};
pub use logger::Logger;
pub use migration::Migration;
pub use report::{HtmlReport, ReportRenderer};
pub use stats::{MigrationStats, TableStats};
