//! Core abstractions shared by the engine, the backends and the drivers.
//!
//! - [`schema`]: table, column and foreign key metadata
//! - [`value`]: owned row values and records
//! - [`traits`]: the driver capability interface and SQL dialects
//! - [`identifier`]: identifier validation and quoting

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{Column, ForeignKey, LogicalType, TableMeta};
pub use traits::{Dialect, InsertResult, RowCursor, SqlDriver};
pub use value::{Record, SqlValue};
