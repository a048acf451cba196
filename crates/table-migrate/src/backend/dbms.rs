//! Relational backend (`dbms:::<database url>`).
//!
//! As a source it walks the tables in foreign key order and streams each one
//! to the destination in chunks. As a destination it creates missing tables,
//! applies the DIFF predicate, rewrites foreign keys through the parents'
//! `pk_map` and records the ids the server assigns.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::{forward_chunk, Backend, BackendContext, MigrateArgs, TableFilter};
use crate::compare::{self, clean_record, prepare_records, DestinationCache, FkMappings};
use crate::config::MigrationOptions;
use crate::core::schema::{Column, LogicalType, TableMeta};
use crate::core::traits::{InsertResult, SqlDriver};
use crate::core::value::{Record, SqlValue};
use crate::drivers;
use crate::error::{MigrateError, Result};
use crate::logger::Logger;
use crate::resolver::{composite_autoincrement_message, resolve_dump_order};
use crate::stats::{MigrationStats, TablesGraph};

/// Backend over any [`SqlDriver`].
pub struct DbmsBackend {
    path: String,
    driver: Arc<dyn SqlDriver>,
    options: MigrationOptions,
    logger: Logger,
    cache: DestinationCache,
    unsupported_reported: HashSet<String>,
}

/// Tables in dump order with the graph and problems found while ordering.
struct Ordered {
    tables: Vec<TableMeta>,
    graph: TablesGraph,
    exceptions: Vec<String>,
}

impl DbmsBackend {
    /// Connect the driver selected by `locator`.
    pub async fn connect(locator: &str, ctx: BackendContext) -> Result<Self> {
        let driver = drivers::connect(locator, ctx.options.echo).await?;
        Ok(Self::with_driver(locator, driver, ctx))
    }

    /// Backend over an already connected driver.
    pub fn with_driver(
        path: impl Into<String>,
        driver: Arc<dyn SqlDriver>,
        ctx: BackendContext,
    ) -> Self {
        Self {
            path: path.into(),
            driver,
            options: ctx.options,
            logger: ctx.logger,
            cache: DestinationCache::new(),
            unsupported_reported: HashSet::new(),
        }
    }

    pub fn driver(&self) -> &Arc<dyn SqlDriver> {
        &self.driver
    }

    /// Load `tables` (or every table) and sort them parents first.
    async fn ordered_tables(&self, tables: Option<&[String]>) -> Result<Ordered> {
        let names = match tables {
            Some(names) if !names.is_empty() => names.to_vec(),
            _ => self.driver.table_names().await?,
        };

        let mut metas = Vec::with_capacity(names.len());
        for name in &names {
            let meta = self
                .driver
                .load_table(name)
                .await
                .map_err(|e| match e {
                    MigrateError::SchemaIntrospection { .. } => e,
                    other => MigrateError::schema(name.as_str(), other),
                })?;
            metas.push(meta);
        }

        let order = resolve_dump_order(&metas);
        let mut by_name: HashMap<String, TableMeta> =
            metas.into_iter().map(|m| (m.name.clone(), m)).collect();
        let tables = order
            .tables
            .iter()
            .filter_map(|name| by_name.remove(name))
            .collect();

        Ok(Ordered {
            tables,
            graph: order.graph,
            exceptions: order.exceptions,
        })
    }

    /// Create `table` at the destination when it is missing.
    ///
    /// Failures are recorded and logged; the following `table_exists` check
    /// in [`Backend::dump`] then leaves the chunk out and records the drop.
    async fn check_table(&self, table: &TableMeta, stats: &mut MigrationStats) {
        match self.driver.table_exists(&table.name).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                let message = format!(
                    "Error creating table [{}] on destination. Error details: {}",
                    table.name, e
                );
                error!("{}", message);
                stats.record_exception(Some(&table.name), message);
                return;
            }
        }

        let create = creatable(table);
        self.logger.log(&format!("creating table {}", table.name));
        match self.driver.create_table(&create).await {
            Ok(()) => self.logger.log(&format!("created table {}", table.name)),
            Err(e) => {
                let message = format!(
                    "Error creating table [{}] on destination. Error details: {}",
                    table.name, e
                );
                error!("{}", message);
                stats.record_exception(Some(&table.name), message);
            }
        }
    }

    /// Ids of the last `count` rows inserted in `table`, oldest first.
    async fn last_ids(&self, table: &str, pk: &str, count: usize) -> Result<Vec<SqlValue>> {
        let sql = self.driver.dialect().build_last_ids(table, pk, count);
        let rows = self.driver.query(&sql, &[]).await?;
        Ok(rows
            .iter()
            .rev()
            .map(|r| r.get(pk).cloned().unwrap_or(SqlValue::Null))
            .collect())
    }

    async fn insert(
        &self,
        table: &TableMeta,
        records: &[Record],
        returning: Option<&str>,
    ) -> Result<InsertResult> {
        let columns = insert_columns(table, records);
        let rows: Vec<Vec<SqlValue>> = records.iter().map(|r| r.project(&columns)).collect();
        self.driver
            .insert_many(table, &columns, &rows, returning)
            .await
            .map_err(|e| e.with_table(&table.name))
    }
}

/// Copy of `table` with types every dialect can create.
fn creatable(table: &TableMeta) -> TableMeta {
    let mut create = table.clone();
    for column in &mut create.columns {
        match column.logical_type {
            LogicalType::Null => {
                column.logical_type = LogicalType::Text;
                column.native_type = "TEXT".to_string();
            }
            LogicalType::Bit => column.logical_type = LogicalType::Boolean,
            _ => {}
        }
    }
    create
}

/// Destination columns named by at least one record, in table order.
fn insert_columns(table: &TableMeta, records: &[Record]) -> Vec<String> {
    table
        .columns
        .iter()
        .filter(|c| records.iter().any(|r| r.contains(&c.name)))
        .map(|c| c.name.clone())
        .collect()
}

/// Restrict `record` to the columns of `table`.
fn known_columns(table: &TableMeta, record: &Record) -> Record {
    table
        .columns
        .iter()
        .filter_map(|c| record.get(&c.name).map(|v| (c.name.clone(), v.clone())))
        .collect()
}

/// Foreign keys of the destination table plus those only the source declares.
///
/// Tables created by this backend carry no constraints, so the source
/// metadata is the only place their references are known.
fn with_source_foreign_keys(destination: &TableMeta, source: &TableMeta) -> TableMeta {
    let mut view = destination.clone();
    for fk in &source.foreign_keys {
        if !view.foreign_keys.iter().any(|f| f.column == fk.column) {
            view.foreign_keys.push(fk.clone());
        }
    }
    view
}

#[async_trait]
impl Backend for DbmsBackend {
    fn tag(&self) -> &str {
        "dbms"
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn options(&self) -> &MigrationOptions {
        &self.options
    }

    fn logger(&self) -> &Logger {
        &self.logger
    }

    async fn transfer(
        &mut self,
        destination: &mut dyn Backend,
        args: &MigrateArgs,
        stats: &mut MigrationStats,
    ) -> Result<()> {
        let filter = TableFilter::new(&args.exclude)?;
        let ordered = match self.ordered_tables(args.tables.as_deref()).await {
            Ok(ordered) => ordered,
            Err(e) => {
                let table = match &e {
                    MigrateError::SchemaIntrospection { table, .. } => Some(table.clone()),
                    _ => None,
                };
                error!("{}", e);
                stats.record_exception(table.as_deref(), e.to_string());
                return Err(e);
            }
        };

        stats.tables_graph = ordered.graph;
        for message in ordered.exceptions {
            warn!("{}", message);
            stats.record_exception(None, message);
        }

        for table in &ordered.tables {
            if filter.skip(&table.name, stats, &self.logger) {
                continue;
            }

            self.logger.log(&format!("\n\nmigrating {}", table.name));
            stats.table_mut(&table.name);

            let mut cursor = self.driver.select_all(table, args.chunk_size()).await?;
            self.logger.log("Transferring records");
            loop {
                args.check_cancelled()?;
                let records = cursor.fetch_many().await?;
                debug!("records to transfer: {}", records.len());
                if records.is_empty() {
                    break;
                }
                forward_chunk(destination, records, table, stats).await?;
            }
        }
        Ok(())
    }

    async fn dump(
        &mut self,
        records: Vec<Record>,
        source_table: &TableMeta,
        stats: &mut MigrationStats,
    ) -> Result<()> {
        let name = source_table.name.clone();
        self.check_table(source_table, stats).await;
        stats.table_mut(&name);

        if records.is_empty() {
            return Ok(());
        }
        if !self.driver.table_exists(&name).await? {
            let message = format!(
                "Table [{}] is missing on destination; {} records were not written",
                name,
                records.len()
            );
            error!("{}", message);
            stats.record_exception(Some(&name), message);
            return Ok(());
        }

        let table = self.driver.load_table(&name).await?;
        let composite = table.has_composite_autoincrement_pk();
        if composite && self.unsupported_reported.insert(name.clone()) {
            let message = composite_autoincrement_message(&name);
            warn!("{}", message);
            if stats.exceptions.contains(&message) {
                stats.table_mut(&name).exceptions.push(message);
            } else {
                stats.record_exception(Some(&name), message);
            }
        }
        let pk: Option<Column> = table.remappable_pk().cloned();

        let fk_view = with_source_foreign_keys(&table, source_table);
        let prepared = {
            let mappings = FkMappings::for_table(&fk_view, stats);
            prepare_records(
                records,
                &table,
                &self.options,
                &mut self.cache,
                self.driver.as_ref(),
                &mappings,
            )
            .await?
        };

        if !prepared.matched_ids.is_empty() {
            let pk_map = &mut stats.table_mut(&name).pk_map;
            for (old, new) in &prepared.matched_ids {
                pk_map.insert(old.clone(), new.clone());
            }
        }

        let originals: Vec<Record> = prepared
            .records
            .iter()
            .map(|r| known_columns(&table, r))
            .collect();
        let records_id: Vec<SqlValue> = match &pk {
            Some(pk) => originals
                .iter()
                .map(|r| r.get(&pk.name).cloned().unwrap_or(SqlValue::Null))
                .collect(),
            None => Vec::new(),
        };
        let cleaned: Vec<Record> = if composite {
            originals.clone()
        } else {
            originals.iter().map(|r| clean_record(&table, r)).collect()
        };

        let returning = pk.as_ref().map(|c| c.name.as_str());
        let mut retried = false;
        let inserted = if cleaned.is_empty() {
            InsertResult::default()
        } else {
            match self.insert(&table, &cleaned, returning).await {
                Ok(result) => result,
                Err(e) => match &pk {
                    Some(pk) if e.is_null_pk_violation(&name, &pk.name) => {
                        warn!(
                            "{}.{} was not assigned by the server, retrying with source ids: {}",
                            name, pk.name, e
                        );
                        retried = true;
                        self.insert(&table, &originals, None).await.map_err(|e| {
                            error!("{}", e);
                            e
                        })?
                    }
                    _ => {
                        error!("{}", e);
                        return Err(e);
                    }
                },
            }
        };

        if let Some(pk) = &pk {
            if !cleaned.is_empty() {
                let new_ids = if retried {
                    records_id.clone()
                } else {
                    match inserted.inserted_ids {
                        Some(ids) if ids.len() == records_id.len() => ids,
                        _ => self.last_ids(&name, &pk.name, cleaned.len()).await?,
                    }
                };
                let pk_map = &mut stats.table_mut(&name).pk_map;
                for (old, new) in records_id.into_iter().zip(new_ids) {
                    if !old.is_null() {
                        pk_map.insert(old, new);
                    }
                }
            }
        }

        let written = if retried { &originals } else { &cleaned };
        self.update_dump_stats(stats, &name, written, prepared.skipped);
        Ok(())
    }

    async fn compare(
        &mut self,
        destination: &mut dyn Backend,
        args: &MigrateArgs,
    ) -> Result<BTreeMap<String, Vec<Record>>> {
        let filter = TableFilter::new(&args.exclude)?;
        let ordered = self.ordered_tables(args.tables.as_deref()).await?;

        let mut missing = BTreeMap::new();
        for table in &ordered.tables {
            if filter.is_excluded(&table.name) {
                debug!("not checking excluded table {}", table.name);
                continue;
            }
            self.logger.log(&format!("checking records of {}", table.name));
            let rows: &mut Vec<Record> = missing.entry(table.name.clone()).or_default();

            let mut cursor = self.driver.select_all(table, args.chunk_size()).await?;
            loop {
                args.check_cancelled()?;
                let records = cursor.fetch_many().await?;
                if records.is_empty() {
                    break;
                }
                rows.extend(destination.missing_records(table, &records).await?);
            }
        }
        Ok(missing)
    }

    async fn missing_records(
        &mut self,
        table: &TableMeta,
        records: &[Record],
    ) -> Result<Vec<Record>> {
        if !self.driver.table_exists(&table.name).await? {
            return Ok(records.to_vec());
        }
        let destination = self.driver.load_table(&table.name).await?;
        compare::missing_records(records, &destination, &mut self.cache, self.driver.as_ref()).await
    }

    fn reset_dump_state(&mut self) {
        self.cache.clear();
        self.unsupported_reported.clear();
    }

    async fn close(&mut self) {
        self.driver.close().await;
    }
}
