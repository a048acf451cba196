//! DIFF predicates and record preparation for the relational write path.
//!
//! Every incoming row first gets its foreign keys rewritten through the
//! referenced tables' `pk_map`. In DIFF mode the remapped row is then checked
//! against the destination with the configured [`CompareMode`]; rows found
//! there are skipped, and their destination ids feed the table's `pk_map`.

use std::collections::HashMap;

use tracing::debug;

use crate::config::{CompareMode, MigrationOptions};
use crate::core::schema::{Column, TableMeta};
use crate::core::traits::SqlDriver;
use crate::core::value::{Record, SqlValue};
use crate::error::Result;
use crate::stats::{MigrationStats, PkMap};

/// Store-independent form of a tuple used for set membership.
///
/// Values are compared through their text rendering so that an integer read
/// from a JSON file matches the same integer read from a typed column.
pub type CompareKey = Vec<Option<String>>;

pub fn compare_key(values: &[SqlValue]) -> CompareKey {
    values.iter().map(SqlValue::to_text).collect()
}

/// Foreign key columns of one table and the `pk_map` of the table each references.
#[derive(Debug, Default)]
pub struct FkMappings<'a> {
    maps: Vec<(String, &'a PkMap)>,
}

impl<'a> FkMappings<'a> {
    /// Mappings for `table` from the current run statistics. Referenced
    /// tables without recorded ids contribute nothing.
    pub fn for_table(table: &TableMeta, stats: &'a MigrationStats) -> Self {
        let maps = table
            .foreign_keys
            .iter()
            .filter_map(|fk| {
                stats
                    .pk_map(&fk.ref_table)
                    .filter(|m| !m.is_empty())
                    .map(|m| (fk.column.clone(), m))
            })
            .collect();
        Self { maps }
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

/// Rewrite foreign key values through the referenced tables' `pk_map`.
/// Values with no entry are kept.
pub fn prepare_record(mut record: Record, mappings: &FkMappings<'_>) -> Record {
    for (column, pk_map) in &mappings.maps {
        let mapped = record.get(column).and_then(|v| pk_map.get(v)).cloned();
        if let Some(new_id) = mapped {
            record.insert(column.clone(), new_id);
        }
    }
    record
}

/// Drop every column that is numeric, autoincrement and primary key at once.
///
/// Columns unknown to `table` are dropped too, so the result only names
/// columns that exist at the destination.
pub fn clean_record(table: &TableMeta, record: &Record) -> Record {
    table
        .columns
        .iter()
        .filter(|c| !c.is_server_assigned_key())
        .filter_map(|c| record.get(&c.name).map(|v| (c.name.clone(), v.clone())))
        .collect()
}

/// Destination columns a compare mode looks at.
pub fn compare_columns(table: &TableMeta, mode: CompareMode) -> Vec<String> {
    let keep = |c: &&Column| match mode {
        CompareMode::PkInCache => c.primary_key,
        CompareMode::Full | CompareMode::FullCache => !c.is_server_assigned_key(),
        CompareMode::FullNoPk | CompareMode::FullCacheNoPk => !c.primary_key,
    };
    table
        .columns
        .iter()
        .filter(keep)
        .map(|c| c.name.clone())
        .collect()
}

/// Destination tuples of the table being written, each with the key of the
/// first destination row carrying it.
///
/// Only one table is held at a time: asking for another table (or another
/// projection) replaces the cached set.
#[derive(Debug, Default)]
pub struct DestinationCache {
    table: Option<String>,
    columns: Vec<String>,
    key_column: Option<String>,
    keys: HashMap<CompareKey, SqlValue>,
}

impl DestinationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the table currently cached.
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.table = None;
        self.columns.clear();
        self.key_column = None;
        self.keys = HashMap::new();
    }

    /// Cached projection of `table` on `columns`, loaded on first use.
    ///
    /// Each tuple maps to the `key_column` value of its destination row, or
    /// NULL when no key column is asked for.
    pub async fn load(
        &mut self,
        driver: &dyn SqlDriver,
        table: &TableMeta,
        columns: &[String],
        key_column: Option<&str>,
    ) -> Result<&HashMap<CompareKey, SqlValue>> {
        let stale = self.table.as_deref() != Some(table.name.as_str())
            || self.columns != columns
            || self.key_column.as_deref() != key_column;
        if stale {
            let keys = fetch_projection(driver, table, columns, key_column).await?;
            debug!(
                "cached {} destination tuples of {} on {:?}",
                keys.len(),
                table.name,
                columns
            );
            self.table = Some(table.name.clone());
            self.columns = columns.to_vec();
            self.key_column = key_column.map(String::from);
            self.keys = keys;
        }
        Ok(&self.keys)
    }
}

async fn fetch_projection(
    driver: &dyn SqlDriver,
    table: &TableMeta,
    columns: &[String],
    key_column: Option<&str>,
) -> Result<HashMap<CompareKey, SqlValue>> {
    if columns.is_empty() {
        return Ok(HashMap::new());
    }
    let mut selected = columns.to_vec();
    if let Some(key) = key_column {
        if !selected.iter().any(|c| c == key) {
            selected.push(key.to_string());
        }
    }
    let dialect = driver.dialect();
    let sql = format!(
        "SELECT {} FROM {}",
        selected
            .iter()
            .map(|c| dialect.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "),
        dialect.quote_ident(&table.name)
    );
    let rows = driver.query(&sql, &[]).await?;
    let mut keys = HashMap::with_capacity(rows.len());
    for row in &rows {
        let key = key_column
            .and_then(|k| row.get(k).cloned())
            .unwrap_or(SqlValue::Null);
        keys.entry(compare_key(&row.project(columns))).or_insert(key);
    }
    Ok(keys)
}

/// First destination row matching the given columns of `record`.
///
/// Returns `None` when nothing matches, else the row's `key_column` value
/// (NULL without a key column).
async fn find_row(
    driver: &dyn SqlDriver,
    table: &TableMeta,
    record: &Record,
    columns: &[String],
    key_column: Option<&str>,
) -> Result<Option<SqlValue>> {
    let conditions: Vec<(String, SqlValue)> = columns
        .iter()
        .filter_map(|c| record.get(c).map(|v| (c.clone(), v.clone())))
        .collect();
    let (sql, params) = driver.dialect().build_select_matching(table, &conditions);
    let rows = driver.query(&sql, &params).await?;
    Ok(rows.first().map(|row| {
        key_column
            .and_then(|k| row.get(k).cloned())
            .unwrap_or(SqlValue::Null)
    }))
}

/// A chunk after FK remapping and the DIFF predicate.
#[derive(Debug, Default)]
pub struct Prepared {
    /// Rows to insert, remapped, in source order.
    pub records: Vec<Record>,
    /// Rows left out because the destination already has them.
    pub skipped: usize,
    /// `(source id, destination id)` of skipped rows, for the table's `pk_map`.
    pub matched_ids: Vec<(SqlValue, SqlValue)>,
}

impl Prepared {
    fn skip(&mut self, record: &Record, key_column: Option<&str>, destination_id: SqlValue) {
        self.skipped += 1;
        if let Some(key) = key_column {
            match record.get(key) {
                Some(source_id) if !source_id.is_null() && !destination_id.is_null() => {
                    self.matched_ids.push((source_id.clone(), destination_id));
                }
                _ => {}
            }
        }
    }
}

/// Apply FK remapping and then the DIFF predicate (DIFF mode only) to a chunk.
///
/// Rows are compared after remapping, so a child matches the destination
/// copy of itself once its parents' ids are known. A skipped row whose
/// table has a remappable key reports the destination id it matched.
pub async fn prepare_records(
    records: Vec<Record>,
    table: &TableMeta,
    options: &MigrationOptions,
    cache: &mut DestinationCache,
    driver: &dyn SqlDriver,
    mappings: &FkMappings<'_>,
) -> Result<Prepared> {
    let remapped = records.into_iter().map(|r| prepare_record(r, mappings));
    if !options.is_diff() {
        return Ok(Prepared {
            records: remapped.collect(),
            ..Default::default()
        });
    }

    let mode = options.compare_mode;
    let columns = compare_columns(table, mode);
    let key_column = table.remappable_pk().map(|c| c.name.clone());
    let key_column = key_column.as_deref();
    let mut prepared = Prepared {
        records: Vec::with_capacity(remapped.len()),
        ..Default::default()
    };

    // A table with no compare columns never matches.
    if columns.is_empty() {
        prepared.records.extend(remapped);
        return Ok(prepared);
    }

    match mode {
        CompareMode::PkInCache | CompareMode::FullCache | CompareMode::FullCacheNoPk => {
            let present = cache.load(driver, table, &columns, key_column).await?;
            for record in remapped {
                match present.get(&compare_key(&record.project(&columns))) {
                    Some(id) => prepared.skip(&record, key_column, id.clone()),
                    None => prepared.records.push(record),
                }
            }
        }
        CompareMode::Full | CompareMode::FullNoPk => {
            for record in remapped {
                match find_row(driver, table, &record, &columns, key_column).await? {
                    Some(id) => prepared.skip(&record, key_column, id),
                    None => prepared.records.push(record),
                }
            }
        }
    }

    Ok(prepared)
}

/// Rows of `records` with no identical tuple at the destination.
///
/// Tuples leave out server-assigned keys, as in [`CompareMode::FullCache`].
pub async fn missing_records(
    records: &[Record],
    table: &TableMeta,
    cache: &mut DestinationCache,
    driver: &dyn SqlDriver,
) -> Result<Vec<Record>> {
    let columns = compare_columns(table, CompareMode::FullCache);
    let present = cache.load(driver, table, &columns, None).await?;
    Ok(records
        .iter()
        .filter(|r| !present.contains_key(&compare_key(&r.project(&columns))))
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferMode;
    use crate::core::schema::ForeignKey;

    fn child() -> TableMeta {
        TableMeta::new("child")
            .with_column(Column::new("id", "INTEGER").primary_key().autoincrement())
            .with_column(Column::new("parent_id", "INTEGER"))
            .with_column(Column::new("label", "TEXT"))
            .with_foreign_key(ForeignKey::new("parent_id", "parent", "id"))
    }

    fn row(id: i64, parent_id: i64, label: &str) -> Record {
        let mut r = Record::new();
        r.insert("id", id);
        r.insert("parent_id", parent_id);
        r.insert("label", label);
        r
    }

    #[test]
    fn test_clean_record_drops_server_assigned_key() {
        let cleaned = clean_record(&child(), &row(7, 1, "x"));
        assert_eq!(cleaned.columns().collect::<Vec<_>>(), vec!["parent_id", "label"]);
    }

    #[test]
    fn test_clean_record_keeps_non_numeric_key() {
        let table = TableMeta::new("codes")
            .with_column(Column::new("code", "TEXT").primary_key().autoincrement());
        let mut r = Record::new();
        r.insert("code", "A1");
        assert_eq!(clean_record(&table, &r).len(), 1);
    }

    #[test]
    fn test_prepare_record_remaps_known_ids_only() {
        let mut stats = MigrationStats::new(TransferMode::Full, "a", "b");
        stats
            .table_mut("parent")
            .pk_map
            .insert(SqlValue::Int(1), SqlValue::Int(11));
        let mappings = FkMappings::for_table(&child(), &stats);

        let remapped = prepare_record(row(1, 1, "x"), &mappings);
        assert_eq!(remapped.get("parent_id"), Some(&SqlValue::Int(11)));
        assert_eq!(remapped.get("id"), Some(&SqlValue::Int(1)));

        let kept = prepare_record(row(2, 5, "y"), &mappings);
        assert_eq!(kept.get("parent_id"), Some(&SqlValue::Int(5)));
    }

    #[test]
    fn test_fk_mappings_skip_unmapped_parents() {
        let stats = MigrationStats::new(TransferMode::Full, "a", "b");
        assert!(FkMappings::for_table(&child(), &stats).is_empty());
    }

    #[test]
    fn test_compare_columns_per_mode() {
        let t = child();
        assert_eq!(compare_columns(&t, CompareMode::PkInCache), vec!["id"]);
        assert_eq!(
            compare_columns(&t, CompareMode::Full),
            vec!["parent_id", "label"]
        );
        assert_eq!(
            compare_columns(&t, CompareMode::FullCacheNoPk),
            vec!["parent_id", "label"]
        );

        let natural = TableMeta::new("tags")
            .with_column(Column::new("tag", "TEXT").primary_key())
            .with_column(Column::new("weight", "INTEGER"));
        assert_eq!(compare_columns(&natural, CompareMode::FullCache), vec!["tag", "weight"]);
        assert_eq!(compare_columns(&natural, CompareMode::FullNoPk), vec!["weight"]);
    }

    #[test]
    fn test_compare_key_ignores_value_representation() {
        assert_eq!(
            compare_key(&[SqlValue::Int(3), SqlValue::Null]),
            compare_key(&[SqlValue::Text("3".into()), SqlValue::Null])
        );
    }

    #[test]
    fn test_destination_cache_starts_empty() {
        let cache = DestinationCache::new();
        assert!(cache.table().is_none());
        assert!(cache.is_empty());
    }
}
