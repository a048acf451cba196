//! Per-run migration statistics.
//!
//! One [`MigrationStats`] exists per run. The coordinator owns it and lends it
//! (`&mut`) to whichever endpoint is currently writing, so counters are
//! updated exactly once per chunk, on the writer side.

use std::collections::{BTreeMap, HashMap};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::config::TransferMode;
use crate::core::value::{Record, SqlValue};

/// Old primary key value to the value assigned by the destination.
pub type PkMap = HashMap<SqlValue, SqlValue>;

/// `table -> column -> (other table, other column)`.
pub type FkGraph = BTreeMap<String, BTreeMap<String, (String, String)>>;

/// Foreign key graph of the migrated tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TablesGraph {
    /// Outgoing edges: `T -> local column -> (referenced table, referenced column)`.
    pub fks: FkGraph,
    /// Incoming edges: `R -> referenced column -> (dependent table, local column)`.
    pub fks_rev: FkGraph,
}

/// Statistics of one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableStats {
    pub name: String,
    #[serde(serialize_with = "serialize_pk_map")]
    pub pk_map: PkMap,
    pub skipped: bool,
    pub records_transferred: u64,
    pub records_skipped: u64,
    pub total_records: u64,
    pub exceptions: Vec<String>,
    pub messages: Vec<String>,
    pub lst_records_transferred: Vec<Record>,
}

impl TableStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Statistics of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationStats {
    pub transfer_mode: TransferMode,
    pub source: String,
    pub destination: String,
    pub tables: BTreeMap<String, TableStats>,
    pub tables_graph: TablesGraph,
    pub exceptions: Vec<String>,
    pub messages: Vec<String>,
    pub total_records_transferred: u64,
    pub total_records_skipped: u64,
}

impl MigrationStats {
    /// Fresh statistics for a run from `source` to `destination`.
    pub fn new(
        transfer_mode: TransferMode,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            transfer_mode,
            source: source.into(),
            destination: destination.into(),
            ..Default::default()
        }
    }

    /// Stats of `name`, created with defaults on first access.
    pub fn table_mut(&mut self, name: &str) -> &mut TableStats {
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| TableStats::new(name))
    }

    pub fn table(&self, name: &str) -> Option<&TableStats> {
        self.tables.get(name)
    }

    /// Remapped ids of `table`, if any were recorded.
    pub fn pk_map(&self, table: &str) -> Option<&PkMap> {
        self.tables.get(table).map(|t| &t.pk_map)
    }

    /// Append an exception to the run and, when given, to the table.
    pub fn record_exception(&mut self, table: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        if let Some(table) = table {
            self.table_mut(table).exceptions.push(message.clone());
        }
        self.exceptions.push(message);
    }

    /// Append a message to the run and, when given, to the table.
    pub fn record_message(&mut self, table: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        if let Some(table) = table {
            self.table_mut(table).messages.push(message.clone());
        }
        self.messages.push(message);
    }

    /// Mark `table` as excluded from the run.
    pub fn mark_skipped(&mut self, table: &str, message: impl Into<String>) {
        self.table_mut(table).skipped = true;
        self.record_message(Some(table), message);
    }

    /// Account for one dumped chunk: `written` rows inserted, `skipped` rows
    /// left out by the DIFF predicate.
    ///
    /// Returns the progress line for the log.
    pub fn update_dump_stats(&mut self, table: &str, written: &[Record], skipped: usize) -> String {
        let diff = self.transfer_mode == TransferMode::Diff;
        let written_count = written.len() as u64;
        let skipped_count = skipped as u64;

        let tab = self.table_mut(table);
        if diff {
            tab.lst_records_transferred.extend_from_slice(written);
        }
        tab.records_transferred += written_count;
        tab.records_skipped += skipped_count;
        tab.total_records += written_count + skipped_count;
        let (tab_transferred, tab_skipped) = (tab.records_transferred, tab.records_skipped);

        self.total_records_transferred += written_count;
        self.total_records_skipped += skipped_count;

        format!(
            "{} paquets transferred/skipped {}, {} --- {} / {}",
            table,
            tab_transferred,
            tab_skipped,
            self.total_records_skipped,
            self.total_records_transferred
        )
    }

    /// Sum of per-table transferred counters.
    pub fn sum_tables_transferred(&self) -> u64 {
        self.tables.values().map(|t| t.records_transferred).sum()
    }

    /// Sum of per-table skipped counters.
    pub fn sum_tables_skipped(&self) -> u64 {
        self.tables.values().map(|t| t.records_skipped).sum()
    }

    /// Stats as a JSON value, the context handed to report templates.
    pub fn to_json(&self) -> crate::error::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn serialize_pk_map<S: Serializer>(map: &PkMap, serializer: S) -> Result<S::Ok, S::Error> {
    let mut entries: Vec<(String, &SqlValue)> =
        map.iter().map(|(k, v)| (k.to_string(), v)).collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let mut out = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        let value = value.to_json().map_err(serde::ser::Error::custom)?;
        out.serialize_entry(&key, &value)?;
    }
    out.end()
}
