//! Table dump order from foreign key dependencies.
//!
//! Parents are emitted before the tables that reference them, so that a
//! parent's `pk_map` is complete before the first chunk of a dependent table
//! is remapped and inserted.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::core::schema::TableMeta;
use crate::stats::{FkGraph, TablesGraph};

/// Outcome of [`resolve_dump_order`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DumpOrder {
    /// Table names in a safe insertion order.
    pub tables: Vec<String>,
    /// Dependency graph to publish in the run statistics.
    pub graph: TablesGraph,
    /// Problems found while ordering: composite autoincrement keys, cycles.
    pub exceptions: Vec<String>,
}

/// Exception text for a composite primary key holding an autoincrement column.
pub(crate) fn composite_autoincrement_message(table: &str) -> String {
    format!(
        "Table {}: composite primary keys with an autoincrement column are not supported",
        table
    )
}

/// Order `tables` so that foreign key targets come first.
///
/// Foreign keys whose target is not part of `tables` are ignored. A
/// self-reference never blocks its own table. A cycle across several tables
/// is broken by emitting the head of the pending queue, and reported.
pub fn resolve_dump_order(tables: &[TableMeta]) -> DumpOrder {
    let mut exceptions = Vec::new();
    let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    let known: HashSet<&str> = names.iter().copied().collect();

    // T -> local column -> (referenced table, referenced column)
    let mut tables_fks: FkGraph = BTreeMap::new();
    // R -> referenced column -> (dependent table, local column)
    let mut fks_links: FkGraph = BTreeMap::new();

    for table in tables {
        if table.has_composite_autoincrement_pk() {
            exceptions.push(composite_autoincrement_message(&table.name));
        }

        for fk in &table.foreign_keys {
            if !known.contains(fk.ref_table.as_str()) {
                debug!(
                    "{}.{} references {} outside the migrated set",
                    table.name, fk.column, fk.ref_table
                );
                continue;
            }
            fks_links
                .entry(fk.ref_table.clone())
                .or_default()
                .insert(fk.ref_column.clone(), (table.name.clone(), fk.column.clone()));
            tables_fks
                .entry(table.name.clone())
                .or_default()
                .insert(fk.column.clone(), (fk.ref_table.clone(), fk.ref_column.clone()));
        }
    }

    let first_order: BTreeSet<&String> = fks_links
        .keys()
        .filter(|t| !tables_fks.contains_key(*t))
        .collect();

    let mut order: Vec<String> = first_order.iter().map(|t| (*t).clone()).collect();
    for name in &names {
        if !fks_links.contains_key(*name) && !tables_fks.contains_key(*name) {
            order.push((*name).to_string());
        }
    }

    let graph = TablesGraph {
        fks: tables_fks.clone(),
        fks_rev: fks_links
            .iter()
            .filter(|(t, _)| !first_order.contains(t))
            .map(|(t, links)| (t.clone(), links.clone()))
            .collect(),
    };

    let mut emitted: HashSet<String> = order.iter().cloned().collect();
    let mut pending: VecDeque<String> = names
        .iter()
        .filter(|t| !emitted.contains(**t))
        .filter(|t| fks_links.contains_key(**t) || tables_fks.contains_key(**t))
        .map(|t| (*t).to_string())
        .collect();

    // Remaining targets per table; shrinks as parents get emitted.
    let mut waiting: BTreeMap<String, BTreeSet<String>> = tables_fks
        .iter()
        .map(|(t, links)| {
            let targets = links.values().map(|(r, _)| r.clone()).collect();
            (t.clone(), targets)
        })
        .collect();

    while !pending.is_empty() {
        let mut progressed = false;

        for _ in 0..pending.len() {
            let Some(table) = pending.pop_front() else {
                break;
            };
            let targets = waiting.entry(table.clone()).or_default();
            targets.retain(|r| !emitted.contains(r) && *r != table);
            if targets.is_empty() {
                emitted.insert(table.clone());
                order.push(table);
                progressed = true;
            } else {
                pending.push_back(table);
            }
        }

        if !progressed {
            if let Some(head) = pending.pop_front() {
                let mut cycle: Vec<&str> = std::iter::once(head.as_str())
                    .chain(pending.iter().map(String::as_str))
                    .collect();
                cycle.sort_unstable();
                let message = format!(
                    "Foreign key cycle between tables {}; {} is inserted first",
                    cycle.join(", "),
                    head
                );
                warn!("{}", message);
                exceptions.push(message);
                emitted.insert(head.clone());
                order.push(head);
            }
        }
    }

    for table in tables_fks.keys() {
        if !emitted.contains(table) {
            emitted.insert(table.clone());
            order.push(table.clone());
        }
    }

    debug!("dump order: {:?}", order);

    DumpOrder {
        tables: order,
        graph,
        exceptions,
    }
}
