//! Migration endpoints.
//!
//! A [`Backend`] plays the source role (`migrate`, `compare`) or the
//! destination role (`dump`, `missing_records`) of a run. Endpoints are
//! addressed by `tag:::locator` URLs and built through the [`BackendCatalog`].
//!
//! - [`dbms`]: relational stores through a [`SqlDriver`](crate::core::SqlDriver)
//! - [`file`]: one JSON or CSV file per table

mod catalog;
pub mod dbms;
pub mod file;
mod url;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{MigrationOptions, DEFAULT_PAQUET};
use crate::core::schema::TableMeta;
use crate::core::value::Record;
use crate::drivers::redact;
use crate::error::{MigrateError, Result};
use crate::logger::Logger;
use crate::stats::{MigrationStats, TableStats};

pub use catalog::{BackendCatalog, BackendFactory};
pub use dbms::DbmsBackend;
pub use file::{FileBackend, FileFormat};
pub use url::{EndpointUrl, URL_DELIMITER};

/// Arguments of one `migrate` or `compare` call.
#[derive(Debug, Clone)]
pub struct MigrateArgs {
    /// Tables to migrate; `None` means every table of the source.
    pub tables: Option<Vec<String>>,
    /// Maximum rows per chunk.
    pub paquet: usize,
    /// Table name patterns to skip.
    pub exclude: Vec<String>,
    /// Checked between chunks.
    pub cancel: CancellationToken,
}

impl Default for MigrateArgs {
    fn default() -> Self {
        Self {
            tables: None,
            paquet: DEFAULT_PAQUET,
            exclude: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }
}

impl MigrateArgs {
    pub fn new(tables: Option<Vec<String>>, paquet: usize, exclude: Vec<String>) -> Self {
        Self {
            tables,
            paquet,
            exclude,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// `Err(Cancelled)` once the token fired.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        Ok(())
    }

    /// Chunk size, never zero.
    pub fn chunk_size(&self) -> usize {
        self.paquet.max(1)
    }
}

/// Exclusion patterns compiled to `^(?:(p1)|(p2)|...)`.
///
/// A table is excluded when a pattern matches at the start of its name.
#[derive(Debug, Clone)]
pub struct TableFilter {
    patterns: Vec<String>,
    regex: Option<Regex>,
}

impl TableFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let regex = if patterns.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = patterns.iter().map(|p| format!("({})", p)).collect();
            let source = format!("^(?:{})", alternatives.join("|"));
            Some(Regex::new(&source).map_err(|e| {
                MigrateError::Config(format!("invalid exclude patterns {:?}: {}", patterns, e))
            })?)
        };
        Ok(Self {
            patterns: patterns.to_vec(),
            regex,
        })
    }

    pub fn is_excluded(&self, table: &str) -> bool {
        self.regex.as_ref().is_some_and(|r| r.is_match(table))
    }

    /// Record and log the skip when `table` is excluded.
    pub fn skip(&self, table: &str, stats: &mut MigrationStats, logger: &Logger) -> bool {
        if !self.is_excluded(table) {
            return false;
        }
        let message = format!("skipped table {} as requested on {:?}", table, self.patterns);
        logger.log(&message);
        stats.mark_skipped(table, message);
        true
    }
}

/// Options and log sink handed to every backend of a run.
#[derive(Debug, Clone, Default)]
pub struct BackendContext {
    pub options: MigrationOptions,
    pub logger: Logger,
}

impl BackendContext {
    pub fn new(options: MigrationOptions, logger: Logger) -> Self {
        Self { options, logger }
    }
}

/// One endpoint of a migration.
///
/// Operations a backend does not provide fail with
/// [`MigrateError::NotSupported`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// Registry tag (`dbms`, `jsonfile`, `csvfile`).
    fn tag(&self) -> &str;

    /// Locator string this backend was opened with.
    fn path(&self) -> &str;

    fn options(&self) -> &MigrationOptions;

    fn logger(&self) -> &Logger;

    /// Source role: reset `stats`, then move every selected table to
    /// `destination`. Returns the run exceptions.
    async fn migrate(
        &mut self,
        destination: &mut dyn Backend,
        args: &MigrateArgs,
        stats: &mut MigrationStats,
    ) -> Result<Vec<String>> {
        self.init_migration(destination, stats);
        self.transfer(destination, args, stats).await?;
        info!(
            "migration {} -> {} done: {} transferred, {} skipped, {} exceptions",
            stats.source,
            stats.destination,
            stats.total_records_transferred,
            stats.total_records_skipped,
            stats.exceptions.len()
        );
        Ok(stats.exceptions.clone())
    }

    /// Backend-specific body of [`Backend::migrate`].
    async fn transfer(
        &mut self,
        _destination: &mut dyn Backend,
        _args: &MigrateArgs,
        _stats: &mut MigrationStats,
    ) -> Result<()> {
        Err(MigrateError::not_supported(self.tag(), "migrate"))
    }

    /// Destination role: write one chunk of `table`.
    async fn dump(
        &mut self,
        _records: Vec<Record>,
        _table: &TableMeta,
        _stats: &mut MigrationStats,
    ) -> Result<()> {
        Err(MigrateError::not_supported(self.tag(), "dump"))
    }

    /// Source role: rows of each selected table that `destination` lacks.
    async fn compare(
        &mut self,
        _destination: &mut dyn Backend,
        _args: &MigrateArgs,
    ) -> Result<BTreeMap<String, Vec<Record>>> {
        Err(MigrateError::not_supported(self.tag(), "compare"))
    }

    /// Destination role: the subset of `records` not present here.
    async fn missing_records(
        &mut self,
        _table: &TableMeta,
        _records: &[Record],
    ) -> Result<Vec<Record>> {
        Err(MigrateError::not_supported(self.tag(), "missing_records"))
    }

    /// Reset `stats` for a new run from this backend to `destination`.
    fn init_migration(&self, destination: &mut dyn Backend, stats: &mut MigrationStats) {
        *stats = MigrationStats::new(
            self.options().transfer_mode,
            redact(self.path()),
            redact(destination.path()),
        );
        destination.reset_dump_state();
    }

    /// Forget per-run destination state (caches, files already started).
    fn reset_dump_state(&mut self) {}

    /// Render the statistics of the last run to `path`.
    async fn report_last_migration(
        &self,
        stats: &MigrationStats,
        path: &Path,
        template: Option<&Path>,
    ) -> Result<()> {
        crate::report::write_report(stats, path, template)
    }

    /// Stats of `name`, created on first access.
    fn table_stats<'a>(&self, stats: &'a mut MigrationStats, name: &str) -> &'a mut TableStats {
        stats.table_mut(name)
    }

    /// Account for a dumped chunk and log the progress line.
    fn update_dump_stats(
        &self,
        stats: &mut MigrationStats,
        table: &str,
        written: &[Record],
        skipped: usize,
    ) {
        let line = stats.update_dump_stats(table, written, skipped);
        self.logger().log(&line);
    }

    /// Release connections.
    async fn close(&mut self) {}
}

/// Hand one chunk to the destination. A failure is recorded in the run and
/// table exceptions, logged and returned.
pub(crate) async fn forward_chunk(
    destination: &mut dyn Backend,
    records: Vec<Record>,
    table: &TableMeta,
    stats: &mut MigrationStats,
) -> Result<()> {
    if let Err(e) = destination.dump(records, table, stats).await {
        let message = format!(
            "Error dumping table [{}] on destination. Error details: {}",
            table.name, e
        );
        error!("{}", message);
        stats.record_exception(Some(&table.name), message);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_is_anchored_at_start() {
        let filter = TableFilter::new(&patterns(&["request*", "hda*"])).unwrap();
        assert!(filter.is_excluded("requests"));
        assert!(filter.is_excluded("hda_log"));
        assert!(!filter.is_excluded("users"));
        assert!(!filter.is_excluded("data"));
        assert!(!filter.is_excluded("old_requests"));
    }

    #[test]
    fn test_empty_filter_excludes_nothing() {
        let filter = TableFilter::new(&[]).unwrap();
        assert!(!filter.is_excluded("anything"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        assert!(matches!(
            TableFilter::new(&patterns(&["("])),
            Err(MigrateError::Config(_))
        ));
    }

    #[test]
    fn test_skip_records_message_on_table_and_run() {
        let filter = TableFilter::new(&patterns(&["tmp_"])).unwrap();
        let mut stats = MigrationStats::default();
        assert!(filter.skip("tmp_x", &mut stats, &Logger::new()));
        assert!(!filter.skip("users", &mut stats, &Logger::new()));

        let tab = stats.table("tmp_x").unwrap();
        assert!(tab.skipped);
        assert_eq!(tab.messages.len(), 1);
        assert_eq!(stats.messages, tab.messages);
        assert!(stats.table("users").is_none());
    }

    #[test]
    fn test_cancelled_args() {
        let args = MigrateArgs::default();
        assert!(args.check_cancelled().is_ok());
        args.cancel.cancel();
        assert!(matches!(args.check_cancelled(), Err(MigrateError::Cancelled)));
    }
}
