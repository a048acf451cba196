//! Migration coordinator: one source, one destination, one stats record.

use std::collections::BTreeMap;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backend::{Backend, BackendCatalog, BackendContext, MigrateArgs};
use crate::config::MigrationOptions;
use crate::core::value::Record;
use crate::error::{MigrateError, Result};
use crate::logger::Logger;
use crate::stats::MigrationStats;

/// A source/destination pair and the statistics of its last run.
pub struct Migration {
    source: Box<dyn Backend>,
    destination: Box<dyn Backend>,
    stats: MigrationStats,
    last_migration_args: Option<MigrateArgs>,
    cancel: CancellationToken,
}

impl Migration {
    /// Open both endpoints through the built-in backends.
    pub async fn new(
        source_url: &str,
        destination_url: &str,
        options: MigrationOptions,
        logger: Option<Logger>,
    ) -> Result<Self> {
        Self::with_catalog(
            &BackendCatalog::with_builtins(),
            source_url,
            destination_url,
            options,
            logger,
        )
        .await
    }

    /// Open both endpoints through `catalog`, with identical options.
    pub async fn with_catalog(
        catalog: &BackendCatalog,
        source_url: &str,
        destination_url: &str,
        options: MigrationOptions,
        logger: Option<Logger>,
    ) -> Result<Self> {
        options.validate()?;
        let ctx = BackendContext::new(options, logger.unwrap_or_default());
        let source = catalog.open(source_url, ctx.clone()).await?;
        let destination = match catalog.open(destination_url, ctx).await {
            Ok(destination) => destination,
            Err(e) => {
                let mut source = source;
                source.close().await;
                return Err(e);
            }
        };
        Ok(Self::from_backends(source, destination))
    }

    /// Coordinator over already built endpoints.
    pub fn from_backends(source: Box<dyn Backend>, destination: Box<dyn Backend>) -> Self {
        Self {
            source,
            destination,
            stats: MigrationStats::default(),
            last_migration_args: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort runs between chunks once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Move `tables` (all when `None`) from source to destination.
    ///
    /// Returns the run exceptions; the full record stays in [`Self::stats`].
    pub async fn migrate(
        &mut self,
        tables: Option<Vec<String>>,
        paquet: usize,
        exclude: Vec<String>,
    ) -> Result<Vec<String>> {
        if paquet == 0 {
            return Err(MigrateError::Config("paquet must be at least 1".into()));
        }
        let args =
            MigrateArgs::new(tables, paquet, exclude).with_cancellation(self.cancel.clone());
        self.last_migration_args = Some(args.clone());
        info!(
            "migrating {} -> {}",
            crate::drivers::redact(self.source.path()),
            crate::drivers::redact(self.destination.path())
        );
        self.source
            .migrate(self.destination.as_mut(), &args, &mut self.stats)
            .await
    }

    pub fn stats(&self) -> &MigrationStats {
        &self.stats
    }

    pub fn last_migration_args(&self) -> Option<&MigrateArgs> {
        self.last_migration_args.as_ref()
    }

    pub fn source(&self) -> &dyn Backend {
        self.source.as_ref()
    }

    pub fn destination(&self) -> &dyn Backend {
        self.destination.as_ref()
    }

    /// Render the last run's statistics to `path`.
    pub async fn report_last_migration(&self, path: &Path, template: Option<&Path>) -> Result<()> {
        self.source
            .report_last_migration(&self.stats, path, template)
            .await
    }

    /// Rows of the last run's tables still missing at the destination.
    pub async fn check_last_migration(&mut self) -> Result<BTreeMap<String, Vec<Record>>> {
        let args = self.last_migration_args.clone().ok_or_else(|| {
            MigrateError::Config("no migration has run; nothing to check".into())
        })?;
        self.source.compare(self.destination.as_mut(), &args).await
    }

    /// Close both endpoints.
    pub async fn close(&mut self) {
        self.source.close().await;
        self.destination.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_before_migrate_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("jsonfile:::{}", dir.path().display());
        let mut migration = Migration::new(&url, &url, MigrationOptions::default(), None)
            .await
            .unwrap();
        assert!(matches!(
            migration.check_last_migration().await,
            Err(MigrateError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_before_connecting() {
        let options = MigrationOptions {
            encoding: "klingon".into(),
            ..Default::default()
        };
        let result = Migration::new("nope:::x", "nope:::y", options, None).await;
        assert!(matches!(result, Err(MigrateError::Config(m)) if m.contains("klingon")));
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("t.json"), r#"[{"a": 1}]"#).unwrap();

        let token = CancellationToken::new();
        let mut migration = Migration::new(
            &format!("jsonfile:::{}", src.display()),
            &format!("jsonfile:::{}", dir.path().join("dst").display()),
            MigrationOptions::default(),
            None,
        )
        .await
        .unwrap()
        .with_cancellation(token.clone());

        token.cancel();
        assert!(matches!(
            migration.migrate(None, 10, Vec::new()).await,
            Err(MigrateError::Cancelled)
        ));
    }
}
