//! Registry of backend constructors keyed by URL tag.
//!
//! The catalog is built explicitly and handed to the coordinator; tests and
//! embedding applications can register their own backends next to the
//! built-in ones.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::dbms::DbmsBackend;
use super::file::{FileBackend, FileFormat};
use super::url::EndpointUrl;
use super::{Backend, BackendContext};
use crate::error::{MigrateError, Result};

/// Builds a backend from its locator.
pub type BackendFactory =
    Arc<dyn Fn(String, BackendContext) -> BoxFuture<'static, Result<Box<dyn Backend>>> + Send + Sync>;

/// Backend constructors by tag.
#[derive(Default, Clone)]
pub struct BackendCatalog {
    factories: HashMap<String, BackendFactory>,
}

impl BackendCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with `dbms`, `jsonfile` and `csvfile`.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register("dbms", |locator, ctx| async move {
            let backend = DbmsBackend::connect(&locator, ctx).await?;
            Ok(Box::new(backend) as Box<dyn Backend>)
        });
        catalog.register("jsonfile", |locator, ctx| async move {
            let backend = FileBackend::new(FileFormat::Json, &locator, ctx)?;
            Ok(Box::new(backend) as Box<dyn Backend>)
        });
        catalog.register("csvfile", |locator, ctx| async move {
            let backend = FileBackend::new(FileFormat::Csv, &locator, ctx)?;
            Ok(Box::new(backend) as Box<dyn Backend>)
        });
        catalog
    }

    /// Register (or replace) the constructor of `tag`.
    pub fn register<F, Fut>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(String, BackendContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Box<dyn Backend>>> + Send + 'static,
    {
        let factory: BackendFactory = Arc::new(move |locator, ctx| factory(locator, ctx).boxed());
        self.factories.insert(tag.into(), factory);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Parse `url` and build its backend.
    pub async fn open(&self, url: &str, ctx: BackendContext) -> Result<Box<dyn Backend>> {
        let endpoint = EndpointUrl::parse(url)?;
        let factory = self.factories.get(&endpoint.tag).ok_or_else(|| {
            MigrateError::Config(format!(
                "Unknown backend '{}'. Available: {}",
                endpoint.tag,
                self.tags().join(", ")
            ))
        })?;
        factory(endpoint.locator, ctx).await
    }
}

impl fmt::Debug for BackendCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCatalog")
            .field("tags", &self.tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let catalog = BackendCatalog::with_builtins();
        assert_eq!(catalog.tags(), vec!["csvfile", "dbms", "jsonfile"]);
    }

    #[tokio::test]
    async fn test_unknown_tag_is_config_error() {
        let catalog = BackendCatalog::with_builtins();
        let err = catalog
            .open("ftp:::somewhere", BackendContext::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MigrateError::Config(ref m) if m.contains("ftp")));
    }

    #[tokio::test]
    async fn test_open_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = BackendCatalog::with_builtins();
        let url = format!("jsonfile:::{}", dir.path().display());
        let backend = catalog.open(&url, BackendContext::default()).await.unwrap();
        assert_eq!(backend.tag(), "jsonfile");
        assert_eq!(backend.path(), dir.path().display().to_string());
    }

    #[tokio::test]
    async fn test_custom_registration() {
        let mut catalog = BackendCatalog::new();
        catalog.register("mem", |_locator, _ctx| async move {
            Err::<Box<dyn Backend>, _>(MigrateError::Config("not today".into()))
        });
        assert!(catalog.contains("mem"));
        assert!(catalog.open("mem:::x", BackendContext::default()).await.is_err());
    }
}
