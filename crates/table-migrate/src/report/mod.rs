//! Run report: the statistics rendered through a template, or dumped as JSON.

use std::fs;
use std::path::Path;

use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use tracing::info;

use crate::error::{MigrateError, Result};
use crate::stats::MigrationStats;

/// Built-in HTML template (Jinja syntax).
pub const DEFAULT_TEMPLATE: &str = include_str!("default.html");

const TEMPLATE_NAME: &str = "report";

/// Turns run statistics into a document.
pub trait ReportRenderer: Send + Sync {
    fn render(&self, stats: &MigrationStats) -> Result<String>;
}

/// HTML report rendered with minijinja.
///
/// The template sees the statistics as serialized by
/// [`MigrationStats::to_json`]. Output is HTML-escaped and undefined names
/// are errors.
#[derive(Debug, Clone)]
pub struct HtmlReport {
    source: String,
}

impl HtmlReport {
    /// Report with the built-in template.
    pub fn new() -> Result<Self> {
        Self::from_template(DEFAULT_TEMPLATE)
    }

    /// Report with `source` as template; syntax errors surface here.
    pub fn from_template(source: &str) -> Result<Self> {
        let report = Self {
            source: source.to_string(),
        };
        report.environment()?;
        Ok(report)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_template(&fs::read_to_string(path)?)
    }

    fn environment(&self) -> Result<Environment<'_>> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        env.add_template(TEMPLATE_NAME, &self.source)
            .map_err(render_error)?;
        Ok(env)
    }
}

impl ReportRenderer for HtmlReport {
    fn render(&self, stats: &MigrationStats) -> Result<String> {
        let context = stats.to_json()?;
        let env = self.environment()?;
        let template = env.get_template(TEMPLATE_NAME).map_err(render_error)?;
        template.render(&context).map_err(render_error)
    }
}

fn render_error(e: minijinja::Error) -> MigrateError {
    MigrateError::Render(e.to_string())
}

/// Render `stats` with `template` (or the built-in one) into `path`.
pub fn write_report(stats: &MigrationStats, path: &Path, template: Option<&Path>) -> Result<()> {
    let report = match template {
        Some(template) => HtmlReport::from_file(template)?,
        None => HtmlReport::new()?,
    };
    write_rendered(&report, stats, path)
}

/// Render `stats` with any renderer into `path`.
pub fn write_rendered(
    renderer: &dyn ReportRenderer,
    stats: &MigrationStats,
    path: &Path,
) -> Result<()> {
    let document = renderer.render(stats)?;
    fs::write(path, document)?;
    info!("report written to {}", path.display());
    Ok(())
}

/// Write `stats` as pretty-printed JSON.
pub fn write_stats_json(stats: &MigrationStats, path: &Path) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(stats)?)?;
    info!("statistics written to {}", path.display());
    Ok(())
}
