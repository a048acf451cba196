//! table-migrate CLI - copy tables between databases and JSON/CSV files.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use table_migrate::error::EXIT_USAGE_ERROR;
use table_migrate::report::write_stats_json;
use table_migrate::{CompareMode, Logger, MigrateError, Migration, RunConfig, TransferMode};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser, Debug)]
#[command(name = "table-migrate")]
#[command(about = "Copy tables between databases and JSON/CSV files")]
#[command(version)]
#[command(after_help = "Endpoints are <backend>:::<locator>, e.g. dbms:::sqlite:app.db, \
dbms:::postgres://user@host/db, dbms:::creator://<odbc connection string>, \
jsonfile:::/path/to/dir, csvfile:::/path/to/dir")]
struct Cli {
    /// Source endpoint
    #[arg(short = 'f', long = "from", value_name = "SOURCE_URL")]
    from: Option<String>,

    /// Destination endpoint
    #[arg(short = 't', long = "to", value_name = "DESTINATION_URL")]
    to: Option<String>,

    /// Debug logging; engine messages are also printed to stdout
    #[arg(short, long)]
    verbose: bool,

    /// Log every SQL statement
    #[arg(short, long)]
    echo: bool,

    /// Tables to migrate (default: all)
    #[arg(value_name = "TABLE")]
    tables: Vec<String>,

    /// YAML run file; command-line flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// FULL or DIFF
    #[arg(long)]
    transfer_mode: Option<String>,

    /// DIFF predicate: PK_IN_CACHE, FULL, FULL_NO_PK, FULL_CACHE, FULL_CACHE_NO_PK
    #[arg(long)]
    compare_mode: Option<String>,

    /// Rows per chunk
    #[arg(long)]
    paquet: Option<usize>,

    /// Skip tables whose name starts with a match of this regex (repeatable)
    #[arg(long = "exclude", value_name = "REGEX")]
    exclude: Vec<String>,

    /// Write an HTML report of the run
    #[arg(long)]
    report: Option<PathBuf>,

    /// Template replacing the built-in report layout
    #[arg(long)]
    template: Option<PathBuf>,

    /// Write the run statistics as JSON
    #[arg(long)]
    stats_json: Option<PathBuf>,

    /// After the run, list source rows still missing at the destination
    #[arg(long)]
    check: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    merge_overrides(&cli, &mut config)?;

    let (Some(source), Some(destination)) = (config.source.clone(), config.destination.clone())
    else {
        eprintln!("error: both a source (-f) and a destination (-t) are required\n");
        eprintln!("{}", Cli::command().render_usage());
        return Ok(ExitCode::from(EXIT_USAGE_ERROR));
    };

    setup_logging(cli.verbose, &cli.log_format)?;
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {:?}", path);
    }

    let logger = if cli.verbose {
        Logger::with_callback(|message| println!("{}", message))
    } else {
        Logger::new()
    };

    let cancel_token = setup_signal_handler();
    let mut migration = Migration::new(&source, &destination, config.options.clone(), Some(logger))
        .await?
        .with_cancellation(cancel_token);

    let tables = if config.tables.is_empty() {
        None
    } else {
        Some(config.tables.clone())
    };
    let result = migration
        .migrate(tables, config.options.paquet, config.exclude.clone())
        .await;

    // Statistics are worth writing even when the run failed half-way.
    if let Some(path) = &cli.stats_json {
        write_stats_json(migration.stats(), path)?;
    }
    if let Some(path) = &config.report {
        migration
            .report_last_migration(path, config.template.as_deref())
            .await?;
    }

    let exceptions = match result {
        Ok(exceptions) => exceptions,
        Err(e) => {
            migration.close().await;
            return Err(e);
        }
    };

    let stats = migration.stats();
    println!("\nMigration completed!");
    println!("  Tables: {}", stats.tables.len());
    println!("  Records transferred: {}", stats.total_records_transferred);
    println!("  Records skipped: {}", stats.total_records_skipped);
    println!("exceptions: {}", exceptions.len());
    for exception in &exceptions {
        println!("  {}", exception);
    }

    if cli.check {
        let missing = migration.check_last_migration().await?;
        println!("\nCheck:");
        for (table, rows) in &missing {
            println!("  {}: {} missing", table, rows.len());
        }
    }

    migration.close().await;
    Ok(ExitCode::SUCCESS)
}

/// Apply command-line values on top of the run file.
fn merge_overrides(cli: &Cli, config: &mut RunConfig) -> Result<(), MigrateError> {
    if cli.from.is_some() {
        config.source = cli.from.clone();
    }
    if cli.to.is_some() {
        config.destination = cli.to.clone();
    }
    if !cli.tables.is_empty() {
        config.tables = cli.tables.clone();
    }
    if !cli.exclude.is_empty() {
        config.exclude = cli.exclude.clone();
    }
    if let Some(mode) = &cli.transfer_mode {
        config.options.transfer_mode = mode.parse::<TransferMode>()?;
    }
    if let Some(mode) = &cli.compare_mode {
        config.options.compare_mode = mode.parse::<CompareMode>()?;
    }
    if let Some(paquet) = cli.paquet {
        config.options.paquet = paquet;
    }
    if cli.report.is_some() {
        config.report = cli.report.clone();
    }
    if cli.template.is_some() {
        config.template = cli.template.clone();
    }
    config.options.echo |= cli.echo;
    config.validate()
}

fn setup_logging(verbose: bool, format: &str) -> Result<(), MigrateError> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => {
            return Err(MigrateError::Config(format!(
                "Invalid log format '{}'. Valid values: text, json",
                other
            )))
        }
    }
    Ok(())
}

/// Cancel the returned token on SIGINT or SIGTERM; the run stops before
/// the next chunk.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for kind in [SignalKind::interrupt(), SignalKind::terminate()] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            match signal(kind) {
                Ok(mut stream) => {
                    stream.recv().await;
                    eprintln!("\nReceived signal. Stopping after the current chunk...");
                    token.cancel();
                }
                Err(e) => tracing::warn!("cannot install signal handler: {}", e),
            }
        });
    }

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current chunk...");
            token.cancel();
        }
    });

    cancel_token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_short_flags_and_tables() {
        let cli = Cli::parse_from([
            "table-migrate",
            "-f",
            "dbms:::sqlite:a.db",
            "-t",
            "jsonfile:::out",
            "-v",
            "-e",
            "users",
            "data",
        ]);
        assert_eq!(cli.from.as_deref(), Some("dbms:::sqlite:a.db"));
        assert_eq!(cli.to.as_deref(), Some("jsonfile:::out"));
        assert!(cli.verbose && cli.echo);
        assert_eq!(cli.tables, vec!["users", "data"]);
    }

    #[test]
    fn test_overrides_win_over_run_file() {
        let cli = Cli::parse_from([
            "table-migrate",
            "-t",
            "csvfile:::out",
            "--transfer-mode",
            "diff",
            "--compare-mode",
            "full_cache",
            "--paquet",
            "5",
            "--exclude",
            "tmp_",
            "--exclude",
            "log_",
        ]);
        let mut config = RunConfig {
            source: Some("jsonfile:::in".into()),
            destination: Some("jsonfile:::elsewhere".into()),
            ..Default::default()
        };
        merge_overrides(&cli, &mut config).unwrap();

        assert_eq!(config.source.as_deref(), Some("jsonfile:::in"));
        assert_eq!(config.destination.as_deref(), Some("csvfile:::out"));
        assert_eq!(config.options.transfer_mode, TransferMode::Diff);
        assert_eq!(config.options.compare_mode, CompareMode::FullCache);
        assert_eq!(config.options.paquet, 5);
        assert_eq!(config.exclude, vec!["tmp_", "log_"]);
    }

    #[test]
    fn test_bad_transfer_mode_is_config_error() {
        let cli = Cli::parse_from(["table-migrate", "--transfer-mode", "sideways"]);
        let mut config = RunConfig::default();
        assert!(matches!(
            merge_overrides(&cli, &mut config),
            Err(MigrateError::Config(_))
        ));
    }
}
