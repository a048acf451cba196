//! File backends: one JSON array (`jsonfile`) or one CSV file (`csvfile`)
//! per table, in a single directory.
//!
//! Files carry no schema. As a source, a table is described by a shim
//! [`TableMeta`] whose columns are untyped, with no primary or foreign keys.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{forward_chunk, Backend, BackendContext, MigrateArgs, TableFilter};
use crate::compare::compare_key;
use crate::config::{MigrationOptions, TextEncoding};
use crate::core::identifier::validate_file_table_name;
use crate::core::schema::{Column, TableMeta};
use crate::core::value::{Record, SqlValue};
use crate::error::{MigrateError, Result};
use crate::logger::Logger;
use crate::stats::MigrationStats;

/// On-disk format of a file backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Csv,
}

impl FileFormat {
    pub fn tag(self) -> &'static str {
        match self {
            FileFormat::Json => "jsonfile",
            FileFormat::Csv => "csvfile",
        }
    }

    /// Default extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Json => "json",
            FileFormat::Csv => "csv",
        }
    }
}

/// Directory of per-table files.
pub struct FileBackend {
    format: FileFormat,
    path: String,
    dir: PathBuf,
    extension: String,
    encoding: TextEncoding,
    delimiter: u8,
    options: MigrationOptions,
    logger: Logger,
    /// Rows written per table during the current run; presence means the
    /// file was truncated already.
    written: HashMap<String, u64>,
    /// CSV header of each table started in this run.
    headers: HashMap<String, Vec<String>>,
}

impl FileBackend {
    /// Backend rooted at `locator`: a directory, or a file whose parent
    /// directory is used. A missing path without extension is taken as a
    /// directory to be created on first write.
    pub fn new(format: FileFormat, locator: &str, ctx: BackendContext) -> Result<Self> {
        let encoding = ctx.options.text_encoding()?;
        let delimiter = u8::try_from(ctx.options.csv_delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                MigrateError::Config(format!(
                    "csv_delimiter must be a single ASCII character, got {:?}",
                    ctx.options.csv_delimiter
                ))
            })?;
        let extension = ctx
            .options
            .file_extension
            .as_deref()
            .map(|e| e.trim_start_matches('.').to_string())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| format.extension().to_string());

        Ok(Self {
            format,
            path: locator.to_string(),
            dir: resolve_dir(Path::new(locator.trim())),
            extension,
            encoding,
            delimiter,
            options: ctx.options,
            logger: ctx.logger,
            written: HashMap::new(),
            headers: HashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", table, self.extension))
    }

    /// Tables present in the directory, sorted by name.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut tables = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(&self.extension));
            if let (true, Some(stem)) = (matches, path.file_stem().and_then(|s| s.to_str())) {
                tables.push(stem.to_string());
            }
        }
        tables.sort();
        Ok(tables)
    }

    /// Every record of `table`, in file order.
    pub fn read_table(&self, table: &str) -> Result<Vec<Record>> {
        validate_file_table_name(table)?;
        let text = decode_text(fs::read(self.table_path(table))?, self.encoding)?;
        match self.format {
            FileFormat::Json => {
                if text.trim().is_empty() {
                    return Ok(Vec::new());
                }
                Ok(serde_json::from_str(&text)?)
            }
            FileFormat::Csv => {
                let mut reader = csv::ReaderBuilder::new()
                    .delimiter(self.delimiter)
                    .from_reader(text.as_bytes());
                let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
                let mut records = Vec::new();
                for row in reader.records() {
                    let row = row?;
                    let record = headers
                        .iter()
                        .zip(row.iter())
                        .map(|(column, cell)| {
                            let value = if cell.is_empty() {
                                SqlValue::Null
                            } else {
                                SqlValue::Text(cell.to_string())
                            };
                            (column.clone(), value)
                        })
                        .collect();
                    records.push(record);
                }
                Ok(records)
            }
        }
    }

    fn source_tables(&self, args: &MigrateArgs) -> Result<Vec<String>> {
        match &args.tables {
            Some(tables) if !tables.is_empty() => Ok(tables.clone()),
            _ => self.list_tables(),
        }
    }

    fn write_json(&self, path: &Path, table: &str, records: &[Record], first: bool) -> Result<()> {
        let mut body = Vec::with_capacity(records.len());
        for record in records {
            check_serializable(table, record)?;
            body.push(serde_json::to_string(record)?);
        }
        let body = body.join(",\n");

        if first {
            fs::write(path, encode_text(&format!("[{}]", body), self.encoding)?)?;
            return Ok(());
        }
        if body.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let mut last = [0u8; 1];
        if len > 0 {
            file.seek(SeekFrom::Start(len - 1))?;
            file.read_exact(&mut last)?;
        }
        if last[0] != b']' {
            return Err(MigrateError::transfer(
                table,
                format!("{} does not end with a JSON array", path.display()),
            ));
        }
        let separator = if self.written.get(table).copied().unwrap_or(0) > 0 {
            ",\n"
        } else {
            ""
        };
        file.seek(SeekFrom::Start(len - 1))?;
        file.write_all(&encode_text(
            &format!("{}{}]", separator, body),
            self.encoding,
        )?)?;
        Ok(())
    }

    fn write_csv(&mut self, path: &Path, table: &TableMeta, records: &[Record], first: bool) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(Vec::new());

        if first {
            let header = if table.columns.is_empty() {
                record_columns(records)
            } else {
                table.column_names()
            };
            writer.write_record(&header)?;
            self.headers.insert(table.name.clone(), header);
        }
        let header = self.headers.get(&table.name).cloned().unwrap_or_default();
        for record in records {
            let row: Vec<String> = record
                .project(&header)
                .iter()
                .map(|v| v.to_text().unwrap_or_default())
                .collect();
            writer.write_record(&row)?;
        }
        let bytes = writer.into_inner().map_err(|e| MigrateError::Io(e.into_error()))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| MigrateError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        let encoded = encode_text(&text, self.encoding)?;

        let mut file = if first {
            OpenOptions::new().create(true).write(true).truncate(true).open(path)?
        } else {
            OpenOptions::new().append(true).open(path)?
        };
        file.write_all(&encoded)?;
        Ok(())
    }
}

/// Directory that holds the table files of `locator`.
fn resolve_dir(locator: &Path) -> PathBuf {
    if locator.as_os_str().is_empty() {
        return PathBuf::from(".");
    }
    if locator.is_dir() || (!locator.exists() && locator.extension().is_none()) {
        return locator.to_path_buf();
    }
    match locator.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Column names of `records` in order of first appearance.
fn record_columns(records: &[Record]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for record in records {
        for column in record.columns() {
            if seen.insert(column.to_string()) {
                columns.push(column.to_string());
            }
        }
    }
    columns
}

/// Schema-less description of a file table.
fn shim_table(name: &str, records: &[Record]) -> TableMeta {
    record_columns(records)
        .into_iter()
        .fold(TableMeta::new(name), |t, c| t.with_column(Column::untyped(c)))
}

/// Fail on the first value JSON cannot represent, naming its column.
fn check_serializable(table: &str, record: &Record) -> Result<()> {
    for (column, value) in record.iter() {
        if let Err(e) = value.to_json() {
            let detail = match e {
                MigrateError::Unsupported(message) => message,
                other => other.to_string(),
            };
            return Err(MigrateError::Unsupported(format!(
                "{}.{}: {}",
                table, column, detail
            )));
        }
    }
    Ok(())
}

fn decode_text(bytes: Vec<u8>, encoding: TextEncoding) -> Result<String> {
    match encoding {
        TextEncoding::Utf8 => {
            let text = String::from_utf8(bytes)
                .map_err(|e| MigrateError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
            Ok(match text.strip_prefix('\u{feff}') {
                Some(rest) => rest.to_string(),
                None => text,
            })
        }
        TextEncoding::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
    }
}

fn encode_text(text: &str, encoding: TextEncoding) -> Result<Vec<u8>> {
    match encoding {
        TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
        TextEncoding::Latin1 => text
            .chars()
            .map(|c| {
                u8::try_from(u32::from(c)).map_err(|_| {
                    MigrateError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("character {:?} cannot be encoded in latin-1", c),
                    ))
                })
            })
            .collect(),
    }
}

#[async_trait]
impl Backend for FileBackend {
    fn tag(&self) -> &str {
        self.format.tag()
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
        for name in self.source_tables(args)? {
            validate_file_table_name(&name)?;
            if filter.skip(&name, stats, &self.logger) {
                continue;
            }

            self.logger.log(&format!("\n\nmigrating {}", name));
            stats.table_mut(&name);
            let records = self.read_table(&name)?;
            let table = shim_table(&name, &records);
            self.logger.log("Transferring records");
            debug!("records to transfer: {}", records.len());

            let mut rows = records.into_iter();
            loop {
                args.check_cancelled()?;
                let chunk: Vec<Record> = rows.by_ref().take(args.chunk_size()).collect();
                if chunk.is_empty() {
                    break;
                }
                forward_chunk(destination, chunk, &table, stats).await?;
            }
        }
        Ok(())
    }

    async fn dump(
        &mut self,
        records: Vec<Record>,
        table: &TableMeta,
        stats: &mut MigrationStats,
    ) -> Result<()> {
        validate_file_table_name(&table.name)?;
        stats.table_mut(&table.name);
        fs::create_dir_all(&self.dir)?;

        let path = self.table_path(&table.name);
        let first = !self.written.contains_key(&table.name);
        match self.format {
            FileFormat::Json => self.write_json(&path, &table.name, &records, first)?,
            FileFormat::Csv => self.write_csv(&path, table, &records, first)?,
        }
        *self.written.entry(table.name.clone()).or_insert(0) += records.len() as u64;

        self.update_dump_stats(stats, &table.name, &records, 0);
        Ok(())
    }

    async fn compare(
        &mut self,
        destination: &mut dyn Backend,
        args: &MigrateArgs,
    ) -> Result<BTreeMap<String, Vec<Record>>> {
        let filter = TableFilter::new(&args.exclude)?;
        let mut missing = BTreeMap::new();
        for name in self.source_tables(args)? {
            if filter.is_excluded(&name) {
                continue;
            }
            self.logger.log(&format!("checking records of {}", name));
            let records = self.read_table(&name)?;
            let table = shim_table(&name, &records);
            let rows: &mut Vec<Record> = missing.entry(name).or_default();
            for chunk in records.chunks(args.chunk_size()) {
                args.check_cancelled()?;
                rows.extend(destination.missing_records(&table, chunk).await?);
            }
        }
        Ok(missing)
    }

    async fn missing_records(
        &mut self,
        table: &TableMeta,
        records: &[Record],
    ) -> Result<Vec<Record>> {
        if !self.table_path(&table.name).is_file() {
            return Ok(records.to_vec());
        }
        let columns = record_columns(records);
        let present: HashSet<_> = self
            .read_table(&table.name)?
            .iter()
            .map(|r| compare_key(&r.project(&columns)))
            .collect();
        Ok(records
            .iter()
            .filter(|r| !present.contains(&compare_key(&r.project(&columns))))
            .cloned()
            .collect())
    }

    fn reset_dump_state(&mut self) {
        self.written.clear();
        self.headers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(format: FileFormat, dir: &Path, options: MigrationOptions) -> FileBackend {
        let ctx = BackendContext::new(options, Logger::new());
        FileBackend::new(format, &dir.display().to_string(), ctx).unwrap()
    }

    fn rows(range: std::ops::Range<i64>) -> Vec<Record> {
        range
            .map(|i| {
                let mut r = Record::new();
                r.insert("id", i);
                r.insert("name", format!("n{}", i));
                r
            })
            .collect()
    }

    #[tokio::test]
    async fn test_json_dumps_extend_one_array() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = backend(FileFormat::Json, dir.path(), MigrationOptions::default());
        let mut stats = MigrationStats::default();
        let table = TableMeta::new("items");

        out.dump(rows(0..50), &table, &mut stats).await.unwrap();
        out.dump(rows(50..100), &table, &mut stats).await.unwrap();

        let text = fs::read_to_string(dir.path().join("items.json")).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 100);
        for (i, row) in parsed.iter().enumerate() {
            assert_eq!(row["id"], serde_json::json!(i));
        }
        assert_eq!(stats.table("items").unwrap().records_transferred, 100);
    }

    #[tokio::test]
    async fn test_json_new_run_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = backend(FileFormat::Json, dir.path(), MigrationOptions::default());
        let mut stats = MigrationStats::default();
        let table = TableMeta::new("items");

        out.dump(rows(0..3), &table, &mut stats).await.unwrap();
        out.reset_dump_state();
        out.dump(rows(0..2), &table, &mut stats).await.unwrap();

        assert_eq!(out.read_table("items").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_json_empty_first_chunk_then_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = backend(FileFormat::Json, dir.path(), MigrationOptions::default());
        let mut stats = MigrationStats::default();
        let table = TableMeta::new("items");

        out.dump(Vec::new(), &table, &mut stats).await.unwrap();
        out.dump(rows(0..2), &table, &mut stats).await.unwrap();

        let text = fs::read_to_string(dir.path().join("items.json")).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[tokio::test]
    async fn test_non_finite_float_names_column() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = backend(FileFormat::Json, dir.path(), MigrationOptions::default());
        let mut record = Record::new();
        record.insert("ratio", f64::INFINITY);

        let err = out
            .dump(vec![record], &TableMeta::new("m"), &mut MigrationStats::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Unsupported(ref m) if m.contains("m.ratio")));
    }

    #[tokio::test]
    async fn test_latin1_round_trip_and_unencodable() {
        let dir = tempfile::tempdir().unwrap();
        let options = MigrationOptions {
            encoding: "latin-1".into(),
            ..Default::default()
        };
        let mut out = backend(FileFormat::Json, dir.path(), options);
        let mut stats = MigrationStats::default();
        let mut record = Record::new();
        record.insert("city", "Zürich");
        out.dump(vec![record], &TableMeta::new("c"), &mut stats).await.unwrap();

        let bytes = fs::read(dir.path().join("c.json")).unwrap();
        assert!(bytes.contains(&0xFC));
        let back = out.read_table("c").unwrap();
        assert_eq!(back[0].get("city"), Some(&SqlValue::from("Zürich")));

        let mut record = Record::new();
        record.insert("city", "東京");
        let err = out
            .dump(vec![record], &TableMeta::new("d"), &mut stats)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Io(_)));
    }

    #[tokio::test]
    async fn test_csv_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = backend(FileFormat::Csv, dir.path(), MigrationOptions::default());
        let mut stats = MigrationStats::default();
        let table = TableMeta::new("people")
            .with_column(Column::new("id", "INTEGER"))
            .with_column(Column::new("name", "TEXT"));

        let mut partial = Record::new();
        partial.insert("id", 9);
        out.dump(rows(0..2), &table, &mut stats).await.unwrap();
        out.dump(vec![partial], &table, &mut stats).await.unwrap();

        let text = fs::read_to_string(dir.path().join("people.csv")).unwrap();
        assert_eq!(text, "id;name\n0;n0\n1;n1\n9;\n");

        let back = out.read_table("people").unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back[0].get("id"), Some(&SqlValue::from("0")));
        assert_eq!(back[2].get("name"), Some(&SqlValue::Null));
    }

    #[test]
    fn test_list_tables_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.json"), "[]").unwrap();
        fs::write(dir.path().join("a.json"), "[]").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::create_dir(dir.path().join("sub.json")).unwrap();

        let source = backend(FileFormat::Json, dir.path(), MigrationOptions::default());
        assert_eq!(source.list_tables().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_file_locator_uses_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.json");
        fs::write(&file, "[]").unwrap();
        assert_eq!(resolve_dir(&file), dir.path());
        assert_eq!(resolve_dir(&dir.path().join("new_out")), dir.path().join("new_out"));
    }

    #[tokio::test]
    async fn test_json_to_csv_migration_with_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = dir.path().join("src");
        let dst_dir = dir.path().join("dst");
        fs::create_dir(&src_dir).unwrap();
        fs::write(src_dir.join("users.json"), r#"[{"id": 1, "name": "ann"}, {"id": 2, "name": null}]"#).unwrap();
        fs::write(src_dir.join("tmp_cache.json"), r#"[{"k": 1}]"#).unwrap();
        fs::write(src_dir.join("empty.json"), "[]").unwrap();

        let mut source = backend(FileFormat::Json, &src_dir, MigrationOptions::default());
        let mut destination = backend(FileFormat::Csv, &dst_dir, MigrationOptions::default());
        let mut stats = MigrationStats::default();
        let args = MigrateArgs::new(None, 1, vec!["tmp_".into()]);

        let exceptions = source.migrate(&mut destination, &args, &mut stats).await.unwrap();
        assert!(exceptions.is_empty());
        assert!(stats.table("tmp_cache").unwrap().skipped);
        assert!(!dst_dir.join("tmp_cache.csv").exists());
        assert!(!dst_dir.join("empty.csv").exists());
        assert_eq!(
            fs::read_to_string(dst_dir.join("users.csv")).unwrap(),
            "id;name\n1;ann\n2;\n"
        );
        assert_eq!(stats.total_records_transferred, 2);

        let missing = source.compare(&mut destination, &args).await.unwrap();
        assert!(missing["users"].is_empty());
        assert!(!missing.contains_key("tmp_cache"));
    }

    #[test]
    fn test_bad_encoding_is_config_error() {
        let options = MigrationOptions {
            encoding: "ebcdic".into(),
            ..Default::default()
        };
        let ctx = BackendContext::new(options, Logger::new());
        assert!(matches!(
            FileBackend::new(FileFormat::Json, ".", ctx),
            Err(MigrateError::Config(_))
        ));
    }
}
