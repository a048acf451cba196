//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MigrateError;

/// Default maximum rows per transferred chunk.
pub const DEFAULT_PAQUET: usize = 10_000;

/// How rows already present at the destination are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransferMode {
    /// Copy every row without checking the destination.
    #[default]
    Full,
    /// Skip rows the compare mode considers present at the destination.
    Diff,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Full => f.write_str("FULL"),
            TransferMode::Diff => f.write_str("DIFF"),
        }
    }
}

impl FromStr for TransferMode {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "FULL" => Ok(TransferMode::Full),
            "DIFF" => Ok(TransferMode::Diff),
            other => Err(MigrateError::Config(format!(
                "Invalid transfer_mode '{}'. Valid values: FULL, DIFF",
                other
            ))),
        }
    }
}

/// Predicate used in DIFF mode to decide whether a row is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompareMode {
    /// Cache the destination PK set once per table and skip rows whose PK is in it.
    #[default]
    PkInCache,
    /// One lookup per row on every column except a server-assigned key.
    Full,
    /// One lookup per row on every column except the primary key.
    FullNoPk,
    /// Cache the destination rows once per table and compare whole tuples.
    FullCache,
    /// As `FullCache`, with the primary key left out of the tuples.
    FullCacheNoPk,
}

impl CompareMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareMode::PkInCache => "PK_IN_CACHE",
            CompareMode::Full => "FULL",
            CompareMode::FullNoPk => "FULL_NO_PK",
            CompareMode::FullCache => "FULL_CACHE",
            CompareMode::FullCacheNoPk => "FULL_CACHE_NO_PK",
        }
    }
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompareMode {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            // PK and CACHED_PK are older spellings of the same mode.
            "PK_IN_CACHE" | "PK" | "CACHED_PK" => Ok(CompareMode::PkInCache),
            "FULL" => Ok(CompareMode::Full),
            "FULL_NO_PK" => Ok(CompareMode::FullNoPk),
            "FULL_CACHE" => Ok(CompareMode::FullCache),
            "FULL_CACHE_NO_PK" => Ok(CompareMode::FullCacheNoPk),
            other => Err(MigrateError::Config(format!(
                "Invalid compare_mode '{}'. Valid values: PK_IN_CACHE, FULL, FULL_NO_PK, FULL_CACHE, FULL_CACHE_NO_PK",
                other
            ))),
        }
    }
}

/// Text encoding of the file backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    /// ISO-8859-1: one byte per code point below U+0100.
    Latin1,
}

impl FromStr for TextEncoding {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" => Ok(TextEncoding::Latin1),
            other => Err(MigrateError::Config(format!(
                "Unsupported encoding '{}'. Supported: utf-8, latin-1",
                other
            ))),
        }
    }
}

/// Options shared by the source and destination backends of one migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationOptions {
    /// FULL or DIFF.
    pub transfer_mode: TransferMode,

    /// DIFF predicate.
    pub compare_mode: CompareMode,

    /// Maximum rows per chunk.
    pub paquet: usize,

    /// File backend text encoding (utf-8, latin-1).
    pub encoding: String,

    /// CSV field delimiter.
    pub csv_delimiter: char,

    /// File extension scanned by a file source; defaults to the backend's own.
    pub file_extension: Option<String>,

    /// Log every SQL statement issued by the drivers.
    pub echo: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            transfer_mode: TransferMode::default(),
            compare_mode: CompareMode::default(),
            paquet: DEFAULT_PAQUET,
            encoding: "utf-8".to_string(),
            csv_delimiter: ';',
            file_extension: None,
            echo: false,
        }
    }
}

impl MigrationOptions {
    /// Parsed `encoding`.
    pub fn text_encoding(&self) -> Result<TextEncoding, MigrateError> {
        self.encoding.parse()
    }

    pub fn is_diff(&self) -> bool {
        self.transfer_mode == TransferMode::Diff
    }
}

/// A run described in YAML. Every field can be overridden on the command line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Source endpoint URL (`tag:::locator`).
    pub source: Option<String>,

    /// Destination endpoint URL (`tag:::locator`).
    pub destination: Option<String>,

    /// Tables to migrate; empty means all.
    pub tables: Vec<String>,

    /// Table name patterns to skip (regular expressions anchored at the start).
    pub exclude: Vec<String>,

    /// HTML report output path.
    pub report: Option<PathBuf>,

    /// Report template replacing the built-in one.
    pub template: Option<PathBuf>,

    /// Migration options.
    #[serde(flatten)]
    pub options: MigrationOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_mode_parse() {
        assert_eq!("diff".parse::<TransferMode>().unwrap(), TransferMode::Diff);
        assert_eq!("FULL".parse::<TransferMode>().unwrap(), TransferMode::Full);
        assert!("partial".parse::<TransferMode>().is_err());
    }

    #[test]
    fn test_compare_mode_parse_and_display() {
        for mode in [
            CompareMode::PkInCache,
            CompareMode::Full,
            CompareMode::FullNoPk,
            CompareMode::FullCache,
            CompareMode::FullCacheNoPk,
        ] {
            assert_eq!(mode.to_string().parse::<CompareMode>().unwrap(), mode);
        }
        assert_eq!("PK".parse::<CompareMode>().unwrap(), CompareMode::PkInCache);
        assert!("ROWS".parse::<CompareMode>().is_err());
    }

    #[test]
    fn test_text_encoding_parse() {
        assert_eq!("UTF-8".parse::<TextEncoding>().unwrap(), TextEncoding::Utf8);
        assert_eq!("latin_1".parse::<TextEncoding>().unwrap(), TextEncoding::Latin1);
        assert!("koi8-r".parse::<TextEncoding>().is_err());
    }

    #[test]
    fn test_default_options() {
        let opts = MigrationOptions::default();
        assert_eq!(opts.transfer_mode, TransferMode::Full);
        assert_eq!(opts.compare_mode, CompareMode::PkInCache);
        assert_eq!(opts.paquet, 10_000);
        assert_eq!(opts.csv_delimiter, ';');
        assert!(!opts.is_diff());
    }

    #[test]
    fn test_run_config_yaml_serde_names() {
        let yaml = r#"
source: "dbms:::sqlite://a.db"
destination: "jsonfile:::/tmp/out"
transfer_mode: DIFF
compare_mode: FULL_CACHE_NO_PK
paquet: 500
exclude: ["request.*"]
"#;
        let cfg: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.options.transfer_mode, TransferMode::Diff);
        assert_eq!(cfg.options.compare_mode, CompareMode::FullCacheNoPk);
        assert_eq!(cfg.options.paquet, 500);
        assert_eq!(cfg.exclude, vec!["request.*".to_string()]);
        assert_eq!(cfg.options.encoding, "utf-8");
    }
}
