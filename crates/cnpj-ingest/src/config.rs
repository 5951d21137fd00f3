//! Pipeline configuration.
//!
//! The whole run is driven by one YAML file (catalog URL, CSV dialect,
//! destination paths, and the per-prefix table schemas), layered with
//! `CNPJ_*` environment overrides. Everything lands in a single
//! [`PipelineConfig`] constructed once in `main` and passed by reference
//! into each component; no module-level state.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};
use crate::export::ExportFormat;
use crate::schema::{SchemaRegistry, TableSchema};

/// Default row bound for one ingest chunk.
pub const DEFAULT_CHUNK_ROWS: usize = 1_000_000;

/// CSV dialect of the archive payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvOptions {
    /// Field separator.
    #[serde(default = "default_separator")]
    pub separator: char,

    /// Decimal marker used inside numeric fields.
    #[serde(default = "default_decimal")]
    pub decimal: char,

    /// Quote character.
    #[serde(default = "default_quote")]
    pub quote: char,

    /// Text encoding label (WHATWG), e.g. "ISO-8859-1".
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_separator() -> char {
    ';'
}

fn default_decimal() -> char {
    ','
}

fn default_quote() -> char {
    '"'
}

fn default_encoding() -> String {
    "ISO-8859-1".to_string()
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            decimal: default_decimal(),
            quote: default_quote(),
            encoding: default_encoding(),
        }
    }
}

impl CsvOptions {
    /// Resolve the configured encoding label.
    pub fn encoding(&self) -> Result<&'static encoding_rs::Encoding> {
        encoding_rs::Encoding::for_label(self.encoding.as_bytes())
            .ok_or_else(|| IngestError::Config(format!("unknown text encoding: {}", self.encoding)))
    }
}

/// Export surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOptions {
    #[serde(default = "default_export_format")]
    pub format: ExportFormat,

    #[serde(default = "default_export_dir")]
    pub output_dir: PathBuf,
}

fn default_export_format() -> ExportFormat {
    ExportFormat::Csv
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("data/outgoing")
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: default_export_format(),
            output_dir: default_export_dir(),
        }
    }
}

/// Full configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Catalog index URL listing the snapshot folders.
    pub base_url: String,

    /// Skip certificate validation on catalog and archive requests.
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,

    /// Directory receiving downloaded archives.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Path of the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub csv: CsvOptions,

    #[serde(default)]
    pub export: ExportOptions,

    /// Row bound per ingest chunk; caps peak memory on the large archives.
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,

    /// Fetch worker count; `None` uses the machine's available parallelism.
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Request timeout in seconds; also bounds a hung transfer.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Per-prefix table schemas, in the order columns appear in the CSV.
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

fn default_accept_invalid_certs() -> bool {
    true
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("data/incoming")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/outgoing/cnpj.db")
}

fn default_chunk_rows() -> usize {
    DEFAULT_CHUNK_ROWS
}

fn default_timeout_secs() -> u64 {
    1800
}

impl PipelineConfig {
    /// Load configuration from a YAML file plus `CNPJ_*` environment
    /// overrides (e.g. `CNPJ_BASE_URL`, `CNPJ_CSV__SEPARATOR`).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix("CNPJ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: PipelineConfig = raw.try_deserialize()?;
        config.normalized()
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let raw = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Yaml))
            .build()?;

        let config: PipelineConfig = raw.try_deserialize()?;
        config.normalized()
    }

    fn normalized(mut self) -> Result<Self> {
        if !self.base_url.ends_with('/') {
            self.base_url.push('/');
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim() == "/" || self.base_url.trim().is_empty() {
            return Err(IngestError::Config("base_url must be set".to_string()));
        }

        if self.tables.is_empty() {
            return Err(IngestError::Config(
                "at least one table schema must be configured".to_string(),
            ));
        }

        if self.chunk_rows == 0 {
            return Err(IngestError::Config(
                "chunk_rows must be at least 1".to_string(),
            ));
        }

        for (name, c) in [
            ("csv.separator", self.csv.separator),
            ("csv.quote", self.csv.quote),
        ] {
            if !c.is_ascii() {
                return Err(IngestError::Config(format!("{} must be ASCII", name)));
            }
        }

        // Fail on unknown encodings at load time, not mid-ingest.
        self.csv.encoding()?;

        Ok(())
    }

    /// Schema registry built from the configured tables.
    pub fn registry(&self) -> SchemaRegistry {
        SchemaRegistry::new(self.tables.clone())
    }

    /// Worker count for the fetch fan-out.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
