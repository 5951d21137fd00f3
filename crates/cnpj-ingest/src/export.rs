//! Flat-format export of loaded tables.
//!
//! A thin surface over the store: each table is written to one file in the
//! output directory, column names and order supplied by the schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::CsvOptions;
use crate::error::{IngestError, Result};
use crate::schema::{CellValue, SchemaRegistry, TableSchema};
use crate::store::TableStore;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExportFormat {
    /// Delimiter-separated text with a header row.
    Csv,
    /// One JSON object per line.
    Json,
}

impl ExportFormat {
    /// File extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "jsonl",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" | "jsonl" => Ok(ExportFormat::Json),
            other => Err(IngestError::Config(format!(
                "unsupported export format: {}. Valid formats: csv, json",
                other
            ))),
        }
    }
}

impl TryFrom<String> for ExportFormat {
    type Error = IngestError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ExportFormat> for String {
    fn from(format: ExportFormat) -> Self {
        format.as_str().to_string()
    }
}

/// Export one table to `<table>.<ext>` under `out_dir`.
pub async fn export_table(
    store: &TableStore,
    schema: &TableSchema,
    format: ExportFormat,
    out_dir: &Path,
    csv_options: &CsvOptions,
) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;
    let path = out_dir.join(format!("{}.{}", schema.table_name(), format.extension()));

    let rows = store.read_rows(schema).await?;
    match format {
        ExportFormat::Csv => write_csv(&path, schema, &rows, csv_options)?,
        ExportFormat::Json => write_jsonl(&path, schema, &rows)?,
    }

    info!(
        table = %schema.table_name(),
        rows = rows.len(),
        path = %path.display(),
        "table exported"
    );
    Ok(path)
}

/// Export every configured table that exists in the store.
pub async fn export_tables(
    store: &TableStore,
    registry: &SchemaRegistry,
    format: ExportFormat,
    out_dir: &Path,
    csv_options: &CsvOptions,
) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for schema in registry.tables() {
        if !store.table_exists(&schema.table_name()).await? {
            warn!(table = %schema.table_name(), "table not loaded yet, skipping export");
            continue;
        }
        paths.push(export_table(store, schema, format, out_dir, csv_options).await?);
    }

    Ok(paths)
}

fn write_csv(
    path: &Path,
    schema: &TableSchema,
    rows: &[Vec<CellValue>],
    options: &CsvOptions,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(options.separator as u8)
        .quote(options.quote as u8)
        .from_path(path)?;

    writer.write_record(schema.columns.iter().map(|c| c.name.as_str()))?;
    for row in rows {
        writer.write_record(row.iter().map(cell_to_string))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_jsonl(path: &Path, schema: &TableSchema, rows: &[Vec<CellValue>]) -> Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);

    for row in rows {
        let mut object = Map::new();
        for (column, cell) in schema.columns.iter().zip(row) {
            object.insert(column.name.clone(), cell_to_json(cell));
        }
        serde_json::to_writer(&mut file, &Value::Object(object))?;
        file.write_all(b"\n")?;
    }

    file.flush()?;
    Ok(())
}

fn cell_to_string(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => String::new(),
        CellValue::Text(s) => s.clone(),
        CellValue::Integer(i) => i.to_string(),
        CellValue::Float(f) => f.to_string(),
    }
}

fn cell_to_json(cell: &CellValue) -> Value {
    match cell {
        CellValue::Null => Value::Null,
        CellValue::Text(s) => Value::String(s.clone()),
        CellValue::Integer(i) => Value::Number((*i).into()),
        CellValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
    }
}
