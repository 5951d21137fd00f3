//! Table schemas and the filename-prefix registry.
//!
//! The CNPJ archives carry header-less CSV, so every table's column names,
//! order, and primitive types come from configuration and are assigned
//! positionally. Archive filenames are tied to their table by a
//! case-insensitive prefix match (`Empresas0.zip` -> `empresas`).

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// Primitive column types recognized by the pipeline.
///
/// A closed enumeration: anything else in configuration is rejected with
/// `UnsupportedPrimitive` at load time. Integers get an exact storage type;
/// the registry identifiers carry leading zeros and stay `Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
}

impl ColumnType {
    /// SQLite column type for table creation.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "REAL",
        }
    }

    /// Canonical configuration spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "str",
            ColumnType::Integer => "int",
            ColumnType::Float => "float",
        }
    }

    /// Cast one raw CSV field to a typed cell.
    ///
    /// Empty fields become NULL for every type. `decimal` is the decimal
    /// marker used by the source data (`,` for the CNPJ files).
    pub fn cast(&self, raw: &str, decimal: char) -> std::result::Result<CellValue, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(CellValue::Null);
        }

        match self {
            ColumnType::Text => Ok(CellValue::Text(raw.to_string())),
            ColumnType::Integer => trimmed
                .parse::<i64>()
                .map(CellValue::Integer)
                .map_err(|_| format!("not an integer: {:?}", trimmed)),
            ColumnType::Float => {
                let normalized = if decimal == '.' {
                    trimmed.to_string()
                } else {
                    trimmed.replace(decimal, ".")
                };
                normalized
                    .parse::<f64>()
                    .map(CellValue::Float)
                    .map_err(|_| format!("not a number: {:?}", trimmed))
            },
        }
    }
}

impl std::str::FromStr for ColumnType {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "str" | "text" => Ok(ColumnType::Text),
            "int" | "integer" => Ok(ColumnType::Integer),
            "float" | "real" => Ok(ColumnType::Float),
            other => Err(IngestError::UnsupportedPrimitive(other.to_string())),
        }
    }
}

impl TryFrom<String> for ColumnType {
    type Error = IngestError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ColumnType> for String {
    fn from(ty: ColumnType) -> Self {
        ty.as_str().to_string()
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One typed cell of an ingested row.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
}

/// One column of a table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

/// Ordered column list for one table prefix.
///
/// Column order must match the column order of the archives' CSV rows;
/// there is no header row to self-describe them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub prefix: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    /// Destination table name: the lowercased prefix.
    pub fn table_name(&self) -> String {
        self.prefix.to_lowercase()
    }
}

/// Registry mapping archive filenames to their table schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: Vec<TableSchema>,
}

impl SchemaRegistry {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Look up a schema by its exact prefix, case-insensitively.
    pub fn schema_for(&self, prefix: &str) -> Result<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.prefix.eq_ignore_ascii_case(prefix))
            .ok_or_else(|| IngestError::UnknownPrefix(prefix.to_string()))
    }

    /// Match an archive filename against the registered prefixes.
    ///
    /// The base filename (extension stripped) is compared case-insensitively,
    /// so `Empresas0.zip` and `EMPRESAS3.zip` both resolve to `empresas`.
    pub fn match_archive(&self, filename: &str) -> Option<&TableSchema> {
        let base = filename.rsplit('/').next().unwrap_or(filename);
        let stem = base.split('.').next().unwrap_or(base);
        let lowered = stem.to_ascii_lowercase();

        self.tables
            .iter()
            .find(|t| lowered.starts_with(&t.prefix.to_ascii_lowercase()))
    }
}
