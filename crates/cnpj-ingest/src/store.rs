//! SQLite persistence for loaded tables.
//!
//! One table per schema prefix in a single database file. Table creation is
//! `CREATE TABLE IF NOT EXISTS` and safe to run every time; appends happen
//! only from the sequential ingest step, so the pool holds one connection.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::debug;

use crate::error::Result;
use crate::ingestor::{ChunkSink, IngestChunk};
use crate::schema::{CellValue, ColumnType, TableSchema};

/// Handle on the destination database.
pub struct TableStore {
    pool: SqlitePool,
}

impl TableStore {
    /// Open (creating if needed) the single-file database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Open an in-memory database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await?;

        Ok(Self { pool })
    }

    /// Create the table for `schema` unless it already exists.
    pub async fn create_table_if_absent(&self, schema: &TableSchema) -> Result<()> {
        let columns = schema
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&schema.table_name()),
            columns
        );

        debug!(table = %schema.table_name(), "ensuring table exists");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Append one chunk inside a single transaction.
    pub async fn append_chunk(&self, schema: &TableSchema, chunk: &IngestChunk) -> Result<()> {
        let placeholders = vec!["?"; schema.columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} VALUES ({})",
            quote_ident(&schema.table_name()),
            placeholders
        );

        let mut tx = self.pool.begin().await?;
        for row in &chunk.rows {
            let mut query = sqlx::query(&sql);
            for cell in row {
                query = match cell {
                    CellValue::Null => query.bind(Option::<String>::None),
                    CellValue::Text(s) => query.bind(s.as_str()),
                    CellValue::Integer(i) => query.bind(*i),
                    CellValue::Float(f) => query.bind(*f),
                };
            }
            query.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(
            table = %schema.table_name(),
            rows = chunk.rows.len(),
            "chunk appended"
        );
        Ok(())
    }

    /// Whether a table of this name exists.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Number of rows currently in `table`.
    pub async fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// All rows of a table in schema column order, for export.
    pub async fn read_rows(&self, schema: &TableSchema) -> Result<Vec<Vec<CellValue>>> {
        let columns = schema
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {}",
            columns,
            quote_ident(&schema.table_name())
        );

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cells = Vec::with_capacity(schema.columns.len());
            for (i, column) in schema.columns.iter().enumerate() {
                let cell = match column.ty {
                    ColumnType::Text => row
                        .try_get::<Option<String>, _>(i)?
                        .map(CellValue::Text)
                        .unwrap_or(CellValue::Null),
                    ColumnType::Integer => row
                        .try_get::<Option<i64>, _>(i)?
                        .map(CellValue::Integer)
                        .unwrap_or(CellValue::Null),
                    ColumnType::Float => row
                        .try_get::<Option<f64>, _>(i)?
                        .map(CellValue::Float)
                        .unwrap_or(CellValue::Null),
                };
                cells.push(cell);
            }
            out.push(cells);
        }

        Ok(out)
    }
}

#[async_trait]
impl ChunkSink for TableStore {
    async fn append(&self, schema: &TableSchema, chunk: &IngestChunk) -> Result<()> {
        self.append_chunk(schema, chunk).await
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    fn socios_schema() -> TableSchema {
        TableSchema {
            prefix: "Socios".to_string(),
            columns: vec![
                Column {
                    name: "cnpj_basico".to_string(),
                    ty: ColumnType::Text,
                },
                Column {
                    name: "faixa_etaria".to_string(),
                    ty: ColumnType::Integer,
                },
                Column {
                    name: "participacao".to_string(),
                    ty: ColumnType::Float,
                },
            ],
        }
    }

    fn sample_chunk() -> IngestChunk {
        IngestChunk {
            rows: vec![
                vec![
                    CellValue::Text("00000001".to_string()),
                    CellValue::Integer(4),
                    CellValue::Float(0.5),
                ],
                vec![
                    CellValue::Text("00000002".to_string()),
                    CellValue::Null,
                    CellValue::Null,
                ],
            ],
        }
    }

    #[tokio::test]
    async fn test_create_table_is_idempotent() {
        let store = TableStore::open_in_memory().await.unwrap();
        let schema = socios_schema();

        store.create_table_if_absent(&schema).await.unwrap();
        store.create_table_if_absent(&schema).await.unwrap();

        assert!(store.table_exists("socios").await.unwrap());
        assert_eq!(store.row_count("socios").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_survives_existing_rows() {
        let store = TableStore::open_in_memory().await.unwrap();
        let schema = socios_schema();

        store.create_table_if_absent(&schema).await.unwrap();
        store.append_chunk(&schema, &sample_chunk()).await.unwrap();

        // A second run must not clobber the accumulated rows.
        store.create_table_if_absent(&schema).await.unwrap();
        assert_eq!(store.row_count("socios").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let store = TableStore::open_in_memory().await.unwrap();
        let schema = socios_schema();

        store.create_table_if_absent(&schema).await.unwrap();
        store.append_chunk(&schema, &sample_chunk()).await.unwrap();

        let rows = store.read_rows(&schema).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], CellValue::Text("00000001".to_string()));
        assert_eq!(rows[0][1], CellValue::Integer(4));
        assert_eq!(rows[0][2], CellValue::Float(0.5));
        assert_eq!(rows[1][1], CellValue::Null);
    }

    #[tokio::test]
    async fn test_table_exists_is_false_before_creation() {
        let store = TableStore::open_in_memory().await.unwrap();
        assert!(!store.table_exists("socios").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested/out/cnpj.db");

        let store = TableStore::open(&db_path).await.unwrap();
        let schema = socios_schema();
        store.create_table_if_absent(&schema).await.unwrap();

        assert!(db_path.exists());
    }
}
