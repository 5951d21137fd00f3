//! Chunked ingestion of one archive into its table.
//!
//! Each archive wraps exactly one header-less CSV file. The entry is decoded
//! from the configured 8-bit encoding, read in bounded row chunks, cast
//! against the table schema, and appended chunk by chunk, so archives far
//! larger than memory load in O(chunk) space. Reading happens on a blocking
//! task that feeds the async side through a bounded channel.

use async_trait::async_trait;
use encoding_rs_io::DecodeReaderBytesBuilder;
use std::fs::File;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::config::CsvOptions;
use crate::error::{IngestError, Result};
use crate::schema::{CellValue, TableSchema};

/// A bounded batch of typed rows from one archive.
#[derive(Debug, Clone)]
pub struct IngestChunk {
    pub rows: Vec<Vec<CellValue>>,
}

/// Destination for cast chunks.
#[async_trait]
pub trait ChunkSink {
    async fn append(&self, schema: &TableSchema, chunk: &IngestChunk) -> Result<()>;
}

/// Row and chunk counters for one ingested archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestStats {
    pub rows: u64,
    pub chunks: u64,
}

/// Ingest one archive into `sink` under `schema`.
///
/// Fails with `MalformedArchive` (zero rows appended) unless the archive
/// wraps exactly one inner entry, and with `SchemaTypeMismatch` on the first
/// row whose width or cell types do not match the schema; the chunk being
/// built at that point is never appended.
pub async fn ingest_archive<S>(
    archive_path: &Path,
    schema: &TableSchema,
    csv: &CsvOptions,
    chunk_rows: usize,
    sink: &S,
) -> Result<IngestStats>
where
    S: ChunkSink + Sync,
{
    let encoding = csv.encoding()?;
    let (tx, mut rx) = mpsc::channel::<Result<IngestChunk>>(1);

    let reader_path = archive_path.to_path_buf();
    let reader_schema = schema.clone();
    let reader_csv = csv.clone();

    let reader = tokio::task::spawn_blocking(move || {
        if let Err(e) = read_chunks(
            &reader_path,
            &reader_schema,
            &reader_csv,
            encoding,
            chunk_rows,
            &tx,
        ) {
            // Receiver may already be gone when the sink failed first.
            let _ = tx.blocking_send(Err(e));
        }
    });

    let mut stats = IngestStats::default();
    while let Some(chunk) = rx.recv().await {
        let chunk = chunk?;
        stats.rows += chunk.rows.len() as u64;
        stats.chunks += 1;
        sink.append(schema, &chunk).await?;
    }

    reader
        .await
        .map_err(|e| IngestError::Io(std::io::Error::other(e.to_string())))?;

    info!(
        archive = %archive_path.display(),
        table = %schema.table_name(),
        rows = stats.rows,
        chunks = stats.chunks,
        "archive ingested"
    );

    Ok(stats)
}

/// Blocking side: stream the single CSV entry into cast chunks.
fn read_chunks(
    archive_path: &Path,
    schema: &TableSchema,
    csv_options: &CsvOptions,
    encoding: &'static encoding_rs::Encoding,
    chunk_rows: usize,
    tx: &mpsc::Sender<Result<IngestChunk>>,
) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;

    if archive.len() != 1 {
        return Err(IngestError::MalformedArchive {
            path: archive_path.to_path_buf(),
            entries: archive.len(),
        });
    }

    let entry = archive.by_index(0)?;
    debug!(entry = %entry.name(), "reading archive entry");

    let decoded = DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .build(entry);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(csv_options.separator as u8)
        .quote(csv_options.quote as u8)
        .flexible(true)
        .from_reader(decoded);

    let archive_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| archive_path.display().to_string());

    let mut rows: Vec<Vec<CellValue>> = Vec::new();
    let mut row_number: u64 = 0;

    for record in reader.records() {
        let record = record?;
        row_number += 1;

        if record.len() != schema.columns.len() {
            return Err(IngestError::SchemaTypeMismatch {
                archive: archive_name.clone(),
                row: row_number,
                detail: format!(
                    "expected {} columns, found {}",
                    schema.columns.len(),
                    record.len()
                ),
            });
        }

        let mut cells = Vec::with_capacity(schema.columns.len());
        for (column, raw) in schema.columns.iter().zip(record.iter()) {
            let cell = column.ty.cast(raw, csv_options.decimal).map_err(|detail| {
                IngestError::SchemaTypeMismatch {
                    archive: archive_name.clone(),
                    row: row_number,
                    detail: format!("column {}: {}", column.name, detail),
                }
            })?;
            cells.push(cell);
        }
        rows.push(cells);

        if rows.len() >= chunk_rows {
            send_chunk(tx, &mut rows)?;
        }
    }

    if !rows.is_empty() {
        send_chunk(tx, &mut rows)?;
    }

    Ok(())
}

fn send_chunk(tx: &mpsc::Sender<Result<IngestChunk>>, rows: &mut Vec<Vec<CellValue>>) -> Result<()> {
    let chunk = IngestChunk {
        rows: std::mem::take(rows),
    };

    tx.blocking_send(Ok(chunk))
        .map_err(|_| IngestError::Io(std::io::Error::other("chunk receiver closed")))
}
