//! Run orchestration: Discover -> Fetch -> Ingest -> Done.
//!
//! Catalog failures abort the run. A failed fetch drops that archive from
//! the ingest set; a failed ingest aborts that archive only. Everything
//! that happened lands in the [`RunReport`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{latest_snapshot, SnapshotCatalog};
use crate::config::PipelineConfig;
use crate::coordinator::{DownloadCoordinator, FetchOutcome};
use crate::error::Result;
use crate::fetcher::ArchiveFetcher;
use crate::ingestor::ingest_archive;
use crate::schema::SchemaRegistry;
use crate::store::TableStore;

/// Final state of one archive across the run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArchiveOutcome {
    FetchFailed {
        error: String,
    },
    SkippedNoSchema,
    IngestFailed {
        table: String,
        error: String,
    },
    Ingested {
        table: String,
        rows: u64,
        chunks: u64,
        reused_cache: bool,
    },
}

/// One archive's entry in the run report.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub file: String,
    pub source: String,
    #[serde(flatten)]
    pub outcome: ArchiveOutcome,
}

/// Structured end-of-run summary.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub snapshot: String,
    pub archives: Vec<ArchiveReport>,
}

impl RunReport {
    /// Total rows appended across all archives.
    pub fn rows_ingested(&self) -> u64 {
        self.archives
            .iter()
            .map(|a| match a.outcome {
                ArchiveOutcome::Ingested { rows, .. } => rows,
                _ => 0,
            })
            .sum()
    }

    /// Archives that failed to fetch or ingest.
    pub fn failures(&self) -> usize {
        self.archives
            .iter()
            .filter(|a| {
                matches!(
                    a.outcome,
                    ArchiveOutcome::FetchFailed { .. } | ArchiveOutcome::IngestFailed { .. }
                )
            })
            .count()
    }

    /// Archives with no matching schema prefix.
    pub fn skipped(&self) -> usize {
        self.archives
            .iter()
            .filter(|a| matches!(a.outcome, ArchiveOutcome::SkippedNoSchema))
            .count()
    }

    /// One-line summary for the log.
    pub fn summary(&self) -> String {
        format!(
            "snapshot {}: {} archives, {} rows ingested, {} failed, {} without schema",
            self.snapshot,
            self.archives.len(),
            self.rows_ingested(),
            self.failures(),
            self.skipped()
        )
    }
}

/// One archive queued for ingestion.
struct ArchiveJob {
    file: String,
    source: String,
    path: PathBuf,
    reused_cache: bool,
}

/// The full ingestion pipeline over a snapshot catalog.
pub struct IngestPipeline<'a, C> {
    config: &'a PipelineConfig,
    catalog: C,
    registry: SchemaRegistry,
}

impl<'a, C: SnapshotCatalog> IngestPipeline<'a, C> {
    pub fn new(config: &'a PipelineConfig, catalog: C) -> Self {
        let registry = config.registry();
        Self {
            config,
            catalog,
            registry,
        }
    }

    /// Resolve the newest snapshot and the archive URLs inside it.
    pub async fn discover(&self) -> Result<(String, Vec<String>)> {
        info!(url = %self.config.base_url, "discovering latest snapshot");

        let folders = self
            .catalog
            .list_snapshot_folders(&self.config.base_url)
            .await?;
        let snapshot = latest_snapshot(&folders, &self.config.base_url)?;

        let folder_url = format!("{}{}/", self.config.base_url, snapshot);
        let files = self.catalog.list_archive_files(&folder_url).await?;

        info!(snapshot = %snapshot, count = files.len(), "resolved snapshot");

        let urls = files
            .iter()
            .map(|file| format!("{}{}", folder_url, file))
            .collect();
        Ok((snapshot, urls))
    }

    /// Discover and download the latest snapshot without loading it.
    pub async fn fetch_only(&self) -> Result<(String, HashMap<String, FetchOutcome>)> {
        let (snapshot, urls) = self.discover().await?;

        std::fs::create_dir_all(&self.config.download_dir)?;
        let fetcher = ArchiveFetcher::new(self.config)?;
        let coordinator =
            DownloadCoordinator::new(&fetcher, self.config.effective_concurrency());
        let outcomes = coordinator.fetch_all(&urls, &self.config.download_dir).await;

        Ok((snapshot, outcomes))
    }

    /// Run the whole pipeline: discover, fetch, and load into `store`.
    pub async fn run(&self, store: &TableStore) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(run_id = %run_id, "ingestion run started");

        let (snapshot, urls) = self.discover().await?;

        std::fs::create_dir_all(&self.config.download_dir)?;
        let fetcher = ArchiveFetcher::new(self.config)?;
        let coordinator =
            DownloadCoordinator::new(&fetcher, self.config.effective_concurrency());
        let outcomes = coordinator.fetch_all(&urls, &self.config.download_dir).await;

        let mut archives = Vec::new();
        let mut groups: Vec<(String, Vec<ArchiveJob>)> = Vec::new();

        // Walk the URLs in discovery order so grouping stays deterministic.
        for url in &urls {
            let Some(outcome) = outcomes.get(url) else {
                continue;
            };
            let file = file_name_of(url);

            match outcome {
                Err(e) => archives.push(ArchiveReport {
                    file,
                    source: url.clone(),
                    outcome: ArchiveOutcome::FetchFailed {
                        error: e.to_string(),
                    },
                }),
                Ok(fetched) => {
                    let job = ArchiveJob {
                        file,
                        source: url.clone(),
                        path: fetched.path.clone(),
                        reused_cache: fetched.reused_cache,
                    };
                    self.enqueue(job, &mut groups, &mut archives);
                },
            }
        }

        self.ingest_groups(store, groups, &mut archives).await?;

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            snapshot,
            archives,
        };
        info!(run_id = %run_id, "{}", report.summary());
        Ok(report)
    }

    /// Load archives already present in the download directory.
    ///
    /// The standalone merger mode: no discovery, no fetching.
    pub async fn load_existing(&self, store: &TableStore) -> Result<Vec<ArchiveReport>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.config.download_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("zip"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        info!(
            count = paths.len(),
            dir = %self.config.download_dir.display(),
            "loading archives from disk"
        );

        let mut archives = Vec::new();
        let mut groups: Vec<(String, Vec<ArchiveJob>)> = Vec::new();

        for path in paths {
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let job = ArchiveJob {
                file,
                source: path.display().to_string(),
                path: path.clone(),
                reused_cache: true,
            };
            self.enqueue(job, &mut groups, &mut archives);
        }

        self.ingest_groups(store, groups, &mut archives).await?;
        Ok(archives)
    }

    /// Route one fetched archive to its table group, or report it skipped.
    fn enqueue(
        &self,
        job: ArchiveJob,
        groups: &mut Vec<(String, Vec<ArchiveJob>)>,
        archives: &mut Vec<ArchiveReport>,
    ) {
        match self.registry.match_archive(&job.file) {
            None => {
                warn!(file = %job.file, "no schema prefix matches, skipping");
                archives.push(ArchiveReport {
                    file: job.file,
                    source: job.source,
                    outcome: ArchiveOutcome::SkippedNoSchema,
                });
            },
            Some(schema) => {
                let table = schema.table_name();
                match groups.iter_mut().find(|(name, _)| *name == table) {
                    Some((_, jobs)) => jobs.push(job),
                    None => groups.push((table, vec![job])),
                }
            },
        }
    }

    /// Sequentially ingest each table group, isolating per-archive failures.
    async fn ingest_groups(
        &self,
        store: &TableStore,
        groups: Vec<(String, Vec<ArchiveJob>)>,
        archives: &mut Vec<ArchiveReport>,
    ) -> Result<()> {
        for (table, jobs) in groups {
            let schema = self.registry.schema_for(&table)?;
            store.create_table_if_absent(schema).await?;

            for job in jobs {
                info!(file = %job.file, table = %table, "ingesting archive");

                let outcome = match ingest_archive(
                    &job.path,
                    schema,
                    &self.config.csv,
                    self.config.chunk_rows,
                    store,
                )
                .await
                {
                    Ok(stats) => ArchiveOutcome::Ingested {
                        table: table.clone(),
                        rows: stats.rows,
                        chunks: stats.chunks,
                        reused_cache: job.reused_cache,
                    },
                    Err(e) => {
                        warn!(file = %job.file, error = %e, "archive ingestion failed, continuing");
                        ArchiveOutcome::IngestFailed {
                            table: table.clone(),
                            error: e.to_string(),
                        }
                    },
                };

                archives.push(ArchiveReport {
                    file: job.file,
                    source: job.source,
                    outcome,
                });
            }
        }

        Ok(())
    }
}

fn file_name_of(url: &str) -> String {
    url.rsplit('/')
        .find(|part| !part.is_empty())
        .unwrap_or(url)
        .to_string()
}
