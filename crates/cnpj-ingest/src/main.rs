//! CNPJ open-data ingestion CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};
use cnpj_common::logging::{init_logging, LogConfig, LogLevel};
use cnpj_ingest::catalog::HttpCatalog;
use cnpj_ingest::config::PipelineConfig;
use cnpj_ingest::export::{export_tables, ExportFormat};
use cnpj_ingest::pipeline::IngestPipeline;
use cnpj_ingest::store::TableStore;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cnpj-ingest")]
#[command(author, version, about = "CNPJ open-data ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file
    #[arg(short, long, default_value = "config/config.yaml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover, download, and load the latest snapshot
    Run {
        /// Override the configured fetch concurrency
        #[arg(long)]
        concurrency: Option<usize>,

        /// Write the run report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Discover and download the latest snapshot without loading it
    Fetch {
        /// Override the configured fetch concurrency
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Load archives already present in the download directory
    Load,

    /// Export loaded tables to flat files
    Export {
        /// Override the configured export format (csv, json)
        #[arg(long)]
        format: Option<ExportFormat>,

        /// Override the configured output directory
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Environment variables fill the defaults; the explicit flag wins.
    let mut log_config = LogConfig::from_env()?;
    log_config.file_prefix = "cnpj-ingest".to_string();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    init_logging(&log_config)?;

    let mut config = PipelineConfig::load(&cli.config)?;

    match cli.command {
        Command::Run {
            concurrency,
            report,
        } => {
            if let Some(n) = concurrency {
                config.concurrency = Some(n);
            }

            let store = TableStore::open(&config.database_path).await?;
            let catalog = HttpCatalog::new(&config)?;
            let pipeline = IngestPipeline::new(&config, catalog);

            let run_report = pipeline.run(&store).await?;

            if let Some(path) = report {
                std::fs::write(&path, serde_json::to_string_pretty(&run_report)?)?;
                info!(path = %path.display(), "run report written");
            }
        },
        Command::Fetch { concurrency } => {
            if let Some(n) = concurrency {
                config.concurrency = Some(n);
            }

            let catalog = HttpCatalog::new(&config)?;
            let pipeline = IngestPipeline::new(&config, catalog);

            let (snapshot, outcomes) = pipeline.fetch_only().await?;
            let failed = outcomes.values().filter(|o| o.is_err()).count();
            info!(
                snapshot = %snapshot,
                total = outcomes.len(),
                failed = failed,
                "fetch finished"
            );
        },
        Command::Load => {
            let store = TableStore::open(&config.database_path).await?;
            let catalog = HttpCatalog::new(&config)?;
            let pipeline = IngestPipeline::new(&config, catalog);

            let reports = pipeline.load_existing(&store).await?;
            info!(count = reports.len(), "load finished");
        },
        Command::Export { format, output } => {
            let store = TableStore::open(&config.database_path).await?;
            let format = format.unwrap_or(config.export.format);
            let out_dir = output.unwrap_or_else(|| config.export.output_dir.clone());
            let registry = config.registry();

            let paths = export_tables(&store, &registry, format, &out_dir, &config.csv).await?;
            info!(count = paths.len(), "export finished");
        },
    }

    Ok(())
}
