//! CNPJ open-data ingestion pipeline.
//!
//! Discovers the latest monthly snapshot on the Receita Federal listing,
//! downloads its archives with bounded concurrency and size-based cache
//! reuse, and streams each archive's header-less CSV payload into a SQLite
//! table under a fixed, configuration-supplied schema. Loaded tables can be
//! exported to flat files afterwards.
//!
//! Architecture, leaf-first:
//! - [`catalog`]: snapshot folder and archive discovery over an HTML listing
//! - [`fetcher`]: one archive download, idempotent against the local cache
//! - [`coordinator`]: bounded parallel fan-out of downloads
//! - [`ingestor`]: chunked, schema-cast loading of one archive
//! - [`schema`]: table schemas and the filename-prefix registry
//! - [`store`]: SQLite persistence
//! - [`pipeline`]: the Discover -> Fetch -> Ingest run, with its report
//! - [`export`]: flat-format export of loaded tables

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod ingestor;
pub mod pipeline;
pub mod schema;
pub mod store;

pub use error::{IngestError, Result};

/// User agent sent on catalog and archive requests.
pub const USER_AGENT: &str = concat!("cnpj-ingest/", env!("CARGO_PKG_VERSION"));
