//! Bounded parallel fan-out of archive downloads.

use futures::{stream, StreamExt};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::fetcher::{ArchiveFetcher, FetchedArchive};

/// Per-URL result collected by the coordinator.
pub type FetchOutcome = std::result::Result<FetchedArchive, IngestError>;

/// Runs downloads across a worker pool bounded by `concurrency`.
///
/// Each fetch is independent: one archive's failure neither cancels nor
/// blocks the others, and the coordinator itself never fails.
pub struct DownloadCoordinator<'a> {
    fetcher: &'a ArchiveFetcher,
    concurrency: usize,
}

impl<'a> DownloadCoordinator<'a> {
    pub fn new(fetcher: &'a ArchiveFetcher, concurrency: usize) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch every URL into `dest_dir`, collecting results as they complete.
    ///
    /// The returned map has one entry per distinct input URL. With
    /// `concurrency = 1` the downloads run fully sequentially.
    pub async fn fetch_all(
        &self,
        urls: &[String],
        dest_dir: &Path,
    ) -> HashMap<String, FetchOutcome> {
        info!(
            count = urls.len(),
            concurrency = self.concurrency,
            "starting downloads"
        );

        stream::iter(urls.iter())
            .map(|url| async move {
                let outcome = self.fetcher.fetch(url, dest_dir).await;

                match &outcome {
                    Ok(fetched) if fetched.reused_cache => {
                        info!(url = %url, "already cached");
                    },
                    Ok(fetched) => {
                        info!(url = %url, bytes = fetched.bytes_transferred, "download complete");
                    },
                    Err(e) => {
                        warn!(url = %url, error = %e, "download failed");
                    },
                }

                (url.clone(), outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect::<HashMap<_, _>>()
            .await
    }
}
