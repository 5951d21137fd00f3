//! Archive download with size-based cache reuse.
//!
//! A local file whose byte size equals the remote content length is taken
//! as-is; anything else is re-downloaded from scratch. Partial files from a
//! failed attempt stay on disk: the size check makes the next attempt fetch
//! them again. Retry itself is the caller's decision.

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};

/// Outcome of fetching one archive.
#[derive(Debug, Clone)]
pub struct FetchedArchive {
    /// Local path of the archive.
    pub path: PathBuf,

    /// Bytes written in this call; zero on a cache hit.
    pub bytes_transferred: u64,

    /// Whether the existing local copy was reused.
    pub reused_cache: bool,
}

/// Downloads one archive at a time.
pub struct ArchiveFetcher {
    client: Client,
}

impl ArchiveFetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .user_agent(crate::USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    /// Remote content length from a HEAD request; `None` when unavailable.
    ///
    /// Read from the `Content-Length` header: a HEAD response carries no
    /// body, so the body-derived size hint is always zero.
    async fn remote_size(&self, url: &str) -> Option<u64> {
        match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => response
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok()),
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "size probe refused");
                None
            },
            Err(e) => {
                warn!(url = %url, error = %e, "size probe failed");
                None
            },
        }
    }

    /// Fetch one archive into `dest_dir`, reusing a size-matching local copy.
    pub async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<FetchedArchive> {
        let filename = url
            .rsplit('/')
            .find(|part| !part.is_empty())
            .ok_or_else(|| fetch_error(url, "URL has no file name"))?;
        let local_path = dest_dir.join(filename);

        let remote_size = self.remote_size(url).await;

        if local_path.exists() {
            let local_size = std::fs::metadata(&local_path)
                .map_err(|e| fetch_error(url, e.to_string()))?
                .len();

            if remote_size == Some(local_size) {
                info!(
                    file = %filename,
                    size = local_size,
                    "local copy matches remote size, skipping download"
                );
                return Ok(FetchedArchive {
                    path: local_path,
                    bytes_transferred: 0,
                    reused_cache: true,
                });
            }

            info!(file = %filename, "local copy exists but size differs, re-downloading");
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_error(url, format!("HTTP {}", response.status())));
        }

        let total = remote_size.or_else(|| response.content_length()).unwrap_or(0);
        let progress = ProgressBar::new(total);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        progress.set_message(filename.to_string());

        let mut file =
            std::fs::File::create(&local_path).map_err(|e| fetch_error(url, e.to_string()))?;
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| fetch_error(url, e.to_string()))?;
            file.write_all(&chunk)
                .map_err(|e| fetch_error(url, e.to_string()))?;
            downloaded += chunk.len() as u64;
            progress.set_position(downloaded);
        }

        progress.finish_and_clear();
        debug!(file = %filename, bytes = downloaded, "transfer finished");
        info!(file = %filename, bytes = downloaded, "downloaded archive");

        Ok(FetchedArchive {
            path: local_path,
            bytes_transferred: downloaded,
            reused_cache: false,
        })
    }
}

fn fetch_error(url: &str, reason: impl Into<String>) -> IngestError {
    IngestError::Fetch {
        url: url.to_string(),
        reason: reason.into(),
    }
}
