//! Remote snapshot catalog.
//!
//! The Receita Federal publishes each monthly snapshot as a dated directory
//! on a plain HTTP listing page. Discovery scrapes the page's anchor tags:
//! hrefs with a trailing `/` are folders, `.zip` hrefs are archives.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};

/// Capability interface over snapshot discovery.
#[async_trait]
pub trait SnapshotCatalog {
    /// List snapshot folder entries at the index page, in descending order.
    async fn list_snapshot_folders(&self, index_url: &str) -> Result<Vec<String>>;

    /// List archive filenames inside one snapshot folder.
    async fn list_archive_files(&self, folder_url: &str) -> Result<Vec<String>>;
}

/// HTTP implementation scraping the listing pages.
pub struct HttpCatalog {
    client: Client,
}

impl HttpCatalog {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .user_agent(crate::USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    async fn fetch_listing(&self, url: &str) -> Result<String> {
        debug!(url = %url, "fetching listing page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::CatalogUnavailable(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(IngestError::CatalogUnavailable(format!(
                "{}: HTTP {}",
                url,
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| IngestError::CatalogUnavailable(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl SnapshotCatalog for HttpCatalog {
    async fn list_snapshot_folders(&self, index_url: &str) -> Result<Vec<String>> {
        let html = self.fetch_listing(index_url).await?;
        let folders = parse_folder_listing(&html);

        info!(count = folders.len(), url = %index_url, "listed snapshot folders");
        Ok(folders)
    }

    async fn list_archive_files(&self, folder_url: &str) -> Result<Vec<String>> {
        let html = self.fetch_listing(folder_url).await?;
        let files = parse_archive_listing(&html);

        info!(count = files.len(), url = %folder_url, "listed archive files");
        Ok(files)
    }
}

fn anchor_hrefs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a").unwrap();

    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href").map(str::to_string))
        .collect()
}

/// Extract folder entries from a listing page, descending.
///
/// Parent-directory links come first, then the dated folders newest-first,
/// so the newest real snapshot is always the second entry.
pub fn parse_folder_listing(html: &str) -> Vec<String> {
    let (mut parents, mut children): (Vec<String>, Vec<String>) = anchor_hrefs(html)
        .into_iter()
        .filter(|href| href.ends_with('/'))
        .partition(|href| is_parent_link(href));

    children.sort_by(|a, b| b.cmp(a));
    parents.append(&mut children);
    parents
}

/// Extract `.zip` archive entries from a folder page.
pub fn parse_archive_listing(html: &str) -> Vec<String> {
    anchor_hrefs(html)
        .into_iter()
        .filter(|href| href.ends_with(".zip"))
        .collect()
}

fn is_parent_link(href: &str) -> bool {
    href == "../" || href == "./" || href.starts_with('/') || href.contains("://")
}

/// Pick the newest real snapshot from a descending folder listing.
///
/// The listing's top entry is the parent-directory link, not a snapshot, so
/// the newest snapshot is the entry after it. Fewer than two entries means
/// there is nothing to ingest.
pub fn latest_snapshot(folders: &[String], index_url: &str) -> Result<String> {
    folders
        .get(1)
        .map(|name| name.trim_end_matches('/').to_string())
        .ok_or_else(|| IngestError::NoSnapshotFound(index_url.to_string()))
}
