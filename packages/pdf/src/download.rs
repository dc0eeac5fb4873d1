//! PDF download utilities.
//!
//! [`PdfDownloader`] fetches one [`PdfTarget`] at a time and is driven by
//! the batch fetcher, so downloads are checkpointed and failed ones are
//! retried on the next run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use assembly_api::retry::{self, RetryPolicy};
use assembly_fetcher::FetchOne;
use serde_json::{Value, json};

use crate::PdfError;
use crate::tracking::PdfTarget;

/// Browser-like user agent; the document server rejects bare clients.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Per-download timeout.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads conference PDFs into a data directory.
#[derive(Debug, Clone)]
pub struct PdfDownloader {
    http: reqwest::Client,
    data_dir: PathBuf,
    retry: RetryPolicy,
}

impl PdfDownloader {
    /// Creates a downloader writing under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`PdfError::Api`] if the HTTP client cannot be constructed.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, PdfError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(assembly_api::ApiError::from)?;
        Ok(Self {
            http,
            data_dir: data_dir.into(),
            retry: RetryPolicy::default(),
        })
    }

    /// Sets the retry policy for transient HTTP failures.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Root directory that `relative_path`s resolve against.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Downloads `target` unless its file is already on disk.
    ///
    /// # Errors
    ///
    /// Returns [`PdfError`] if the download or the write fails.
    pub async fn download(&self, target: &PdfTarget) -> Result<Value, PdfError> {
        let path = target.local_path(&self.data_dir);

        if let Ok(meta) = tokio::fs::metadata(&path).await
            && meta.is_file()
        {
            log::debug!("  ✓ File already exists: {}", target.filename);
            return Ok(record(target, meta.len(), true));
        }

        log::info!("  Downloading: {}", target.filename);
        let bytes = retry::send_bytes(&self.retry, || self.http.get(&target.download_url)).await?;

        if bytes.is_empty() {
            return Err(PdfError::Empty {
                url: target.download_url.clone(),
            });
        }

        write_atomic(&path, &bytes).await?;
        log::info!("  ✓ Downloaded: {} ({} bytes)", target.filename, bytes.len());

        Ok(record(target, bytes.len() as u64, false))
    }
}

fn record(target: &PdfTarget, bytes: u64, already_present: bool) -> Value {
    json!({
        "filename": target.filename,
        "relative_path": target.relative_path,
        "bytes": bytes,
        "already_present": already_present,
    })
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PdfError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("pdf.part");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

impl FetchOne<PdfTarget> for PdfDownloader {
    type Error = PdfError;

    async fn fetch_one(&self, item: &PdfTarget) -> Result<Option<Value>, PdfError> {
        self.download(item).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::ConferenceRow;

    fn target(url: &str) -> PdfTarget {
        let row = ConferenceRow {
            conference_kind: Some("본회의".to_string()),
            conference_id: Some("7".to_string()),
            download_url: Some(url.to_string()),
            ..ConferenceRow::default()
        };
        PdfTarget::from_row("PRC_A", &row).unwrap()
    }

    fn downloader(dir: &Path) -> PdfDownloader {
        PdfDownloader::new(dir).unwrap().with_retry(RetryPolicy::none())
    }

    #[tokio::test]
    async fn downloads_into_bill_directory() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/minutes.pdf"))
            .and(header("user-agent", USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 body".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = target(&format!("{}/minutes.pdf", server.uri()));

        let result = downloader(dir.path()).fetch_one(&target).await.unwrap().unwrap();

        assert_eq!(result["bytes"], 13);
        assert_eq!(result["already_present"], false);
        let on_disk = std::fs::read(target.local_path(dir.path())).unwrap();
        assert_eq!(on_disk, b"%PDF-1.4 body");
        assert!(target.relative_path.starts_with("pdf_downloads/PRC_A/"));
    }

    #[tokio::test]
    async fn existing_file_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = target(&format!("{}/minutes.pdf", server.uri()));
        let local = target.local_path(dir.path());
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        std::fs::write(&local, b"cached").unwrap();

        let result = downloader(dir.path()).fetch_one(&target).await.unwrap().unwrap();

        assert_eq!(result["already_present"], true);
        assert_eq!(result["bytes"], 6);
    }

    #[tokio::test]
    async fn failed_download_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = target(&format!("{}/missing.pdf", server.uri()));

        let err = downloader(dir.path()).fetch_one(&target).await.unwrap_err();

        assert!(matches!(err, PdfError::Api(_)));
        assert!(!target.local_path(dir.path()).exists());
    }
}
