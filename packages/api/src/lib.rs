#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Client for the National Assembly Open API.
//!
//! Every service is reached at `{base_url}/{SERVICE}` with `KEY`, `Type`,
//! `pIndex` and `pSize` query parameters and answers with the envelope
//! described in [`envelope`]. [`client::OpenApiClient`] handles paging and
//! retries, [`datasets`] holds the embedded dataset definitions used for
//! bulk collection, and [`service_fetcher::ServiceFetcher`] adapts a single
//! service call to the batch fetcher's `FetchOne` trait.

pub mod client;
pub mod datasets;
pub mod envelope;
pub mod retry;
pub mod service_fetcher;

use std::time::Duration;

/// Default Open API base URL.
pub const DEFAULT_BASE_URL: &str = "https://open.assembly.go.kr/portal/openapi";

/// Largest page size the Open API accepts.
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Errors that can occur while talking to the Open API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// An HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// The status code returned.
        status: reqwest::StatusCode,
        /// The request URL.
        url: String,
    },

    /// The response body was not the JSON we expected.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of what went wrong.
        message: String,
    },

    /// The service reported an error code in its `RESULT` block.
    #[error("Service error {code}: {message}")]
    Service {
        /// `RESULT.CODE`, e.g. `ERROR-290`.
        code: String,
        /// `RESULT.MESSAGE`.
        message: String,
    },

    /// Required configuration is missing or invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of what went wrong.
        message: String,
    },

    /// A dataset definition could not be parsed.
    #[error("Dataset definition error: {0}")]
    Definition(#[from] toml::de::Error),

    /// A filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing a collected dataset failed.
    #[error("Write error: {0}")]
    Write(#[from] assembly_ledger::LedgerError),

    /// Serializing a collected dataset failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Connection settings for the Open API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL, without a trailing slash.
    pub base_url: String,
    /// API key sent as the `KEY` parameter.
    pub api_key: String,
    /// Records requested per page (`pSize`).
    pub page_size: u32,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Pause between consecutive page requests.
    pub page_delay: Duration,
    /// Retry behaviour for transient failures.
    pub retry: retry::RetryPolicy,
}

impl ApiConfig {
    /// Creates a config for `api_key` against the public endpoint.
    #[must_use]
    pub fn new(api_key: &str) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(30),
            page_delay: Duration::from_millis(100),
            retry: retry::RetryPolicy::default(),
        }
    }

    /// Reads `ASSEMBLY_API_KEY` and the optional `ASSEMBLY_API_BASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if `ASSEMBLY_API_KEY` is unset or empty.
    pub fn from_env() -> Result<Self, ApiError> {
        let api_key = std::env::var("ASSEMBLY_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ApiError::Config {
                message: "ASSEMBLY_API_KEY environment variable is not set".to_string(),
            })?;

        let mut config = Self::new(&api_key);
        if let Ok(base_url) = std::env::var("ASSEMBLY_API_BASE_URL")
            && !base_url.trim().is_empty()
        {
            config = config.with_base_url(&base_url);
        }
        Ok(config)
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the delay between page requests.
    #[must_use]
    pub const fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: retry::RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
