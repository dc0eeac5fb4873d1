//! Paged access to Open API services.

use serde_json::Value;

use crate::{ApiConfig, ApiError, envelope, retry};

/// One page of a service response.
#[derive(Debug, Clone)]
pub struct ServicePage {
    /// The full `SERVICE` array, if the service returned data.
    pub payload: Option<Value>,
    /// Record rows on this page.
    pub rows: Vec<Value>,
    /// `list_total_count` reported by the service.
    pub total_count: Option<u64>,
    /// One-based page index (`pIndex`).
    pub page_index: u32,
}

/// Rows gathered by [`OpenApiClient::fetch_all_pages`].
#[derive(Debug)]
pub struct PageWalk {
    /// Rows from every page that succeeded, in page order.
    pub rows: Vec<Value>,
    /// The page failure that ended the walk early, if any.
    pub error: Option<ApiError>,
}

impl PageWalk {
    /// Whether the walk reached the end of the data.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Open API client. Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct OpenApiClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl OpenApiClient {
    /// Builds a client with the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Http`] if the HTTP client cannot be constructed.
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// The client configuration.
    #[must_use]
    pub const fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// The underlying HTTP client.
    #[must_use]
    pub const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn service_url(&self, service: &str) -> String {
        format!("{}/{service}", self.config.base_url)
    }

    /// Requests one page of `service` and returns the raw body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the request fails, the body is not JSON, or
    /// the service reports an `ERROR-*` code.
    pub async fn get_raw(
        &self,
        service: &str,
        params: &[(String, String)],
        page_index: u32,
        page_size: u32,
    ) -> Result<Value, ApiError> {
        let url = self.service_url(service);
        let page_index = page_index.to_string();
        let page_size = page_size.to_string();

        let mut query: Vec<(&str, &str)> = vec![
            ("KEY", self.config.api_key.as_str()),
            ("Type", "json"),
            ("pIndex", page_index.as_str()),
            ("pSize", page_size.as_str()),
        ];
        query.extend(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        log::debug!("GET {service} pIndex={page_index} {params:?}");

        let body = retry::send_json(&self.config.retry, || {
            self.http.get(&url).query(&query)
        })
        .await?;
        envelope::check_result(&body, service)?;
        Ok(body)
    }

    /// Requests page `page_index` of `service` with the configured page size.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] under the same conditions as [`Self::get_raw`].
    pub async fn fetch_page(
        &self,
        service: &str,
        params: &[(String, String)],
        page_index: u32,
    ) -> Result<ServicePage, ApiError> {
        let body = self
            .get_raw(service, params, page_index, self.config.page_size)
            .await?;

        let payload = envelope::service_payload(&body, service).cloned();
        let rows = payload
            .as_ref()
            .and_then(envelope::rows)
            .cloned()
            .unwrap_or_default();
        let total_count = payload.as_ref().and_then(envelope::total_count);

        Ok(ServicePage {
            payload,
            rows,
            total_count,
            page_index,
        })
    }

    /// Fetches every page of `service`, stopping at the first empty page or
    /// once the reported total has been collected.
    ///
    /// A failing page ends the walk; the rows gathered so far are returned
    /// together with the failure.
    pub async fn fetch_all_pages(&self, service: &str, params: &[(String, String)]) -> PageWalk {
        let mut all_rows: Vec<Value> = Vec::new();
        let mut page_index: u32 = 1;
        let mut error = None;

        loop {
            log::info!("Fetching {service} {params:?} - page {page_index}...");

            let page = match self.fetch_page(service, params, page_index).await {
                Ok(page) => page,
                Err(e) => {
                    log::warn!("Error fetching {service} page {page_index}: {e}");
                    error = Some(e);
                    break;
                }
            };

            if page.rows.is_empty() {
                log::info!("No more data for {service} at page {page_index}");
                break;
            }

            let count = page.rows.len();
            all_rows.extend(page.rows);
            log::info!(
                "Collected {count} items from {service} page {page_index} (total: {})",
                all_rows.len()
            );

            if let Some(total) = page.total_count
                && all_rows.len() as u64 >= total
            {
                break;
            }

            page_index += 1;

            if !self.config.page_delay.is_zero() {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }

        PageWalk {
            rows: all_rows,
            error,
        }
    }
}
