//! Adapts a single Open API service call to [`assembly_fetcher::FetchOne`].

use assembly_fetcher::FetchOne;
use serde_json::Value;

use crate::{ApiError, client::OpenApiClient, envelope};

/// Query parameters derived from a work item.
pub type ParamsFn<T> = fn(&T) -> Vec<(&'static str, String)>;

/// Fetches the first page of `service` for each item.
///
/// A response with at least one row is a success carrying the whole service
/// payload. A response without the service key, or with an empty `row`
/// array, is "no data". `ERROR-*` result codes and HTTP failures are
/// errors.
pub struct ServiceFetcher<T> {
    client: OpenApiClient,
    service: String,
    params: ParamsFn<T>,
}

impl<T> ServiceFetcher<T> {
    /// Creates a fetcher for `service` that builds its query from `params`.
    #[must_use]
    pub fn new(client: OpenApiClient, service: &str, params: ParamsFn<T>) -> Self {
        Self {
            client,
            service: service.to_string(),
            params,
        }
    }

    /// The service code.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl<T: Sync> FetchOne<T> for ServiceFetcher<T> {
    type Error = ApiError;

    async fn fetch_one(&self, item: &T) -> Result<Option<Value>, ApiError> {
        let params: Vec<(String, String)> = (self.params)(item)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let body = self
            .client
            .get_raw(
                &self.service,
                &params,
                1,
                self.client.config().page_size,
            )
            .await?;

        let Some(payload) = envelope::service_payload(&body, &self.service) else {
            return Ok(None);
        };

        match envelope::rows(payload) {
            Some(rows) if !rows.is_empty() => Ok(Some(payload.clone())),
            _ => Ok(None),
        }
    }
}
