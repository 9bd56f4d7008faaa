use crate::models::{QueryOptions, Source};
use crate::{DATA_CATALOGUE_BASE_URL, OPENDOSM_BASE_URL};
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Configuration for the API client
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Base URL of the OpenDOSM endpoint
    pub opendosm_base_path: String,
    /// Base URL of the Data Catalogue endpoint
    pub data_catalogue_base_path: String,
    /// User agent string for HTTP requests
    pub user_agent: Option<String>,
    /// HTTP client instance
    pub client: reqwest::Client,
}

impl Configuration {
    /// Create a new configuration with default values
    pub fn new() -> Configuration {
        Configuration::default()
    }

    /// Base URL configured for `source`.
    pub fn base_path(&self, source: Source) -> &str {
        match source {
            Source::OpenDosm => &self.opendosm_base_path,
            Source::DataCatalogue => &self.data_catalogue_base_path,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            opendosm_base_path: OPENDOSM_BASE_URL.to_owned(),
            data_catalogue_base_path: DATA_CATALOGUE_BASE_URL.to_owned(),
            user_agent: Some(concat!("datagovmy-rs/", env!("CARGO_PKG_VERSION")).to_owned()),
            client: reqwest::Client::new(),
        }
    }
}

/// Errors that can occur when querying the upstream APIs
#[derive(Debug, Error)]
pub enum ApiError {
    /// The upstream API answered with a non-2xx status
    #[error("HTTP {status} {status_text} for {url}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Canonical reason phrase for the status, empty when unknown
        status_text: String,
        /// Request URL including the query string
        url: String,
    },

    /// Network, TLS, timeout or other transport-level failure
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The response body was not valid JSON
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The caller cancelled the request before it completed
    #[error("Request cancelled")]
    Cancelled,
}

/// # API Client
///
/// Thin passthrough client for the OpenDOSM and Data Catalogue endpoints of
/// api.data.gov.my. Each call is a single `GET`; nothing is retried or cached.
///
/// The client keeps no per-request state, so one instance can be shared by
/// concurrent callers. Cancellation is requested per call through a
/// [`CancellationToken`].
///
/// ## Usage
///
/// ```rust,no_run
/// use datagovmy_api::{ApiClient, Configuration, QueryOptions, Source};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = ApiClient::new(Arc::new(Configuration::default()));
///
///     let options = QueryOptions::new().with_limit(5);
///     let rows = client.query(Source::DataCatalogue, "fuelprice", &options).await?;
///     println!("{rows:#}");
///
///     Ok(())
/// }
/// ```
pub struct ApiClient {
    configuration: Arc<Configuration>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("opendosm_base_path", &self.configuration.opendosm_base_path)
            .field(
                "data_catalogue_base_path",
                &self.configuration.data_catalogue_base_path,
            )
            .finish()
    }
}

impl ApiClient {
    pub fn new(configuration: Arc<Configuration>) -> Self {
        Self { configuration }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Full request URL for a query, including the encoded query string.
    pub fn request_url(&self, source: Source, dataset_id: &str, options: &QueryOptions) -> String {
        format!(
            "{}?{}",
            self.configuration.base_path(source),
            options.to_query_string(dataset_id)
        )
    }

    /// Query a dataset and return the upstream JSON body as-is.
    ///
    /// # Arguments
    ///
    /// * `source` - Which upstream API to ask
    /// * `dataset_id` - Dataset identifier, e.g. `cpi_core` or `fuelprice`
    /// * `options` - Filters, pagination or the metadata-only flag
    ///
    /// # Errors
    ///
    /// [`ApiError::Status`] for a non-2xx answer, [`ApiError::Request`] for
    /// transport failures and [`ApiError::Parse`] when the body is not JSON.
    pub async fn query(
        &self,
        source: Source,
        dataset_id: &str,
        options: &QueryOptions,
    ) -> Result<Value, ApiError> {
        self.query_with_cancellation(source, dataset_id, options, &CancellationToken::new())
            .await
    }

    /// Same as [`ApiClient::query`], abandoning the transfer when `token` is
    /// cancelled.
    ///
    /// Cancellation drops the in-flight request and fails with
    /// [`ApiError::Cancelled`]. A token that is already cancelled fails the
    /// call before anything is sent.
    pub async fn query_with_cancellation(
        &self,
        source: Source,
        dataset_id: &str,
        options: &QueryOptions,
        token: &CancellationToken,
    ) -> Result<Value, ApiError> {
        if token.is_cancelled() {
            return Err(ApiError::Cancelled);
        }

        let url = self.request_url(source, dataset_id, options);
        tracing::debug!(%source, dataset_id, %url, "querying upstream dataset");

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(%source, dataset_id, "upstream query cancelled");
                Err(ApiError::Cancelled)
            }
            result = self.fetch_json(&url) => result,
        }
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, ApiError> {
        let mut request = self
            .configuration
            .client
            .get(url)
            .header(ACCEPT, "application/json");
        if let Some(ref user_agent) = self.configuration.user_agent {
            request = request.header(reqwest::header::USER_AGENT, user_agent);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), %url, "upstream returned an error status");
            return Err(ApiError::Status {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}
