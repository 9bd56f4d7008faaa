use std::path::PathBuf;
use std::sync::Arc;

use datagovmy_api::{Configuration as ApiConfiguration, DATA_CATALOGUE_BASE_URL, OPENDOSM_BASE_URL};
use url::Url;

use crate::error::{DataGovMyError, Result};

/// Configuration for the datagovmy client
#[derive(Debug, Clone)]
pub struct DataGovMyConfig {
    /// Base URL of the OpenDOSM API
    pub opendosm_url: String,
    /// Base URL of the Data Catalogue API
    pub data_catalogue_url: String,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Timeout for upstream requests in seconds
    pub timeout_secs: u64,
    /// Dataset index file to load instead of the bundled one
    pub index_path: Option<PathBuf>,
}

impl Default for DataGovMyConfig {
    fn default() -> Self {
        Self {
            opendosm_url: OPENDOSM_BASE_URL.to_string(),
            data_catalogue_url: DATA_CATALOGUE_BASE_URL.to_string(),
            user_agent: concat!("datagovmy-rs/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 30,
            index_path: None,
        }
    }
}

impl DataGovMyConfig {
    /// Create a new configuration pointing at api.data.gov.my
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the OpenDOSM base URL
    pub fn with_opendosm_url<S: Into<String>>(mut self, url: S) -> Self {
        self.opendosm_url = url.into();
        self
    }

    /// Override the Data Catalogue base URL
    pub fn with_data_catalogue_url<S: Into<String>>(mut self, url: S) -> Self {
        self.data_catalogue_url = url.into();
        self
    }

    /// Set custom user agent
    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Load the dataset index from a file instead of the bundled copy
    pub fn with_index_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.index_path = Some(path.into());
        self
    }

    /// Check that both base URLs are absolute http(s) URLs and the timeout
    /// is non-zero
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(DataGovMyError::config_error(
                "timeout must be at least 1 second",
            ));
        }
        for raw in [&self.opendosm_url, &self.data_catalogue_url] {
            let url = Url::parse(raw)?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(DataGovMyError::config_error(format!(
                    "base URL must use http or https: {raw}"
                )));
            }
        }
        Ok(())
    }

    /// Build the low-level API configuration, including the HTTP client
    pub fn api_configuration(&self) -> Result<Arc<ApiConfiguration>> {
        self.validate()?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .user_agent(&self.user_agent)
            .build()?;

        Ok(Arc::new(ApiConfiguration {
            opendosm_base_path: self.opendosm_url.trim_end_matches('/').to_string(),
            data_catalogue_base_path: self.data_catalogue_url.trim_end_matches('/').to_string(),
            user_agent: Some(self.user_agent.clone()),
            client,
        }))
    }
}
