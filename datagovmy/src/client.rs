use std::sync::Arc;

use datagovmy_api::{ApiClient, CancellationToken, QueryOptions, Source};
use serde::Serialize;
use serde_json::Value;

use crate::catalog::{self, DatasetIndex, DatasetPage, DatasetRecord, SearchHit};
use crate::config::DataGovMyConfig;
use crate::error::Result;

/// Rows fetched as a sample by [`DataGovMyClient::get_dataset_schema`].
pub const SCHEMA_SAMPLE_SIZE: i64 = 3;

/// High-level client for Malaysian government open data
///
/// Wraps the passthrough [`ApiClient`] and an immutable [`DatasetIndex`].
/// Upstream calls are independent of each other; every one of them has a
/// `_with_cancellation` form taking a per-call [`CancellationToken`].
#[derive(Debug, Clone)]
pub struct DataGovMyClient {
    api: Arc<ApiClient>,
    index: Arc<DatasetIndex>,
}

/// Static index entry for a dataset, or a stand-in when the id is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DatasetInfo<'a> {
    Indexed(&'a DatasetRecord),
    Unknown { id: String, name: &'static str },
}

impl<'a> DatasetInfo<'a> {
    fn lookup(index: &'a DatasetIndex, source: Source, dataset_id: &str) -> Self {
        match index.find(source, dataset_id) {
            Some(record) => DatasetInfo::Indexed(record),
            None => DatasetInfo::Unknown {
                id: dataset_id.to_string(),
                name: "Unknown",
            },
        }
    }
}

/// Index entry, upstream metadata and a few sample rows for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSchema<'a> {
    pub dataset_id: String,
    pub source: Source,
    pub info: DatasetInfo<'a>,
    pub metadata: Value,
    pub sample_data: Value,
}

impl DataGovMyClient {
    /// Create a client for api.data.gov.my with the bundled dataset index
    pub fn new() -> Result<Self> {
        Self::with_config(DataGovMyConfig::new())
    }

    /// Create a client from configuration
    ///
    /// Loads the index from `config.index_path` when set, otherwise uses the
    /// bundled copy.
    pub fn with_config(config: DataGovMyConfig) -> Result<Self> {
        let index = match config.index_path {
            Some(ref path) => DatasetIndex::from_path(path)?,
            None => DatasetIndex::bundled()?,
        };
        let api = ApiClient::new(config.api_configuration()?);

        tracing::debug!(
            opendosm = index.opendosm.len(),
            data_catalogue = index.data_catalogue.len(),
            "dataset index loaded"
        );

        Ok(Self::from_parts(Arc::new(api), Arc::new(index)))
    }

    /// Assemble a client from an existing API client and index
    pub fn from_parts(api: Arc<ApiClient>, index: Arc<DatasetIndex>) -> Self {
        Self { api, index }
    }

    pub fn index(&self) -> &DatasetIndex {
        &self.index
    }

    /// Get the underlying API client for advanced operations
    pub fn api_client(&self) -> &ApiClient {
        &self.api
    }

    // === Upstream queries ===

    /// Query any dataset of `source`
    pub async fn query(
        &self,
        source: Source,
        dataset_id: &str,
        options: &QueryOptions,
    ) -> Result<Value> {
        self.query_with_cancellation(source, dataset_id, options, &CancellationToken::new())
            .await
    }

    pub async fn query_with_cancellation(
        &self,
        source: Source,
        dataset_id: &str,
        options: &QueryOptions,
        token: &CancellationToken,
    ) -> Result<Value> {
        Ok(self
            .api
            .query_with_cancellation(source, dataset_id, options, token)
            .await?)
    }

    /// Query an OpenDOSM dataset, e.g. `cpi_core` or `gdp_qtr_real`
    pub async fn query_opendosm(&self, dataset_id: &str, options: &QueryOptions) -> Result<Value> {
        self.query(Source::OpenDosm, dataset_id, options).await
    }

    /// Query a Data Catalogue dataset, e.g. `fuelprice`
    pub async fn query_data_catalogue(
        &self,
        dataset_id: &str,
        options: &QueryOptions,
    ) -> Result<Value> {
        self.query(Source::DataCatalogue, dataset_id, options).await
    }

    /// Fetch dataset metadata without data rows
    pub async fn get_dataset_metadata(&self, dataset_id: &str, source: Source) -> Result<Value> {
        self.get_dataset_metadata_with_cancellation(dataset_id, source, &CancellationToken::new())
            .await
    }

    pub async fn get_dataset_metadata_with_cancellation(
        &self,
        dataset_id: &str,
        source: Source,
        token: &CancellationToken,
    ) -> Result<Value> {
        self.query_with_cancellation(source, dataset_id, &QueryOptions::metadata(), token)
            .await
    }

    /// Combine the index entry, upstream metadata and a three-row sample
    ///
    /// Datasets missing from the index still resolve, with
    /// `info = {id, name: "Unknown"}`. Any upstream failure fails the whole
    /// call.
    pub async fn get_dataset_schema(
        &self,
        dataset_id: &str,
        source: Source,
    ) -> Result<DatasetSchema<'_>> {
        self.get_dataset_schema_with_cancellation(dataset_id, source, &CancellationToken::new())
            .await
    }

    pub async fn get_dataset_schema_with_cancellation(
        &self,
        dataset_id: &str,
        source: Source,
        token: &CancellationToken,
    ) -> Result<DatasetSchema<'_>> {
        let info = DatasetInfo::lookup(&self.index, source, dataset_id);

        let metadata = self
            .get_dataset_metadata_with_cancellation(dataset_id, source, token)
            .await?;
        let sample_options = QueryOptions::new().with_limit(SCHEMA_SAMPLE_SIZE);
        let sample_data = self
            .query_with_cancellation(source, dataset_id, &sample_options, token)
            .await?;

        Ok(DatasetSchema {
            dataset_id: dataset_id.to_string(),
            source,
            info,
            metadata,
            sample_data,
        })
    }

    // === Local index ===

    /// Page through the dataset index
    pub fn list_datasets(
        &self,
        source: Option<Source>,
        category: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> DatasetPage<'_> {
        catalog::list(&self.index, source, category, limit, offset)
    }

    /// Keyword search over the dataset index
    pub fn search_datasets(
        &self,
        query: &str,
        source: Option<Source>,
        limit: usize,
    ) -> Vec<SearchHit<'_>> {
        catalog::search(&self.index, query, source, limit)
    }
}
