use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upstream API a dataset lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    /// Department of Statistics Malaysia (OpenDOSM)
    #[serde(rename = "opendosm")]
    OpenDosm,
    /// The broader government Data Catalogue
    #[serde(rename = "data_catalogue")]
    DataCatalogue,
}

impl Source {
    /// Every source, in index order.
    pub const ALL: [Source; 2] = [Source::OpenDosm, Source::DataCatalogue];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::OpenDosm => "opendosm",
            Source::DataCatalogue => "data_catalogue",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names neither `opendosm` nor `data_catalogue`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid source '{0}'. Must be 'opendosm' or 'data_catalogue'")]
pub struct UnknownSource(pub String);

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opendosm" => Ok(Source::OpenDosm),
            "data_catalogue" => Ok(Source::DataCatalogue),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

/// Parameters of a single dataset query.
///
/// `limit` and `offset` are signed and deliberately unchecked: whatever the
/// caller passes is forwarded to the upstream API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Extra query parameters, forwarded verbatim after stringification
    #[serde(default)]
    pub filters: Map<String, Value>,
    /// Maximum number of rows (ignored when `meta_only` is set)
    #[serde(default = "QueryOptions::default_limit")]
    pub limit: i64,
    /// Number of rows to skip (ignored when `meta_only` is set)
    #[serde(default)]
    pub offset: i64,
    /// Ask for dataset metadata instead of rows
    #[serde(default)]
    pub meta_only: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            filters: Map::new(),
            limit: Self::default_limit(),
            offset: 0,
            meta_only: false,
        }
    }
}

impl QueryOptions {
    pub const DEFAULT_LIMIT: i64 = 100;

    fn default_limit() -> i64 {
        Self::DEFAULT_LIMIT
    }

    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a metadata-only request.
    pub fn metadata() -> Self {
        Self {
            meta_only: true,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_filter<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_filters(mut self, filters: Map<String, Value>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// Query parameters for `dataset_id`, in the order they are sent.
    ///
    /// A filter whose key collides with a generated parameter (`id`, `limit`,
    /// `offset`, `meta_only`) replaces it. Array filter values expand into
    /// one parameter per element.
    pub fn to_query_pairs(&self, dataset_id: &str) -> Vec<(String, String)> {
        let mut pairs = vec![("id".to_string(), dataset_id.to_string())];

        if self.meta_only {
            pairs.push(("meta_only".to_string(), "true".to_string()));
        } else {
            pairs.push(("limit".to_string(), self.limit.to_string()));
            pairs.push(("offset".to_string(), self.offset.to_string()));
        }

        for (key, value) in &self.filters {
            pairs.retain(|(existing, _)| existing != key);
            for text in stringify_filter(value) {
                pairs.push((key.clone(), text));
            }
        }

        pairs
    }

    /// Percent-encoded query string for `dataset_id`, without the leading `?`.
    pub fn to_query_string(&self, dataset_id: &str) -> String {
        self.to_query_pairs(dataset_id)
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn stringify_filter(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Null => vec![String::new()],
        Value::Array(items) => items.iter().flat_map(stringify_filter).collect(),
        other => vec![other.to_string()],
    }
}
