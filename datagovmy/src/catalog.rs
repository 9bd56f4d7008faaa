//! Static dataset index and the local list/search operations over it.
//!
//! The index is plain data: it is parsed once, never mutated, and handed to
//! [`list`] and [`search`] by reference.

use std::path::Path;

use datagovmy_api::Source;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Dataset index compiled into the crate.
pub const BUNDLED_INDEX: &str = include_str!("../data/datasets.json");

/// Default page size of [`list`].
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Default number of hits returned by [`search`].
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Static description of one queryable dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

/// Dataset records of both sources, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetIndex {
    #[serde(default)]
    pub opendosm: Vec<DatasetRecord>,
    #[serde(default)]
    pub data_catalogue: Vec<DatasetRecord>,
}

impl DatasetIndex {
    /// The index shipped with the crate.
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_INDEX)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read an index file with the same layout as the bundled one.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn records(&self, source: Source) -> &[DatasetRecord] {
        match source {
            Source::OpenDosm => &self.opendosm,
            Source::DataCatalogue => &self.data_catalogue,
        }
    }

    /// Look up a record by exact id within one source.
    pub fn find(&self, source: Source, id: &str) -> Option<&DatasetRecord> {
        self.records(source).iter().find(|record| record.id == id)
    }

    pub fn len(&self) -> usize {
        self.opendosm.len() + self.data_catalogue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records of the selected source, or of every source in order, each
    /// tagged with where it came from.
    fn tagged(&self, source: Option<Source>) -> impl Iterator<Item = SourcedRecord<'_>> {
        Source::ALL
            .into_iter()
            .filter(move |candidate| source.is_none_or(|wanted| wanted == *candidate))
            .flat_map(move |source| {
                self.records(source)
                    .iter()
                    .map(move |record| SourcedRecord { source, record })
            })
    }
}

/// A record together with the source it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourcedRecord<'a> {
    pub source: Source,
    #[serde(flatten)]
    pub record: &'a DatasetRecord,
}

/// One page of [`list`] output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetPage<'a> {
    /// Matching records before pagination
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    /// Records on this page
    pub count: usize,
    pub records: Vec<SourcedRecord<'a>>,
}

/// List records, optionally restricted to one source and one category.
///
/// Category comparison ignores case; records without a category never match
/// a category filter. An offset past the end gives an empty page.
pub fn list<'a>(
    index: &'a DatasetIndex,
    source: Option<Source>,
    category: Option<&str>,
    limit: usize,
    offset: usize,
) -> DatasetPage<'a> {
    let category = category.map(str::to_lowercase);

    let matching: Vec<SourcedRecord<'a>> = index
        .tagged(source)
        .filter(|tagged| match &category {
            Some(wanted) => tagged
                .record
                .category
                .as_deref()
                .is_some_and(|category| category.to_lowercase() == *wanted),
            None => true,
        })
        .collect();

    let total = matching.len();
    let records: Vec<_> = matching.into_iter().skip(offset).take(limit).collect();

    DatasetPage {
        total,
        limit,
        offset,
        count: records.len(),
        records,
    }
}

/// A scored search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchHit<'a> {
    pub source: Source,
    pub score: u32,
    #[serde(flatten)]
    pub record: &'a DatasetRecord,
}

/// Rank records against `query`, best first.
///
/// The query is only lower-cased, never trimmed. Records that score zero
/// are dropped. Equal scores keep index order.
pub fn search<'a>(
    index: &'a DatasetIndex,
    query: &str,
    source: Option<Source>,
    limit: usize,
) -> Vec<SearchHit<'a>> {
    let needle = query.to_lowercase();

    let mut hits: Vec<SearchHit<'a>> = index
        .tagged(source)
        .filter_map(|SourcedRecord { source, record }| {
            let score = relevance(record, &needle);
            (score > 0).then_some(SearchHit {
                source,
                score,
                record,
            })
        })
        .collect();

    // stable
    hits.sort_by(|a, b| b.score.cmp(&a.score));
    hits.truncate(limit);
    hits
}

/// Score of `record` for an already lower-cased `needle`.
fn relevance(record: &DatasetRecord, needle: &str) -> u32 {
    let mut score = 0;

    let id = record.id.to_lowercase();
    if id == needle {
        score += 100;
    } else if id.contains(needle) {
        score += 50;
    }

    if record.name.to_lowercase().contains(needle) {
        score += 30;
    }

    if record.description.to_lowercase().contains(needle) {
        score += 10;
    }

    for keyword in &record.keywords {
        let keyword = keyword.to_lowercase();
        if keyword == needle {
            score += 40;
        } else if keyword.contains(needle) {
            score += 20;
        }
    }

    score
}
