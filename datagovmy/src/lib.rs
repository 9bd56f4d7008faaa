//! Client library for Malaysian government open data.
//!
//! [`DataGovMyClient`] queries the OpenDOSM and Data Catalogue APIs through
//! the passthrough client re-exported as [`api`], and searches a static index
//! of known datasets ([`catalog`]).
//!
//! ```rust,no_run
//! use datagovmy::{DataGovMyClient, api::{QueryOptions, Source}};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = DataGovMyClient::new()?;
//!
//! for hit in client.search_datasets("inflation", Some(Source::OpenDosm), 5) {
//!     println!("{} ({}): {}", hit.record.id, hit.score, hit.record.name);
//! }
//!
//! let rows = client
//!     .query_opendosm("cpi_core", &QueryOptions::new().with_limit(12))
//!     .await?;
//! println!("{rows:#}");
//! # Ok(())
//! # }
//! ```

pub use datagovmy_api as api;

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;

pub use catalog::{DatasetIndex, DatasetPage, DatasetRecord, SearchHit, SourcedRecord};
pub use client::{DataGovMyClient, DatasetInfo, DatasetSchema};
pub use config::DataGovMyConfig;
pub use error::{DataGovMyError, Result};
