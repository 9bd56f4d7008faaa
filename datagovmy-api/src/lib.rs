//! Low-level client for the api.data.gov.my open-data endpoints.
//!
//! Two upstream sources are supported, OpenDOSM (Department of Statistics
//! Malaysia) and the Data Catalogue. Both accept a `GET` with an `id`
//! parameter plus optional pagination and filter parameters, and answer with
//! arbitrary JSON which this crate hands back untouched.

pub mod client;
pub mod models;

pub use client::{ApiClient, ApiError, Configuration};
pub use models::{QueryOptions, Source, UnknownSource};
pub use tokio_util::sync::CancellationToken;

/// Base URL of the OpenDOSM API.
pub const OPENDOSM_BASE_URL: &str = "https://api.data.gov.my/opendosm";

/// Base URL of the Data Catalogue API.
pub const DATA_CATALOGUE_BASE_URL: &str = "https://api.data.gov.my/data-catalogue";
