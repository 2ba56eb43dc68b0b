//! Data hub access: product search, checksum lookup and task planning.
//!
//! The hub exposes an OpenSearch endpoint returning Atom feeds and an OData
//! endpoint serving product content and checksums:
//!
//! ```text
//! {hub}/search?q=...&rows=N&start=M
//! {hub}/odata/v1/Products('<id>')/$value
//! {hub}/odata/v1/Products('<id>')/Checksum/Value/$value
//! ```

mod client;
mod planner;
mod query;

pub use client::{HubClient, HubError};
pub use planner::{TaskPlan, TaskPlanner, date_range};
pub use query::{
    ProductEntry, ProductUrls, SearchQuery, build_search_url, extract_products, product_urls,
};
