//! Upstream ministry-scheduling API access
//!
//! [`fetcher`] wraps the HTTP client with retry, backoff and pagination;
//! [`resources`] holds the JSON:API document types and the path builders for
//! every upstream endpoint the engine reads.

pub mod fetcher;
pub mod resources;

pub use fetcher::{FetchError, FetchPolicy, PagedDocuments, RateLimitedFetcher};
pub use resources::{Included, Resource};
