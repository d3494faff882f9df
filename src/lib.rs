//! Batch downloader for the Nexis Uni news portal.
//!
//! The portal has no programmatic API, only parameterized search URLs, and it
//! caps both the articles per download and the downloads per day. This crate
//! walks a query month by month, pages through the result listing and fetches
//! the results in batches, one request at a time, stopping cleanly when a
//! limit is reached. Rerunning resumes where the last run stopped.

pub mod config;
mod error;
pub mod logging;
mod macros;
pub mod parse;
pub mod plan;
pub mod portal;
pub mod process;
pub mod quota;
mod request;
pub mod store;
pub mod window;

pub use error::{Error, Result};

/// Articles the portal packs into one download at most.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Results the portal lets a single query reach.
pub const DEFAULT_QUERY_CAP: usize = 1_000;
pub const DEFAULT_DAILY_LIMIT: usize = 50;

/// Relative to the configured base URL, which always ends with a slash.
const SEARCH_PATH: &str = "api/search";
const DOWNLOAD_PATH: &str = "api/download";
