//! Filter list lifecycle: list metadata, raw list loading, the joint file
//! cache and the [`ListLoader`](manager::ListLoader) tying them together.
//!
//! # Example
//!
//! ```
//! use netsieve::blocklist::joint;
//! use netsieve::filter::{FilterCategory, FilterEntry, Pattern};
//!
//! let entry = FilterEntry::new(Pattern::host("ads.example.com", ""));
//! let bytes = joint::encode(FilterCategory::Deny, std::iter::once(&entry)).unwrap();
//! assert_eq!(joint::decode(FilterCategory::Deny, &bytes).unwrap(), vec![entry]);
//! ```

pub mod catalog;
pub mod joint;
pub mod loader;
pub mod manager;
pub mod remote;

use std::io::BufReader;

use tokio::task::JoinError;

use crate::filter::{AbpParser, FilterParser, ParseError, ParsedFilter};

pub use catalog::{ConfigCatalog, ListCatalog, ListMetadata};
pub use manager::{ListLoader, LoadResult, ManagerError};

/// Parse raw list content on the blocking pool.
async fn parse_in_background(
    content: String,
) -> Result<Result<Vec<ParsedFilter>, ParseError>, JoinError> {
    tokio::task::spawn_blocking(move || {
        let mut reader = BufReader::new(content.as_bytes());
        AbpParser.parse(&mut reader)
    })
    .await
}
