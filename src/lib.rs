//! Netsieve - request filtering for embedded browsers.
//!
//! Netsieve decides, for every request a page issues, whether to let it
//! through, block it and serve a substitute response, or rewrite and
//! re-issue it. Filter lists are merged into one container per filter
//! category and cached on disk as joint files, so a cold start does not
//! re-parse the raw lists.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`]: Configuration loading and validation
//! - [`filter`]: Filter categories, entries, parsing and the live store
//! - [`blocklist`]: List loading, joint file cache and rebuilds
//! - [`request`]: Request normalization and third-party classification
//! - [`rules`]: User-authored override rules
//! - [`dispatch`]: The block/allow/modify decision
//! - [`response`]: Substitute responses and modified requests
//! - [`engine`]: The facade tying the pieces together
//! - [`error`]: Error types
//!
//! # Testing
//!
//! Collaborators sit behind traits, so components can be exercised without
//! disk or network access:
//!
//! ```rust
//! use netsieve::filter::sanitize::sanitize;
//! use netsieve::filter::{FilterCategory, FilterEntry, FilterTag, Pattern};
//! use std::collections::HashSet;
//!
//! let ad = FilterEntry::new(Pattern::host("ads.example.com", ""));
//! let kept = sanitize(HashSet::from([ad.clone()]), &HashSet::from([ad]));
//! assert!(kept.is_empty());
//! assert_eq!(FilterTag::BadFilter(FilterCategory::Deny).category(), FilterCategory::Deny);
//! ```

pub mod blocklist;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod filter;
pub mod gate;
pub mod metrics;
pub mod request;
pub mod response;
pub mod rules;

pub use config::Config;
pub use engine::FilterEngine;
pub use error::{Error, Result};
