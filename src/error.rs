//! Crate-level errors.

use std::io;

use thiserror::Error;

use crate::blocklist::manager::ManagerError;
use crate::response::modify::ModifyError;
use crate::rules::RuleStoreError;

/// Anything that can stop the engine from starting or persisting state.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("filter list error: {0}")]
    Lists(#[from] ManagerError),

    #[error("user rule error: {0}")]
    Rules(#[from] RuleStoreError),

    #[error("modify client error: {0}")]
    Modify(#[from] ModifyError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics error: {0}")]
    Metrics(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    ReadFile(#[source] io::Error),

    #[error("malformed config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("invalid config: {0}")]
    Validation(#[from] ValidationError),
}

/// Semantic problems in an otherwise well-formed config.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("request_timeout_secs must be greater than 0")]
    ZeroRequestTimeout,

    #[error("third_party_cache_capacity must be greater than 0")]
    ZeroThirdPartyCacheCapacity,

    #[error("theme color {name:?} cannot be empty")]
    EmptyThemeColor { name: &'static str },

    #[error("filter list id cannot be empty")]
    EmptyListId,

    #[error("duplicate filter list id: {id:?}")]
    DuplicateListId { id: String },

    #[error("filter list {id:?} has empty file path")]
    EmptyListPath { id: String },

    #[error("filter list {id:?} has empty URL")]
    EmptyListUrl { id: String },

    #[error("filter list {id:?} has invalid URL (must start with http:// or https://): {url:?}")]
    InvalidListUrl { id: String, url: String },
}

pub type Result<T> = std::result::Result<T, Error>;
