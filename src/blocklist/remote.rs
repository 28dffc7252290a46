//! Filter lists downloaded over HTTP.
//!
//! Every successful download refreshes a raw copy on disk, so a list that
//! cannot be fetched still loads from its last good copy.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;

use super::parse_in_background;
use crate::filter::{ParseError, ParsedFilter};

/// User-Agent sent with every request the engine issues.
pub const USER_AGENT: &str = concat!("netsieve/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum RemoteLoadError {
    #[error("{url} answered with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timeout fetching {url}")]
    Timeout { url: String },

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The download failed and no earlier copy exists.
    #[error("no local copy at {0:?}")]
    NoCopy(PathBuf),

    #[error("local copy I/O error for {path:?}: {source}")]
    CopyIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

impl RemoteLoadError {
    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

/// Downloads filter lists, keeping the last good copy of each.
pub struct RemoteLoader {
    client: Client,
    copies_dir: PathBuf,
}

impl RemoteLoader {
    /// Create a loader keeping list copies in `copies_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(copies_dir: PathBuf, timeout: Duration) -> Result<Self, RemoteLoadError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(RemoteLoadError::ClientBuild)?;

        Ok(Self { client, copies_dir })
    }

    /// Download and parse the list at `url` without touching the copies.
    ///
    /// # Errors
    ///
    /// Fails on network errors, timeouts and non-success statuses.
    pub async fn load(&self, url: &str) -> Result<Vec<ParsedFilter>, RemoteLoadError> {
        let content = self.download(url).await?;
        Ok(parse_in_background(content).await??)
    }

    /// Download the list `id` from `url`, refreshing its copy, or fall back
    /// to the copy when the download fails.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteLoadError::NoCopy`] if the download fails and the
    /// list was never downloaded before.
    pub async fn load_cached(
        &self,
        id: &str,
        url: &str,
    ) -> Result<Vec<ParsedFilter>, RemoteLoadError> {
        let copy = self.copy_path(id);

        let content = match self.download(url).await {
            Ok(content) => {
                if let Err(err) = store_copy(&copy, &content).await {
                    tracing::warn!(path = ?copy, error = %err, "failed to keep filter list copy");
                }
                content
            }
            Err(err) => {
                tracing::warn!(url, error = %err, "download failed, using local copy");
                read_copy(&copy).await?
            }
        };

        Ok(parse_in_background(content).await??)
    }

    async fn download(&self, url: &str) -> Result<String, RemoteLoadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| RemoteLoadError::from_reqwest(url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteLoadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content = response
            .text()
            .await
            .map_err(|err| RemoteLoadError::from_reqwest(url, err))?;
        tracing::debug!(url, bytes = content.len(), "downloaded filter list");
        Ok(content)
    }

    fn copy_path(&self, id: &str) -> PathBuf {
        self.copies_dir.join(format!("{id}.txt"))
    }
}

/// Replace the copy at `path` through a temporary sibling.
async fn store_copy(path: &Path, content: &str) -> Result<(), RemoteLoadError> {
    let copy_io = |source| RemoteLoadError::CopyIo {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(copy_io)?;
    }
    let tmp = path.with_extension("txt.tmp");
    tokio::fs::write(&tmp, content).await.map_err(copy_io)?;
    tokio::fs::rename(&tmp, path).await.map_err(copy_io)?;
    Ok(())
}

async fn read_copy(path: &Path) -> Result<String, RemoteLoadError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            tracing::info!(path = ?path, "loaded filter list from local copy");
            Ok(content)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(RemoteLoadError::NoCopy(path.to_path_buf()))
        }
        Err(source) => Err(RemoteLoadError::CopyIo {
            path: path.to_path_buf(),
            source,
        }),
    }
}
