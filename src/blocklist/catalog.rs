//! Filter list metadata.
//!
//! The engine only needs identity, source and the `enabled` flag of each
//! list; the catalog is whatever store the host application keeps them in.

use std::future::Future;
use std::io;

use crate::config::{ListConfig, ListSource};

/// Metadata of one filter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListMetadata {
    pub id: String,
    pub title: String,
    pub source: ListSource,
    pub enabled: bool,
    /// Unix timestamp of the last successful local refresh, if known.
    pub last_local_update: Option<u64>,
}

/// Source of filter list metadata.
pub trait ListCatalog: Send + Sync {
    /// Every known list, enabled or not.
    fn get_all(&self) -> impl Future<Output = io::Result<Vec<ListMetadata>>> + Send;
}

/// Catalog backed by the `[[lists]]` configuration section.
#[derive(Debug, Clone, Default)]
pub struct ConfigCatalog {
    lists: Vec<ListMetadata>,
}

impl ConfigCatalog {
    #[must_use]
    pub fn new(lists: &[ListConfig]) -> Self {
        let lists = lists
            .iter()
            .map(|list| ListMetadata {
                id: list.id.clone(),
                title: if list.title.is_empty() {
                    list.id.clone()
                } else {
                    list.title.clone()
                },
                source: list.source.clone(),
                enabled: list.enabled,
                last_local_update: None,
            })
            .collect();
        Self { lists }
    }
}

impl ListCatalog for ConfigCatalog {
    async fn get_all(&self) -> io::Result<Vec<ListMetadata>> {
        Ok(self.lists.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_expose_configured_lists() {
        let catalog = ConfigCatalog::new(&[
            ListConfig {
                id: "easylist".into(),
                title: String::new(),
                enabled: true,
                source: ListSource::Remote {
                    url: "https://easylist.to/easylist/easylist.txt".into(),
                },
            },
            ListConfig {
                id: "local".into(),
                title: "Local rules".into(),
                enabled: false,
                source: ListSource::File {
                    path: "/tmp/local.txt".into(),
                },
            },
        ]);

        let lists = catalog.get_all().await.unwrap();

        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].title, "easylist");
        assert_eq!(lists[1].title, "Local rules");
        assert!(!lists[1].enabled);
    }
}
