//! List loading with a per-category joint file cache.
//!
//! A cold start reads every category from its joint file. Categories whose
//! file is missing or rejected are rebuilt from the raw lists named by the
//! [`ListCatalog`], sanitized against their `$badfilter` counterparts and
//! written back. The finished set is published to the [`FilterStore`] in a
//! single swap.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::catalog::{ListCatalog, ListMetadata};
use super::joint::{self, JointError};
use super::loader::{FileLoader, LoadError};
use super::remote::{RemoteLoadError, RemoteLoader};
use crate::config::ListSource;
use crate::filter::sanitize::sanitize;
use crate::filter::{
    CategorySet, FilterCategory, FilterContainer, FilterEntry, FilterStore, FilterTag,
    ParsedFilter,
};

/// Error type for list loading operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("failed to read list catalog")]
    Catalog(#[source] std::io::Error),

    #[error("failed to load file list")]
    FileLoad(#[from] LoadError),

    #[error("failed to load remote list")]
    RemoteLoad(#[from] RemoteLoadError),

    #[error("joint file error")]
    Joint(#[from] JointError),
}

/// Outcome of one [`ListLoader::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadResult {
    /// Every category was served from its joint file.
    pub from_cache: bool,
    /// Categories rebuilt from raw lists.
    pub rebuilt: Vec<FilterCategory>,
    /// Filters per category in the published set.
    pub counts: BTreeMap<FilterCategory, usize>,
    /// Ids of enabled lists that could not be loaded.
    pub failed_lists: Vec<String>,
    /// The catalog could not be read, so rejected categories were published
    /// empty.
    pub catalog_unavailable: bool,
}

/// Loads filter categories into a [`FilterStore`].
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use netsieve::blocklist::{ConfigCatalog, ListLoader};
/// use netsieve::config::Config;
/// use netsieve::filter::FilterStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::load("config.toml")?;
/// let loader = ListLoader::new(
///     ConfigCatalog::new(&config.lists),
///     config.cache_dir(),
///     Duration::from_secs(config.request_timeout_secs),
/// )?;
/// let store = FilterStore::new();
/// let result = loader.load(&store).await?;
/// println!("{} filters", result.counts.values().sum::<usize>());
/// # Ok(())
/// # }
/// ```
pub struct ListLoader<C> {
    catalog: C,
    joint_dir: PathBuf,
    remote_loader: RemoteLoader,
}

impl<C: ListCatalog> ListLoader<C> {
    /// Create a loader keeping joint files and list copies under `cache_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(catalog: C, cache_dir: PathBuf, timeout: Duration) -> Result<Self, ManagerError> {
        let remote_loader = RemoteLoader::new(cache_dir.join("lists"), timeout)?;
        Ok(Self {
            catalog,
            joint_dir: cache_dir.join("joint"),
            remote_loader,
        })
    }

    /// Directory holding the joint files.
    #[must_use]
    pub fn joint_dir(&self) -> &Path {
        &self.joint_dir
    }

    /// Load every category and publish the result to `store`.
    ///
    /// Individual list failures are logged and reported in
    /// [`LoadResult::failed_lists`]; they do not fail the load. When the
    /// catalog cannot be read, the categories accepted from joint files are
    /// still published and [`LoadResult::catalog_unavailable`] is set.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Catalog`] if the catalog cannot be read and no
    /// category was accepted from its joint file. `store` is left untouched.
    pub async fn load(&self, store: &FilterStore) -> Result<LoadResult, ManagerError> {
        let mut set = CategorySet::new();
        let mut invalid = Vec::new();

        for category in FilterCategory::ALL {
            match joint::read(&self.joint_dir, category).await {
                Ok(container) => {
                    tracing::debug!(
                        category = %category,
                        count = container.len(),
                        "loaded category from joint file"
                    );
                    set.insert(category, Arc::new(container));
                }
                Err(JointError::Missing(_)) => invalid.push(category),
                Err(err) => {
                    tracing::warn!(
                        category = %category,
                        error = %err,
                        "rejected joint file, rebuilding category"
                    );
                    crate::metrics::record_joint_rejected(category);
                    invalid.push(category);
                }
            }
        }

        let mut result = LoadResult {
            from_cache: invalid.is_empty(),
            ..LoadResult::default()
        };

        if !invalid.is_empty() {
            match self.catalog.get_all().await {
                Ok(lists) => {
                    let (containers, failed_lists) = self.rebuild(&lists, &invalid).await;
                    for (category, container) in containers {
                        set.insert(category, Arc::new(container));
                    }
                    result.rebuilt = invalid;
                    result.failed_lists = failed_lists;
                }
                Err(err) if invalid.len() < FilterCategory::ALL.len() => {
                    tracing::error!(
                        error = %err,
                        missing = ?invalid,
                        "list catalog unavailable, publishing cached categories only"
                    );
                    result.catalog_unavailable = true;
                }
                Err(err) => return Err(ManagerError::Catalog(err)),
            }
        }

        result.counts = set.counts().into_iter().collect();
        tracing::info!(
            from_cache = result.from_cache,
            rebuilt = result.rebuilt.len(),
            filters = set.total(),
            "filter categories loaded"
        );
        store.replace(set);
        Ok(result)
    }

    /// Delete every joint file, forcing the next load to rebuild.
    ///
    /// # Errors
    ///
    /// Returns the first filesystem error other than a missing file.
    pub async fn remove_joint_lists(&self) -> Result<(), ManagerError> {
        for category in FilterCategory::ALL {
            joint::remove(&self.joint_dir, category).await?;
        }
        tracing::debug!(dir = ?self.joint_dir, "removed joint files");
        Ok(())
    }

    /// Rebuild `categories` from the enabled lists.
    async fn rebuild(
        &self,
        lists: &[ListMetadata],
        categories: &[FilterCategory],
    ) -> (Vec<(FilterCategory, FilterContainer)>, Vec<String>) {
        let wanted: HashSet<FilterCategory> = categories.iter().copied().collect();
        let mut active: HashMap<FilterCategory, HashSet<FilterEntry>> = HashMap::new();
        let mut bad: HashMap<FilterCategory, HashSet<FilterEntry>> = HashMap::new();
        let mut failed = Vec::new();

        for list in lists.iter().filter(|list| list.enabled) {
            match self.load_list(list).await {
                Ok(filters) => {
                    tracing::info!(name = ?list.id, count = filters.len(), "loaded filter list");
                    for ParsedFilter { tag, entry } in filters {
                        if !wanted.contains(&tag.category()) {
                            continue;
                        }
                        let bucket = match tag {
                            FilterTag::Active(category) => active.entry(category),
                            FilterTag::BadFilter(category) => bad.entry(category),
                        };
                        bucket.or_default().insert(entry);
                    }
                }
                Err(err) => {
                    tracing::error!(name = ?list.id, error = ?err, "failed to load filter list");
                    failed.push(list.id.clone());
                }
            }
        }

        let mut containers = Vec::with_capacity(categories.len());
        for &category in categories {
            let filters = active.remove(&category).unwrap_or_default();
            let bad_filters = bad.remove(&category).unwrap_or_default();
            let container: FilterContainer = sanitize(filters, &bad_filters).into_iter().collect();

            // An incomplete rebuild must not be cached, the next start retries it.
            if failed.is_empty() {
                if let Err(err) = joint::write(&self.joint_dir, category, &container).await {
                    tracing::warn!(
                        category = %category,
                        error = ?err,
                        "failed to write joint file"
                    );
                }
            }

            tracing::debug!(category = %category, count = container.len(), "rebuilt category");
            containers.push((category, container));
        }

        if !failed.is_empty() {
            tracing::warn!(
                failed = failed.len(),
                "skipped joint file write-back after list failures"
            );
        }

        (containers, failed)
    }

    async fn load_list(&self, list: &ListMetadata) -> Result<Vec<ParsedFilter>, ManagerError> {
        match &list.source {
            ListSource::File { path } => {
                tracing::debug!(name = ?list.id, path = ?path, "loading file list");
                Ok(FileLoader::load(path).await?)
            }
            ListSource::Remote { url } => {
                tracing::debug!(name = ?list.id, url = %url, "loading remote list");
                Ok(self.remote_loader.load_cached(&list.id, url).await?)
            }
        }
    }
}
