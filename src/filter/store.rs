//! Per-category filter containers and the swappable set consulted at
//! dispatch time.
//!
//! Containers are built off to the side and published as a complete
//! [`CategorySet`] through an atomic pointer swap, so readers only ever see
//! a fully populated old set or a fully populated new one.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::{FilterCategory, FilterEntry};
use crate::request::ContentRequest;

/// Matching container for the filters of one category.
///
/// Host-anchored filters are indexed by host and found by walking the
/// request host's parent domains; everything else is scanned linearly.
#[derive(Debug, Default, Clone)]
pub struct FilterContainer {
    by_host: HashMap<String, Vec<FilterEntry>>,
    generic: Vec<FilterEntry>,
    len: usize,
}

impl FilterContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: FilterEntry) {
        match entry.pattern.index_host() {
            Some(host) => self.by_host.entry(host.to_string()).or_default().push(entry),
            None => self.generic.push(entry),
        }
        self.len += 1;
    }

    /// The most specific filter matching `request`, if any.
    #[must_use]
    pub fn best_match(&self, request: &ContentRequest) -> Option<&FilterEntry> {
        let parents = std::iter::successors(Some(request.host.as_str()), |part| {
            part.find('.').map(|idx| &part[idx + 1..])
        });

        parents
            .filter_map(|part| self.by_host.get(part))
            .flatten()
            .chain(self.generic.iter())
            .filter(|entry| entry.matches(request))
            .max_by_key(|entry| entry.pattern.specificity())
    }

    pub fn entries(&self) -> impl Iterator<Item = &FilterEntry> {
        self.by_host.values().flatten().chain(self.generic.iter())
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl FromIterator<FilterEntry> for FilterContainer {
    fn from_iter<I: IntoIterator<Item = FilterEntry>>(iter: I) -> Self {
        let mut container = Self::new();
        for entry in iter {
            container.add(entry);
        }
        container
    }
}

/// One container per category. Missing categories behave as empty.
#[derive(Debug, Default, Clone)]
pub struct CategorySet {
    containers: HashMap<FilterCategory, Arc<FilterContainer>>,
}

impl CategorySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: FilterCategory, container: Arc<FilterContainer>) {
        self.containers.insert(category, container);
    }

    #[must_use]
    pub fn get(&self, category: FilterCategory) -> Option<&Arc<FilterContainer>> {
        self.containers.get(&category)
    }

    /// Best match for `request` in `category`.
    #[must_use]
    pub fn best_match(
        &self,
        category: FilterCategory,
        request: &ContentRequest,
    ) -> Option<&FilterEntry> {
        self.containers.get(&category)?.best_match(request)
    }

    /// Number of filters per category.
    #[must_use]
    pub fn counts(&self) -> HashMap<FilterCategory, usize> {
        self.containers
            .iter()
            .map(|(category, container)| (*category, container.len()))
            .collect()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.containers.values().map(|c| c.len()).sum()
    }
}

/// The currently published [`CategorySet`].
#[derive(Debug, Default)]
pub struct FilterStore {
    current: ArcSwap<CategorySet>,
}

impl FilterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A consistent view of every category for the duration of one lookup.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CategorySet> {
        self.current.load_full()
    }

    /// Publish a fully built set, replacing the previous one.
    pub fn replace(&self, set: CategorySet) {
        tracing::debug!(filters = set.total(), "publishing filter categories");
        self.current.store(Arc::new(set));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{ContentType, ContentTypes, Pattern};
    use crate::request::ThirdPartyStatus;

    fn request(url: &str) -> ContentRequest {
        ContentRequest::for_test(
            url,
            Some("example.com"),
            ContentType::Image,
            ThirdPartyStatus::ThirdParty,
        )
    }

    #[test]
    fn should_find_host_filters_through_parent_domains() {
        let container: FilterContainer =
            [FilterEntry::new(Pattern::host("example.net", ""))].into_iter().collect();

        assert!(container.best_match(&request("http://a.b.example.net/x.png")).is_some());
        assert!(container.best_match(&request("http://example.org/x.png")).is_none());
    }

    #[test]
    fn should_prefer_most_specific_match() {
        let container: FilterContainer = [
            FilterEntry::new(Pattern::host("example.net", "")),
            FilterEntry::new(Pattern::host("ads.example.net", "/banner")),
            FilterEntry::new(Pattern::Substring("banner".into())),
        ]
        .into_iter()
        .collect();

        let best = container
            .best_match(&request("http://ads.example.net/banner.png"))
            .unwrap();
        assert_eq!(best.pattern, Pattern::host("ads.example.net", "/banner"));
    }

    #[test]
    fn should_skip_filters_that_do_not_apply() {
        let container: FilterContainer = [FilterEntry::new(Pattern::host("ads.example.net", ""))
            .with_content_types(ContentTypes::SCRIPT)]
        .into_iter()
        .collect();

        assert!(container.best_match(&request("http://ads.example.net/a.png")).is_none());
    }

    #[test]
    fn should_count_entries() {
        let container: FilterContainer = [
            FilterEntry::new(Pattern::host("a.com", "")),
            FilterEntry::new(Pattern::Substring("/ads/".into())),
        ]
        .into_iter()
        .collect();

        assert_eq!(container.len(), 2);
        assert_eq!(container.entries().count(), 2);
        assert!(!container.is_empty());
    }

    #[test]
    fn should_swap_whole_sets_without_disturbing_held_snapshots() {
        let store = FilterStore::new();
        let mut first = CategorySet::new();
        first.insert(
            FilterCategory::Deny,
            Arc::new([FilterEntry::new(Pattern::host("a.com", ""))].into_iter().collect()),
        );
        store.replace(first);

        let held = store.snapshot();
        store.replace(CategorySet::new());

        assert_eq!(held.total(), 1);
        assert_eq!(store.snapshot().total(), 0);
    }
}
