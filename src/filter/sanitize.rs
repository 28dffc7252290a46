//! `$badfilter` cancellation.
//!
//! A bad filter cancels only its exact structural counterpart: a
//! `$badfilter` that differs by an unrelated option (for example an extra
//! `domain=` entry) leaves the target in place.

use std::collections::HashSet;

use super::FilterEntry;

/// Remove from `filters` every entry present in `bad_filters`.
#[must_use]
pub fn sanitize(
    mut filters: HashSet<FilterEntry>,
    bad_filters: &HashSet<FilterEntry>,
) -> HashSet<FilterEntry> {
    if bad_filters.is_empty() {
        return filters;
    }

    let before = filters.len();
    filters.retain(|entry| !bad_filters.contains(entry));
    tracing::debug!(
        cancelled = before - filters.len(),
        bad_filters = bad_filters.len(),
        "applied badfilter cancellations"
    );
    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{ContentTypes, Pattern};

    fn host(h: &str) -> FilterEntry {
        FilterEntry::new(Pattern::host(h, ""))
    }

    #[test]
    fn should_remove_exact_counterparts() {
        let filters: HashSet<_> = [host("a.com"), host("b.com")].into_iter().collect();
        let bad: HashSet<_> = [host("a.com")].into_iter().collect();

        let sanitized = sanitize(filters, &bad);

        assert_eq!(sanitized.len(), 1);
        assert!(sanitized.contains(&host("b.com")));
    }

    #[test]
    fn should_keep_filters_differing_by_options() {
        let target = host("a.com").with_content_types(ContentTypes::IMAGE);
        let filters: HashSet<_> = [target.clone()].into_iter().collect();
        let bad: HashSet<_> = [target.clone().with_domain("example.com", true), host("a.com")]
            .into_iter()
            .collect();

        let sanitized = sanitize(filters, &bad);

        assert!(sanitized.contains(&target));
    }

    #[test]
    fn should_return_input_when_no_bad_filters() {
        let filters: HashSet<_> = [host("a.com")].into_iter().collect();
        assert_eq!(sanitize(filters.clone(), &HashSet::new()), filters);
    }
}
