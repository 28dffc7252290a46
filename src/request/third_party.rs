//! First/third-party classification with memoized public-suffix lookups.

use std::net::IpAddr;
use std::sync::Arc;

use super::ThirdPartyStatus;
use crate::cache::MemoCache;

/// Default number of memoized host pairs.
pub const DEFAULT_CAPACITY: u64 = 2048;

/// Decides whether two hosts belong to the same site.
pub trait SiteComparator: Send + Sync {
    fn same_site(&self, request_host: &str, page_host: &str) -> bool;
}

/// Compares registrable domains (public suffix plus one label).
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicSuffixComparator;

impl SiteComparator for PublicSuffixComparator {
    fn same_site(&self, request_host: &str, page_host: &str) -> bool {
        let request_site = psl::domain_str(request_host).unwrap_or(request_host);
        let page_site = psl::domain_str(page_host).unwrap_or(page_host);
        request_site.eq_ignore_ascii_case(page_site)
    }
}

/// Memoizing first/third-party classifier.
///
/// Verdicts are keyed by the unordered host pair and kept for the lifetime
/// of the classifier.
pub struct ThirdPartyClassifier {
    cache: MemoCache<(Box<str>, Box<str>), bool>,
    comparator: Arc<dyn SiteComparator>,
}

impl ThirdPartyClassifier {
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self::with_comparator(capacity, Arc::new(PublicSuffixComparator))
    }

    #[must_use]
    pub fn with_comparator(capacity: u64, comparator: Arc<dyn SiteComparator>) -> Self {
        Self {
            cache: MemoCache::new(capacity),
            comparator,
        }
    }

    /// Classify a request host against the page host.
    ///
    /// Identical hosts are `StrictFirstParty` without touching the cache.
    #[must_use]
    pub fn classify(&self, request_host: &str, page_host: &str) -> ThirdPartyStatus {
        if request_host.eq_ignore_ascii_case(page_host) {
            return ThirdPartyStatus::StrictFirstParty;
        }

        let key = if request_host <= page_host {
            (Box::from(request_host), Box::from(page_host))
        } else {
            (Box::from(page_host), Box::from(request_host))
        };

        let third_party = self.cache.get_or_compute(key, || {
            is_ip_literal(request_host)
                || is_ip_literal(page_host)
                || !self.comparator.same_site(request_host, page_host)
        });

        if third_party {
            ThirdPartyStatus::ThirdParty
        } else {
            ThirdPartyStatus::FirstParty
        }
    }
}

impl Default for ThirdPartyClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn is_ip_literal(host: &str) -> bool {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Comparator counting how often it is consulted.
    #[derive(Default)]
    struct CountingComparator {
        calls: AtomicU64,
    }

    impl SiteComparator for CountingComparator {
        fn same_site(&self, request_host: &str, page_host: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            PublicSuffixComparator.same_site(request_host, page_host)
        }
    }

    #[test]
    fn should_classify_identical_hosts_as_strict_first_party() {
        let classifier = ThirdPartyClassifier::default();
        for host in ["example.com", "a.b.example.co.uk", "192.168.1.1"] {
            assert_eq!(
                classifier.classify(host, host),
                ThirdPartyStatus::StrictFirstParty
            );
        }
    }

    #[test]
    fn should_classify_same_registrable_domain_as_first_party() {
        let classifier = ThirdPartyClassifier::default();
        assert_eq!(
            classifier.classify("cdn.example.com", "www.example.com"),
            ThirdPartyStatus::FirstParty
        );
        assert_eq!(
            classifier.classify("static.bbc.co.uk", "news.bbc.co.uk"),
            ThirdPartyStatus::FirstParty
        );
    }

    #[test]
    fn should_classify_different_sites_as_third_party() {
        let classifier = ThirdPartyClassifier::default();
        assert_eq!(
            classifier.classify("ads.tracker.net", "example.com"),
            ThirdPartyStatus::ThirdParty
        );
        assert_eq!(
            classifier.classify("foo.co.uk", "bar.co.uk"),
            ThirdPartyStatus::ThirdParty
        );
    }

    #[test]
    fn should_always_treat_ip_literals_as_third_party() {
        let comparator = Arc::new(CountingComparator::default());
        let classifier = ThirdPartyClassifier::with_comparator(16, comparator.clone());

        assert_eq!(
            classifier.classify("10.0.0.1", "example.com"),
            ThirdPartyStatus::ThirdParty
        );
        assert_eq!(
            classifier.classify("[::1]", "localhost"),
            ThirdPartyStatus::ThirdParty
        );
        assert_eq!(comparator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn should_memoize_per_unordered_pair() {
        let comparator = Arc::new(CountingComparator::default());
        let classifier = ThirdPartyClassifier::with_comparator(16, comparator.clone());

        let first = classifier.classify("cdn.example.com", "www.example.com");
        let second = classifier.classify("cdn.example.com", "www.example.com");
        let swapped = classifier.classify("www.example.com", "cdn.example.com");

        assert_eq!(first, second);
        assert_eq!(first, swapped);
        assert_eq!(comparator.calls.load(Ordering::SeqCst), 1);
    }
}
