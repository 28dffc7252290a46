//! Memoizing cache with bounded size and single-flight computation.
//!
//! Backed by a synchronous Moka cache:
//! - Least-recently-used eviction once `capacity` entries are held
//! - Concurrent misses on the same key run the compute closure once; the
//!   other callers wait for and share its result
//! - Misses on different keys compute independently

use std::hash::Hash;

use moka::policy::EvictionPolicy;
use moka::sync::Cache;

#[derive(Clone)]
pub struct MemoCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, V>,
}

impl<K, V> MemoCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self { inner }
    }

    /// Return the cached value for `key`, computing it with `compute` on a miss.
    pub fn get_or_compute(&self, key: K, compute: impl FnOnce() -> V) -> V {
        self.inner.get_with(key, compute)
    }

    /// Return the cached value without computing.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }

    /// Approximate number of cached entries.
    ///
    /// Eviction is applied lazily; call [`sync`](Self::sync) first for an
    /// exact figure.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Apply pending evictions.
    pub fn sync(&self) {
        self.inner.run_pending_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn should_compute_once_and_reuse() {
        let cache = MemoCache::new(16);
        let calls = AtomicU64::new(0);

        for _ in 0..3 {
            let value = cache.get_or_compute("key", || {
                calls.fetch_add(1, Ordering::SeqCst);
                42
            });
            assert_eq!(value, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&"key"), Some(42));
    }

    #[test]
    fn should_run_single_flight_under_contention() {
        let cache = Arc::new(MemoCache::new(16));
        let calls = Arc::new(AtomicU64::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_compute("shared".to_string(), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        true
                    })
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn should_bound_entry_count() {
        let cache = MemoCache::new(4);
        for i in 0..64 {
            cache.get_or_compute(i, || i * 2);
        }
        cache.sync();

        assert!(cache.entry_count() <= 4);
    }
}
