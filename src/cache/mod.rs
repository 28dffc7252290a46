//! Bounded memoizing caches.

mod memo;

pub use memo::MemoCache;
