//! Time-windowed memoization of completed outcomes.
//!
//! A call whose key has a stored outcome younger than the window gets that
//! outcome back without running. This is a cache, not single-flight: calls
//! with the same key that overlap before either completes all run.

use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// A concurrent outcome cache keyed by operation identity.
#[derive(Debug)]
pub struct Dedupe<K, V>
where
    K: Eq + Hash,
{
    inner: Arc<DashMap<K, Entry<V>>>,
    window: Duration,
    prune_pending: Arc<AtomicBool>,
}

impl<K, V> Dedupe<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(window: Duration) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            window,
            prune_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Return the stored outcome for `key` if it is still inside the window.
    /// An expired entry is removed on the way out.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.inner.get(key) {
            if now.duration_since(entry.stored_at) < self.window {
                return Some(entry.value.clone());
            }
        }

        let window = self.window;
        self.inner
            .remove_if(key, |_, entry| now.duration_since(entry.stored_at) >= window);
        None
    }

    /// Store `value` under `key`, stamped with the current time.
    pub fn insert(&self, key: K, value: V) {
        self.inner.insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Replay a fresh outcome for `key`, or await `fut` and store what it yields.
    pub async fn execute<F>(&self, key: K, fut: F) -> V
    where
        F: Future<Output = V>,
    {
        if self.window.is_zero() {
            return fut.await;
        }
        if let Some(value) = self.get(&key) {
            tracing::trace!("Dedupe hit");
            return value;
        }

        let value = fut.await;
        self.insert(key, value.clone());
        self.schedule_prune();
        value
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge(&self.inner, self.window)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Prune in the background. At most one prune task is pending at a time.
    fn schedule_prune(&self) {
        if self.prune_pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let inner = self.inner.clone();
        let pending = self.prune_pending.clone();
        let window = self.window;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    purge(&inner, window);
                    pending.store(false, Ordering::Release);
                });
            }
            Err(_) => {
                purge(&inner, window);
                pending.store(false, Ordering::Release);
            }
        }
    }
}

fn purge<K: Eq + Hash, V>(map: &DashMap<K, Entry<V>>, window: Duration) -> usize {
    let now = Instant::now();
    let before = map.len();
    map.retain(|_, entry| now.duration_since(entry.stored_at) < window);
    let removed = before.saturating_sub(map.len());
    if removed > 0 {
        tracing::trace!(removed, "Pruned expired dedupe entries");
    }
    removed
}
