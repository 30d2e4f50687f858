//! Concurrent map whose entries expire.
//!
//! Entries carry their own deadline. Reads treat an expired entry as absent and
//! remove it on the spot; a background sweeper removes the ones nobody reads
//! again, so the map cannot grow without bound.

use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::lifecycle::Shutdown;

/// Longest lifetime any entry gets. Longer TTLs from tenant data are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Deadline `ttl` after `now`, clamped to [`MAX_TTL`].
pub fn deadline_after(now: Instant, ttl: Duration) -> Instant {
    let ttl = ttl.min(MAX_TTL);
    now.checked_add(ttl).unwrap_or(now)
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe TTL map. Cloning shares the underlying storage.
pub struct ExpiringMap<K, V> {
    inner: Arc<DashMap<K, Entry<V>>>,
}

impl<K, V> Clone for ExpiringMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> Default for ExpiringMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry living for `ttl`, at most [`MAX_TTL`].
    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        self.inner.insert(
            key,
            Entry {
                value,
                expires_at: deadline_after(Instant::now(), ttl),
            },
        );
    }

    /// Get a live entry.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let expired = match self.inner.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.inner.remove_if(key, |_, e| e.is_expired(now));
        }
        None
    }

    /// Replace the value of a live entry, keeping its deadline.
    pub fn update<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        let now = Instant::now();
        match self.inner.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                f(&mut entry.value);
                true
            }
            _ => false,
        }
    }

    /// Remove and return a live entry.
    pub fn take(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.inner
            .remove(key)
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(_, entry)| entry.value)
    }

    pub fn remove(&self, key: &K) {
        self.inner.remove(key);
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.inner.len())
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Spawn the background sweeper. It stops when `shutdown` fires.
    pub fn spawn_sweeper(&self, name: &'static str, interval: Duration, shutdown: &Shutdown) {
        let map = self.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = map.sweep();
                        if removed > 0 {
                            tracing::debug!(store = name, removed, "Swept expired entries");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!(store = name, "Sweeper stopped");
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_entry_is_absent() {
        let map: ExpiringMap<String, u32> = ExpiringMap::new();
        map.insert("live".into(), 1, Duration::from_secs(60));
        map.insert("dead".into(), 2, Duration::ZERO);

        assert_eq!(map.get(&"live".to_string()), Some(1));
        assert_eq!(map.get(&"dead".to_string()), None);
        // lazily removed on read
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_take_consumes() {
        let map: ExpiringMap<String, u32> = ExpiringMap::new();
        map.insert("k".into(), 5, Duration::from_secs(60));
        assert_eq!(map.take(&"k".to_string()), Some(5));
        assert_eq!(map.take(&"k".to_string()), None);
    }

    #[test]
    fn test_update_keeps_entry() {
        let map: ExpiringMap<String, u32> = ExpiringMap::new();
        map.insert("k".into(), 5, Duration::from_secs(60));
        assert!(map.update(&"k".to_string(), |v| *v = 6));
        assert!(!map.update(&"missing".to_string(), |v| *v = 6));
        assert_eq!(map.get(&"k".to_string()), Some(6));
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        let map: ExpiringMap<String, u32> = ExpiringMap::new();
        map.insert("k".into(), 1, Duration::from_secs(u64::MAX));
        assert_eq!(map.get(&"k".to_string()), Some(1));

        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::MAX), now + MAX_TTL);
    }

    #[test]
    fn test_sweep() {
        let map: ExpiringMap<u32, u32> = ExpiringMap::new();
        for i in 0..10 {
            map.insert(i, i, Duration::ZERO);
        }
        map.insert(99, 99, Duration::from_secs(60));
        assert_eq!(map.sweep(), 10);
        assert_eq!(map.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_shutdown() {
        let map: ExpiringMap<u32, u32> = ExpiringMap::new();
        let shutdown = Shutdown::new();
        map.spawn_sweeper("test", Duration::from_millis(10), &shutdown);
        assert_eq!(shutdown.receiver_count(), 1);

        shutdown.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(shutdown.receiver_count(), 0);
    }
}
