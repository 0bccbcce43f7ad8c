//! Hot-path registry: a TTL set of recently uploaded paths
//!
//! The transfer workers record every uploaded path here; the watcher
//! consults it to decide whether a write event should be coalesced
//! instead of enqueued immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Concurrent set of paths with per-entry expiry
///
/// Reads evict lazily; a background sweeper removes expired entries every
/// few seconds so the map does not grow with churn. Cloning shares the
/// underlying set.
#[derive(Clone)]
pub struct HotSet {
    entries: Arc<DashMap<PathBuf, Instant>>,
    stop: CancellationToken,
}

impl HotSet {
    /// Create the set and start its sweeper task.
    ///
    /// Must be called within a tokio runtime. Call [`HotSet::stop`] during
    /// shutdown to terminate the sweeper.
    #[must_use]
    pub fn new() -> Self {
        let set = Self {
            entries: Arc::new(DashMap::new()),
            stop: CancellationToken::new(),
        };

        let entries = Arc::clone(&set.entries);
        let stop = set.stop.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = tick.tick() => {
                        let now = Instant::now();
                        entries.retain(|_, expires_at| *expires_at > now);
                    }
                }
            }
        });

        set
    }

    /// Record `path` as hot for the next `ttl`
    pub fn insert(&self, path: &Path, ttl: Duration) {
        self.entries.insert(path.to_path_buf(), Instant::now() + ttl);
    }

    /// Whether a live entry exists for `path`; expired entries are evicted
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        let expired = match self.entries.get(path) {
            None => return false,
            Some(entry) => *entry.value() <= Instant::now(),
        };
        if expired {
            self.entries.remove(path);
            return false;
        }
        true
    }

    /// Drop the entry for `path`
    pub fn remove(&self, path: &Path) {
        self.entries.remove(path);
    }

    /// Terminate the background sweeper
    pub fn stop(&self) {
        self.stop.cancel();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HotSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_insert_and_contains() {
        let set = HotSet::new();
        let path = PathBuf::from("/data/a.txt");

        assert!(!set.contains(&path));
        set.insert(&path, Duration::from_secs(60));
        assert!(set.contains(&path));
        set.stop();
    }

    #[tokio::test]
    async fn test_expired_entry_is_evicted_on_read() {
        let set = HotSet::new();
        let path = PathBuf::from("/data/a.txt");

        set.insert(&path, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!set.contains(&path));
        assert!(set.is_empty());
        set.stop();
    }

    #[tokio::test]
    async fn test_remove() {
        let set = HotSet::new();
        let path = PathBuf::from("/data/a.txt");

        set.insert(&path, Duration::from_secs(60));
        set.remove(&path);
        assert!(!set.contains(&path));
        set.stop();
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let set = HotSet::new();
        let other = set.clone();
        let path = PathBuf::from("/data/a.txt");

        set.insert(&path, Duration::from_secs(60));
        assert!(other.contains(&path));
        set.stop();
    }
}
