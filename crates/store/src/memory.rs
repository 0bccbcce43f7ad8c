//! In-memory object store for testing
//!
//! Simulates the bucket directly in process memory so engine tests can
//! assert on uploads and removals without a live S3 service. Call counts
//! are recorded for idempotence assertions.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use tokio::sync::Mutex;

use crate::{ObjectEntry, ObjectStore};

/// One stored object
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub size: u64,
    pub etag: String,
    pub last_modified_secs: i64,
}

/// In-memory bucket
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    puts: AtomicUsize,
    stats: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put_file` calls so far
    #[must_use]
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of `stat_object` calls so far
    #[must_use]
    pub fn stat_count(&self) -> usize {
        self.stats.load(Ordering::SeqCst)
    }

    /// Fetch a stored object for assertions
    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(key).cloned()
    }

    /// All stored keys in order
    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    /// Insert an object with explicit metadata, e.g. a synthetic
    /// multipart ETag or a pinned last-modified instant
    pub async fn insert_raw(
        &self,
        key: &str,
        data: Vec<u8>,
        size: u64,
        etag: &str,
        last_modified_secs: i64,
    ) {
        self.objects.lock().await.insert(
            key.to_string(),
            StoredObject {
                data,
                size,
                etag: etag.to_string(),
                last_modified_secs,
            },
        );
    }
}

fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn bucket_exists(&self) -> Result<()> {
        Ok(())
    }

    async fn stat_object(&self, key: &str) -> Result<Option<ObjectEntry>> {
        self.stats.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects.lock().await.get(key).map(|obj| ObjectEntry {
            key: key.to_string(),
            size: obj.size,
            last_modified_secs: obj.last_modified_secs,
            etag: obj.etag.clone(),
        }))
    }

    async fn put_file(&self, key: &str, local: &Path) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let data = tokio::fs::read(local)
            .await
            .map_err(|err| eyre!("reading {}: {err}", local.display()))?;
        let etag = format!("{:x}", md5::compute(&data));
        let size = data.len() as u64;
        self.objects.lock().await.insert(
            key.to_string(),
            StoredObject {
                data,
                size,
                etag,
                last_modified_secs: now_epoch_secs(),
            },
        );
        Ok(())
    }

    async fn remove_object(&self, key: &str) -> Result<()> {
        self.objects.lock().await.remove(key);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn remove_objects(&self, keys: &[String]) -> Result<()> {
        let mut objects = self.objects.lock().await;
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_then_stat() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "hello world").unwrap();

        let store = MemoryStore::new();
        store.put_file("backup/f", &file).await.unwrap();

        let entry = store.stat_object("backup/f").await.unwrap().unwrap();
        assert_eq!(entry.size, 11);
        assert_eq!(entry.etag, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert!(!entry.is_multipart());
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_stat_missing_is_none() {
        let store = MemoryStore::new();
        assert!(store.stat_object("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_and_remove_objects() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "x").unwrap();

        let store = MemoryStore::new();
        store.put_file("a/1", &file).await.unwrap();
        store.put_file("a/2", &file).await.unwrap();
        store.put_file("b/1", &file).await.unwrap();

        assert_eq!(store.list_prefix("a/").await.unwrap(), vec!["a/1", "a/2"]);

        store
            .remove_objects(&["a/1".to_string(), "a/2".to_string()])
            .await
            .unwrap();
        assert_eq!(store.keys().await, vec!["b/1"]);
    }

    #[tokio::test]
    async fn test_remove_object_tolerates_missing_key() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "x").unwrap();

        let store = MemoryStore::new();
        store.put_file("a", &file).await.unwrap();

        store.remove_object("a").await.unwrap();
        assert!(store.stat_object("a").await.unwrap().is_none());
        store.remove_object("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_multipart_etag_flag() {
        let store = MemoryStore::new();
        store
            .insert_raw("big", Vec::new(), 1 << 30, "0123abcd-42", 1_700_000_000)
            .await;
        let entry = store.stat_object("big").await.unwrap().unwrap();
        assert!(entry.is_multipart());
    }
}
