//! obsync-store: Object-store adapter
//!
//! Defines the [`ObjectStore`] contract the replication engine drives,
//! with an S3 implementation for production and an in-memory
//! implementation for tests.

use std::path::Path;

use async_trait::async_trait;
use color_eyre::Result;

pub mod memory;
pub mod s3;

pub use memory::MemoryStore;
pub use s3::S3Store;

/// Remote object metadata as reported by a stat call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Last-modified instant, seconds since the UNIX epoch
    pub last_modified_secs: i64,
    /// `32-hex` MD5 for single-part uploads, `<hex>-<n>` for multipart
    pub etag: String,
}

impl ObjectEntry {
    /// Whether the ETag came from a multipart upload and is therefore not
    /// a content hash
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.etag.contains('-')
    }
}

/// Contract over the object-store client
///
/// This trait allows swapping the real S3 client with an in-process
/// implementation for testing.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Verify the configured bucket exists
    async fn bucket_exists(&self) -> Result<()>;

    /// Stat a key; `None` means the object does not exist
    async fn stat_object(&self, key: &str) -> Result<Option<ObjectEntry>>;

    /// Upload the file at `local` to `key`
    async fn put_file(&self, key: &str, local: &Path) -> Result<()>;

    /// Remove a single key; a missing key is not an error
    async fn remove_object(&self, key: &str) -> Result<()>;

    /// All keys under `prefix`
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove a batch of keys. Per-key failures are logged and the last
    /// one is returned; keys that were removed stay removed.
    async fn remove_objects(&self, keys: &[String]) -> Result<()>;
}
