//! MD5 hashing with a metadata-keyed cache
//!
//! Object-store ETags for single-part uploads are the MD5 of the object
//! body, so MD5 (not a stronger hash) is what equivalence checks need.
//! The cache memoizes per-path digests keyed on `(mtime, size)`.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use color_eyre::Result;
use dashmap::DashMap;

/// Hex MD5 of a file's contents, streamed in 64KB chunks
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn file_md5(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        context.consume(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", context.compute()))
}

/// Hex MD5 of a string, used for symlink target bodies
#[must_use]
pub fn str_md5(s: &str) -> String {
    format!("{:x}", md5::compute(s.as_bytes()))
}

#[derive(Clone)]
struct HashRecord {
    mtime: SystemTime,
    size: u64,
    md5: String,
}

/// Concurrent path-to-digest cache keyed on `(mtime, size)`
///
/// If a record exists and the file's current metadata matches, the stored
/// digest is returned without rereading the file. A failed hash leaves no
/// entry behind.
#[derive(Default)]
pub struct Md5Cache {
    records: DashMap<PathBuf, HashRecord>,
}

impl Md5Cache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// MD5 of the file at `path`, served from cache when `(mtime, size)`
    /// is unchanged
    ///
    /// # Errors
    /// Returns an error if the file is missing or unreadable.
    pub fn md5(&self, path: &Path) -> Result<String> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta.modified()?;
        let size = meta.len();

        if let Some(record) = self.records.get(path) {
            if record.mtime == mtime && record.size == size {
                return Ok(record.md5.clone());
            }
        }

        let md5 = file_md5(path)?;
        self.records
            .insert(path.to_path_buf(), HashRecord {
                mtime,
                size,
                md5: md5.clone(),
            });
        Ok(md5)
    }

    /// Drop the record for `path`
    pub fn invalidate(&self, path: &Path) {
        self.records.remove(path);
    }

    /// Drop every record
    pub fn clear(&self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_file_md5_known_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        fs::write(&path, "hello world").unwrap();

        assert_eq!(
            file_md5(&path).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn test_str_md5_empty() {
        assert_eq!(str_md5(""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_cache_hit_on_unchanged_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "content").unwrap();

        let cache = Md5Cache::new();
        let first = cache.md5(&path).unwrap();
        let second = cache.md5(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, file_md5(&path).unwrap());
    }

    #[test]
    fn test_cache_recomputes_after_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "one").unwrap();

        let cache = Md5Cache::new();
        let first = cache.md5(&path).unwrap();

        // Different length guarantees a (mtime, size) mismatch even on
        // filesystems with coarse timestamps.
        fs::write(&path, "other contents").unwrap();
        let second = cache.md5(&path).unwrap();
        assert_ne!(first, second);
        assert_eq!(second, file_md5(&path).unwrap());
    }

    #[test]
    fn test_missing_file_errors_and_leaves_no_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone");

        let cache = Md5Cache::new();
        assert!(cache.md5(&path).is_err());

        fs::write(&path, "now it exists").unwrap();
        assert_eq!(cache.md5(&path).unwrap(), file_md5(&path).unwrap());
    }

    #[test]
    fn test_invalidate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "data").unwrap();

        let cache = Md5Cache::new();
        let first = cache.md5(&path).unwrap();
        cache.invalidate(&path);
        assert_eq!(cache.md5(&path).unwrap(), first);
    }
}
