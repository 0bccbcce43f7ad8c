//! Transfer workers: consume the upload and delete queues
//!
//! Every worker runs the same loop over both queues. Uploads walk the
//! dequeued path (a directory arriving via rename produces no events for
//! its children), mark each entry hot, and upload whatever differs from
//! the remote. Deletes remove the key and everything under it, guarding
//! against keys that merely share a textual prefix.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use obsync_core::config::SymlinkPolicy;
use obsync_core::{HotSet, KeyMap};
use obsync_store::ObjectStore;

use crate::compare::Comparator;

/// Sentinel returned by the upload routine when policy dictates no work,
/// e.g. `symlink: skip` or a non-empty directory
#[derive(Debug, Error)]
#[error("transfer skipped by policy")]
pub struct SkipTransfer;

/// Queue receiver shared by the worker pool
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<PathBuf>>>;

/// Wrap a queue receiver for sharing across workers
#[must_use]
pub fn shared(rx: mpsc::Receiver<PathBuf>) -> SharedReceiver {
    Arc::new(Mutex::new(rx))
}

/// One transfer worker's dependencies; the pool shares a single instance
pub struct Transfer {
    store: Arc<dyn ObjectStore>,
    compare: Arc<Comparator>,
    keymap: KeyMap,
    hotset: HotSet,
    hot_delay: Duration,
    symlink: SymlinkPolicy,
}

impl Transfer {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        compare: Arc<Comparator>,
        keymap: KeyMap,
        hotset: HotSet,
        hot_delay: Duration,
        symlink: SymlinkPolicy,
    ) -> Self {
        Self {
            store,
            compare,
            keymap,
            hotset,
            hot_delay,
            symlink,
        }
    }

    /// Worker loop: drain both queues until cancellation or queue close
    pub async fn run(
        self: Arc<Self>,
        upload_rx: SharedReceiver,
        delete_rx: SharedReceiver,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                path = recv(&upload_rx) => match path {
                    Some(path) => self.handle_upload(&path, &cancel).await,
                    None => break,
                },
                path = recv(&delete_rx) => match path {
                    Some(path) => self.handle_delete(&path).await,
                    None => break,
                },
            }
        }
    }

    /// Upload `path` and everything under it
    pub async fn handle_upload(&self, path: &Path, cancel: &CancellationToken) {
        // Transient files may be gone before the worker gets to them.
        if !path.exists() {
            debug!("path no longer exists {}", path.display());
            return;
        }

        for entry in WalkDir::new(path) {
            if cancel.is_cancelled() {
                return;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    error!("walk error under {}: {err}", path.display());
                    continue;
                }
            };
            let sub = entry.path();

            self.hotset.insert(sub, self.hot_delay);

            if self.compare.is_same(sub).await {
                debug!("in sync, skipping {}", sub.display());
                continue;
            }
            match self.put_path(sub).await {
                Ok(()) => info!("sync success, path: {}", sub.display()),
                Err(err) if err.downcast_ref::<SkipTransfer>().is_some() => {
                    debug!("skipping {}", sub.display());
                }
                Err(err) => error!("upload {} failed: {err}", sub.display()),
            }
        }
    }

    /// Remove the remote objects for a locally deleted path
    pub async fn handle_delete(&self, path: &Path) {
        // Editors that save via delete-then-create produce a transient
        // Remove; if the path is back, there is nothing to do.
        if path.exists() {
            debug!("path still exists {}", path.display());
            return;
        }

        let key = self.keymap.remote_key(path);
        let keys = match self.store.list_prefix(&key).await {
            Ok(keys) => keys,
            Err(err) => {
                error!("list prefix {key}: {err}");
                return;
            }
        };

        // Only the key itself or children below `key/` qualify; removing
        // `abc` must not take `abcd.txt` with it.
        let child_prefix = format!("{key}/");
        let victims: Vec<String> = keys
            .into_iter()
            .filter(|k| *k == key || k.starts_with(&child_prefix))
            .collect();
        if victims.is_empty() {
            debug!("nothing to remove under {key}");
            return;
        }
        for k in &victims {
            info!("will remove {k}");
        }

        match self.store.remove_objects(&victims).await {
            Ok(()) => info!("remove success, path: {}", path.display()),
            Err(err) => error!("remove objects under {key}: {err}"),
        }
    }

    /// Upload one path known to differ from its remote object.
    ///
    /// # Errors
    /// Returns [`SkipTransfer`] when policy dictates no upload, or the
    /// underlying I/O or store error otherwise.
    async fn put_path(&self, path: &Path) -> Result<()> {
        let mut key = self.keymap.remote_key(path);
        let mut source = path.to_path_buf();
        let mut staged: Option<NamedTempFile> = None;

        let meta = fs::symlink_metadata(path)?;
        if meta.file_type().is_symlink() {
            match self.symlink {
                SymlinkPolicy::Skip => return Err(SkipTransfer.into()),
                SymlinkPolicy::File if !links_to_dir(path) => {
                    debug!("symlink file {}", path.display());
                    // The link target's bytes upload under the original key.
                }
                SymlinkPolicy::File | SymlinkPolicy::Addr => {
                    debug!("symlink addr {}", path.display());
                    key.push_str(".link");
                    let target = fs::read_link(path)?;
                    let mut tmp = NamedTempFile::new()?;
                    tmp.write_all(target.to_string_lossy().as_bytes())?;
                    tmp.flush()?;
                    source = tmp.path().to_path_buf();
                    staged = Some(tmp);
                }
            }
        } else if meta.is_dir() {
            // Only empty directories materialize; children of non-empty
            // ones upload individually.
            if fs::read_dir(path)?.next().is_some() {
                return Err(SkipTransfer.into());
            }
            key.push_str("/.keep");
            let tmp = NamedTempFile::new()?;
            source = tmp.path().to_path_buf();
            staged = Some(tmp);
        }

        // Upload from a private copy; the source may be written or
        // truncated mid-upload. Policy-staged temp files are already
        // private. On copy failure, fall back to the source directly.
        let copied = if staged.is_none() {
            match stage_copy(&source) {
                Ok(tmp) => Some(tmp),
                Err(err) => {
                    error!("staging copy of {} failed: {err}", source.display());
                    None
                }
            }
        } else {
            None
        };

        let upload_path = copied
            .as_ref()
            .or(staged.as_ref())
            .map_or(source.as_path(), NamedTempFile::path);
        self.store.put_file(&key, upload_path).await?;
        Ok(())
    }
}

async fn recv(rx: &SharedReceiver) -> Option<PathBuf> {
    rx.lock().await.recv().await
}

fn links_to_dir(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.is_dir()).unwrap_or(false)
}

fn stage_copy(source: &Path) -> Result<NamedTempFile> {
    let tmp = NamedTempFile::new()?;
    let size = fs::copy(source, tmp.path())?;
    debug!("staged {size} bytes for upload");
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    use obsync_core::config::SymlinkPolicy;
    use obsync_core::Md5Cache;
    use obsync_store::MemoryStore;

    fn transfer(root: &Path, store: Arc<MemoryStore>, symlink: SymlinkPolicy) -> Transfer {
        let keymap = KeyMap::new(root, "backup");
        let compare = Arc::new(Comparator::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            keymap.clone(),
            Arc::new(Md5Cache::new()),
            symlink,
        ));
        Transfer::new(
            store,
            compare,
            keymap,
            HotSet::new(),
            Duration::from_secs(60),
            symlink,
        )
    }

    #[tokio::test]
    async fn test_upload_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "hello world").unwrap();

        let store = Arc::new(MemoryStore::new());
        let t = transfer(dir.path(), Arc::clone(&store), SymlinkPolicy::Skip);
        t.handle_upload(&file, &CancellationToken::new()).await;

        let obj = store.object("backup/a.txt").await.unwrap();
        assert_eq!(obj.etag, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert!(t.hotset.contains(&file));
        t.hotset.stop();
    }

    #[tokio::test]
    async fn test_second_upload_is_short_circuited() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "hello world").unwrap();

        let store = Arc::new(MemoryStore::new());
        let t = transfer(dir.path(), Arc::clone(&store), SymlinkPolicy::Skip);
        let cancel = CancellationToken::new();
        t.handle_upload(&file, &cancel).await;
        t.handle_upload(&file, &cancel).await;

        assert_eq!(store.put_count(), 1);
        t.hotset.stop();
    }

    #[tokio::test]
    async fn test_vanished_path_is_dropped() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let t = transfer(dir.path(), Arc::clone(&store), SymlinkPolicy::Skip);

        t.handle_upload(&dir.path().join("transient"), &CancellationToken::new())
            .await;

        assert_eq!(store.put_count(), 0);
        assert!(store.keys().await.is_empty());
        t.hotset.stop();
    }

    #[tokio::test]
    async fn test_directory_upload_walks_children() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("moved");
        fs::create_dir_all(sub.join("nested")).unwrap();
        fs::write(sub.join("one.txt"), "1").unwrap();
        fs::write(sub.join("nested/two.txt"), "2").unwrap();

        let store = Arc::new(MemoryStore::new());
        let t = transfer(dir.path(), Arc::clone(&store), SymlinkPolicy::Skip);
        t.handle_upload(&sub, &CancellationToken::new()).await;

        let keys = store.keys().await;
        assert!(keys.contains(&"backup/moved/one.txt".to_string()));
        assert!(keys.contains(&"backup/moved/nested/two.txt".to_string()));
        t.hotset.stop();
    }

    #[tokio::test]
    async fn test_empty_dir_materializes_keep_object() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty");
        fs::create_dir(&empty).unwrap();

        let store = Arc::new(MemoryStore::new());
        let t = transfer(dir.path(), Arc::clone(&store), SymlinkPolicy::Skip);
        t.handle_upload(&empty, &CancellationToken::new()).await;

        let obj = store.object("backup/empty/.keep").await.unwrap();
        assert_eq!(obj.size, 0);
        assert_eq!(obj.etag, "d41d8cd98f00b204e9800998ecf8427e");
        t.hotset.stop();
    }

    #[tokio::test]
    async fn test_delete_is_prefix_safe() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_raw("backup/abc", Vec::new(), 1, "aa", 0).await;
        store
            .insert_raw("backup/abc/inner.txt", Vec::new(), 1, "bb", 0)
            .await;
        store
            .insert_raw("backup/abcd.txt", Vec::new(), 1, "cc", 0)
            .await;

        let t = transfer(dir.path(), Arc::clone(&store), SymlinkPolicy::Skip);
        t.handle_delete(&dir.path().join("abc")).await;

        assert_eq!(store.keys().await, vec!["backup/abcd.txt"]);
        t.hotset.stop();
    }

    #[tokio::test]
    async fn test_delete_skipped_when_path_reappeared() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "recreated").unwrap();

        let store = Arc::new(MemoryStore::new());
        store
            .insert_raw("backup/a.txt", Vec::new(), 1, "aa", 0)
            .await;

        let t = transfer(dir.path(), Arc::clone(&store), SymlinkPolicy::Skip);
        t.handle_delete(&file).await;

        assert_eq!(store.keys().await, vec!["backup/a.txt"]);
        t.hotset.stop();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_skip_policy_uploads_nothing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        fs::write(&target, "content").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let store = Arc::new(MemoryStore::new());
        let t = transfer(dir.path(), Arc::clone(&store), SymlinkPolicy::Skip);
        t.handle_upload(&link, &CancellationToken::new()).await;

        assert!(store.object("backup/link").await.is_none());
        t.hotset.stop();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_addr_policy_uploads_link_object() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("/etc/hostname", &link).unwrap();

        let store = Arc::new(MemoryStore::new());
        let t = transfer(dir.path(), Arc::clone(&store), SymlinkPolicy::Addr);
        t.handle_upload(&link, &CancellationToken::new()).await;

        let obj = store.object("backup/link.link").await.unwrap();
        assert_eq!(obj.data, b"/etc/hostname");
        t.hotset.stop();
    }

    #[tokio::test]
    async fn test_run_consumes_both_queues() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("up.txt");
        fs::write(&file, "queued").unwrap();

        let store = Arc::new(MemoryStore::new());
        store
            .insert_raw("backup/gone.txt", Vec::new(), 1, "aa", 0)
            .await;

        let t = Arc::new(transfer(dir.path(), Arc::clone(&store), SymlinkPolicy::Skip));
        let (upload_tx, upload_rx) = mpsc::channel(8);
        let (delete_tx, delete_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(Arc::clone(&t).run(
            shared(upload_rx),
            shared(delete_rx),
            cancel.clone(),
        ));

        upload_tx.send(file.clone()).await.unwrap();
        delete_tx.send(dir.path().join("gone.txt")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        worker.await.unwrap();

        assert!(store.object("backup/up.txt").await.is_some());
        assert!(store.object("backup/gone.txt").await.is_none());
        t.hotset.stop();
    }
}
