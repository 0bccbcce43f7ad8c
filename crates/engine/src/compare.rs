//! Local-vs-remote equivalence decisions
//!
//! `is_same` answers "upload or skip" for one path. Single-part ETags are
//! compared against the local MD5; multipart ETags are not content hashes,
//! so those objects compare by size plus last-modified ordering.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use tracing::{debug, error};

use obsync_core::config::SymlinkPolicy;
use obsync_core::md5sum::{file_md5, str_md5};
use obsync_core::{KeyMap, Md5Cache};
use obsync_store::ObjectStore;

/// MD5 of the empty string, the ETag of a zero-byte `.keep` object
pub const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Decides whether a local path already matches its remote object
pub struct Comparator {
    store: Arc<dyn ObjectStore>,
    keymap: KeyMap,
    cache: Arc<Md5Cache>,
    symlink: SymlinkPolicy,
}

impl Comparator {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        keymap: KeyMap,
        cache: Arc<Md5Cache>,
        symlink: SymlinkPolicy,
    ) -> Self {
        Self {
            store,
            keymap,
            cache,
            symlink,
        }
    }

    /// Whether the object for `path` is already up to date.
    ///
    /// Returns `false` on any local or remote error so the caller retries
    /// via the upload path, where the error will surface properly.
    pub async fn is_same(&self, path: &Path) -> bool {
        let mut key = self.keymap.remote_key(path);
        let mut local_md5: Option<String> = None;

        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(err) => {
                debug!("stat {} failed: {err}", path.display());
                return false;
            }
        };

        if meta.file_type().is_symlink() {
            match self.symlink {
                SymlinkPolicy::Skip => {
                    debug!("symlink skip {}", path.display());
                    return true;
                }
                SymlinkPolicy::File if !links_to_dir(path) => {
                    debug!("symlink file {}", path.display());
                    local_md5 = match file_md5(path) {
                        Ok(digest) => Some(digest),
                        Err(err) => {
                            error!("md5 of link target {}: {err}", path.display());
                            return false;
                        }
                    };
                }
                // Directory targets carry the same semantics as `addr`.
                SymlinkPolicy::File | SymlinkPolicy::Addr => {
                    debug!("symlink addr {}", path.display());
                    key.push_str(".link");
                    let target = match fs::read_link(path) {
                        Ok(target) => target,
                        Err(err) => {
                            error!("read link {}: {err}", path.display());
                            return false;
                        }
                    };
                    local_md5 = Some(str_md5(&target.to_string_lossy()));
                }
            }
        } else if meta.is_dir() {
            // Non-empty directories are implicit; their contents drive
            // replication. Empty ones materialize as `<dir>/.keep`.
            if dir_has_entries(path) {
                debug!("skip dir, not empty {}", path.display());
                return true;
            }
            key.push_str("/.keep");
            local_md5 = Some(EMPTY_MD5.to_string());
        }

        let entry = match self.store.stat_object(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!("no remote object {key}");
                return false;
            }
            Err(err) => {
                debug!("stat object {key}: {err}");
                return false;
            }
        };

        if entry.is_multipart() {
            let meta = match fs::metadata(path) {
                Ok(meta) => meta,
                Err(err) => {
                    error!("stat {} failed: {err}", path.display());
                    return false;
                }
            };
            let local_mtime = mtime_epoch_secs(&meta);
            debug!(
                "compare multipart {}: local ({}, {local_mtime}), remote ({}, {})",
                path.display(),
                meta.len(),
                entry.size,
                entry.last_modified_secs
            );
            return meta.len() == entry.size && local_mtime <= entry.last_modified_secs;
        }

        let local_md5 = match local_md5 {
            Some(digest) => digest,
            None => match self.cache.md5(path) {
                Ok(digest) => digest,
                Err(err) => {
                    error!("md5 {}: {err}", path.display());
                    return false;
                }
            },
        };

        debug!(
            "compare {}: local {local_md5}, remote {}",
            path.display(),
            entry.etag
        );
        local_md5.eq_ignore_ascii_case(&entry.etag)
    }
}

/// Whether a symlink's resolved target is a directory; unresolvable
/// targets count as non-directories so they take the file branch
fn links_to_dir(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.is_dir()).unwrap_or(false)
}

fn dir_has_entries(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_some(),
        Err(_) => true,
    }
}

fn mtime_epoch_secs(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
        .map(|age| age.as_secs() as i64)
        .unwrap_or(0)
}
