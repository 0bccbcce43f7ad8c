//! Local-path to object-key mapping

use std::path::{Path, PathBuf};

/// Maps absolute local paths under the sync root to remote object keys
///
/// `remote_key(p) = remote_prefix + strip_prefix(p, local_root)` with any
/// leading slash removed. The mapping is total and reversible up to the
/// prefix.
#[derive(Clone, Debug)]
pub struct KeyMap {
    local_root: PathBuf,
    remote_prefix: String,
}

impl KeyMap {
    #[must_use]
    pub fn new(local_root: impl Into<PathBuf>, remote_prefix: impl Into<String>) -> Self {
        Self {
            local_root: local_root.into(),
            remote_prefix: remote_prefix.into().trim_start_matches('/').to_string(),
        }
    }

    /// The remote object key for a local path
    #[must_use]
    pub fn remote_key(&self, path: &Path) -> String {
        let relative = path
            .strip_prefix(&self.local_root)
            .unwrap_or(path)
            .to_string_lossy();

        let key = if self.remote_prefix.is_empty() {
            relative.into_owned()
        } else if relative.is_empty() {
            self.remote_prefix.clone()
        } else {
            format!("{}/{}", self.remote_prefix, relative)
        };

        key.trim_start_matches('/').to_string()
    }

    #[must_use]
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }
}
