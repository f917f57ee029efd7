//! Temp-file staging area for two-phase mode
//!
//! Fetched-and-analyzed payloads are written here between the fetch pass
//! and the final save pass, bounding peak memory on large runs. The on-disk
//! layout (sequential files under per-run buckets) is an implementation
//! detail, not a compatibility surface.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle to one staged payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TempHandle {
    path: PathBuf,
}

/// Sequential file staging under a root directory
#[derive(Debug)]
pub struct TempFileStore {
    root: PathBuf,
    sequence: AtomicU64,
}

impl TempFileStore {
    /// Create a store rooted at `root` (created lazily on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Root directory of the staging area
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stage a payload under `bucket`, returning a handle for later read-back
    pub async fn write(&self, bucket: &str, id: &str, buffer: &[u8]) -> Result<TempHandle> {
        let dir = self.root.join(sanitize(bucket));
        tokio::fs::create_dir_all(&dir).await?;
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let path = dir.join(format!("{seq:08}-{}.bin", sanitize(id)));
        tokio::fs::write(&path, buffer).await?;
        tracing::trace!(path = %path.display(), bytes = buffer.len(), "payload staged");
        Ok(TempHandle { path })
    }

    /// Read a staged payload back
    pub async fn read(&self, handle: &TempHandle) -> Result<Vec<u8>> {
        tokio::fs::read(&handle.path).await.map_err(|e| {
            Error::TempStore(format!(
                "staged payload {} unreadable: {e}",
                handle.path.display()
            ))
        })
    }

    /// Remove the entire staging area
    ///
    /// A missing root is fine; a half-created run may never have staged
    /// anything.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::TempStore(format!(
                "could not clear {}: {e}",
                self.root.display()
            ))),
        }
    }
}

/// Keep staged filenames filesystem-safe
fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    // Long URLs make terrible filenames
    cleaned.chars().take(64).collect()
}
