//! An in-memory write buffer that flushes atomically to disk.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, StoreError};

/// Accumulates serialized event bytes for one partition and periodically
/// flushes them to disk by writing a sibling temp file and renaming it into
/// place, so concurrent readers of the partition never observe a partial
/// write.
///
/// The buffer is never truncated by a flush: it holds the complete contents
/// of the partition for as long as this `MemoryFile` is open, so a flush is
/// just "write whatever is currently buffered" and two flushes with no
/// intervening writes produce byte-identical files. Methods take `&self` —
/// the internal `Mutex` is this type's own, independent of whatever lock a
/// store uses to guard its open-files map (see the naive store's `Inner`).
#[derive(Debug)]
pub struct MemoryFile {
    path: PathBuf,
    buf: Mutex<Vec<u8>>,
}

impl MemoryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_bytes(path.into(), Vec::new())
    }

    /// Opens a `MemoryFile` seeded with `bytes` — used when a partition
    /// already has content on disk from before the process started, so the
    /// next flush doesn't rename an empty-plus-new-events file over it.
    pub fn with_bytes(path: PathBuf, bytes: Vec<u8>) -> Self {
        Self {
            path,
            buf: Mutex::new(bytes),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.buf.lock().unwrap().is_empty()
    }

    /// Appends raw bytes (already framed by [`theia_model::EventSerializer`])
    /// to the in-memory buffer. Does not touch disk.
    pub fn append(&self, bytes: &[u8]) {
        self.buf.lock().unwrap().extend_from_slice(bytes);
    }

    /// A copy of the buffer's current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.lock().unwrap().clone()
    }

    /// Writes the current snapshot to a temp file in the partition's parent
    /// directory, syncs it, and renames it over `self.path`. A no-op if the
    /// buffer is empty. Never clears the buffer.
    pub async fn flush(&self) -> Result<()> {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return Ok(());
        }

        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let path = self.path.clone();

        let tmp = tokio::task::spawn_blocking(move || -> std::io::Result<PathBuf> {
            let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
            std::io::Write::write_all(&mut tmp, &snapshot)?;
            tmp.as_file().sync_all()?;
            let (_, tmp_path) = tmp.keep()?;
            Ok(tmp_path)
        })
        .await
        .map_err(|e| StoreError::WriteFailure {
            path: path.display().to_string(),
            source: std::io::Error::other(e),
        })?
        .map_err(|source| StoreError::WriteFailure {
            path: path.display().to_string(),
            source,
        })?;

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StoreError::WriteFailure {
                path: path.display().to_string(),
                source,
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flush_is_noop_on_empty_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let mf = MemoryFile::new(dir.path().join("10-20"));
        mf.flush().await.unwrap();
        assert!(!dir.path().join("10-20").exists());
    }

    #[tokio::test]
    async fn flush_writes_the_whole_accumulated_buffer_each_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("10-20");
        let mf = MemoryFile::new(&path);

        mf.append(b"first\n");
        mf.flush().await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"first\n");

        mf.append(b"second\n");
        mf.flush().await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"first\nsecond\n");
    }

    #[tokio::test]
    async fn repeated_flush_with_no_writes_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("10-20");
        let mf = MemoryFile::new(&path);
        mf.append(b"only\n");

        mf.flush().await.unwrap();
        let first = tokio::fs::read(&path).await.unwrap();
        mf.flush().await.unwrap();
        let second = tokio::fs::read(&path).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(mf.snapshot(), b"only\n");
    }

    #[tokio::test]
    async fn seeded_bytes_survive_into_the_first_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("10-20");
        tokio::fs::write(&path, b"preexisting\n").await.unwrap();

        let existing = tokio::fs::read(&path).await.unwrap();
        let mf = MemoryFile::with_bytes(path.clone(), existing);
        mf.append(b"new\n");
        mf.flush().await.unwrap();

        assert_eq!(
            tokio::fs::read(&path).await.unwrap(),
            b"preexisting\nnew\n"
        );
    }
}
