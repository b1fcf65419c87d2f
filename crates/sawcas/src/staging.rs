//! Disk-backed staging for in-progress uploads.
//!
//! An upload accumulates in a staging file addressed by its resource name,
//! not by content (the content hash of a partial upload is meaningless).
//! Appends happen at the committed offset; a disconnected client can resume
//! by reopening at the size the server last acknowledged. When the write
//! finishes, the staging file is sealed: streamed into the blob store under
//! its final key and removed.
//!
//! Keeping the buffer on disk bounds memory at O(chunk), not O(upload).

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::store::{BlobStore, StoreError};

/// A staging file open for appending at a known offset.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
    file: File,
    len: u64,
}

impl StagingFile {
    /// Open (or create) the staging file and position it at `offset`.
    ///
    /// Any bytes past `offset` are discarded; they were never acknowledged,
    /// so a resuming client is about to resend them.
    pub async fn open_at(path: impl Into<PathBuf>, offset: u64) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;
        file.set_len(offset).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(Self {
            path,
            file,
            len: offset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes currently committed to this staging file.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a chunk, returning the new committed length.
    pub async fn append(&mut self, data: &[u8]) -> std::io::Result<u64> {
        self.file.write_all(data).await?;
        self.len += data.len() as u64;
        Ok(self.len)
    }

    /// Reset to `offset`, dropping everything beyond it. Used when a
    /// completed resource is overwritten from scratch.
    pub async fn truncate_to(&mut self, offset: u64) -> std::io::Result<()> {
        self.file.set_len(offset).await?;
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.len = offset;
        Ok(())
    }

    /// Stream the staged content into the blob store under `key`, then
    /// remove the staging file.
    pub async fn seal(mut self, store: &dyn BlobStore, key: &str) -> Result<u64, StoreError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);

        let reader = File::open(&self.path).await?;
        let written = store.put(key, Box::new(reader)).await?;
        tokio::fs::remove_file(&self.path).await?;
        Ok(written)
    }

    /// Remove the staging file without persisting anything.
    pub async fn discard(self) -> std::io::Result<()> {
        drop(self.file);
        tokio::fs::remove_file(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn append_and_seal() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();

        let mut staging = StagingFile::open_at(dir.path().join("blobs/h/10"), 0)
            .await
            .unwrap();
        assert_eq!(staging.append(b"hello").await.unwrap(), 5);
        assert_eq!(staging.append(b"world").await.unwrap(), 10);

        let written = staging.seal(&store, "cas/h").await.unwrap();
        assert_eq!(written, 10);
        assert_eq!(store.get_bytes("cas/h").await.unwrap(), b"helloworld");
        assert!(!dir.path().join("blobs/h/10").exists());
    }

    #[tokio::test]
    async fn resume_at_committed_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("resume");

        let mut first = StagingFile::open_at(&path, 0).await.unwrap();
        first.append(b"hello").await.unwrap();
        // Simulate a dropped connection: the handle goes away, the file stays.
        drop(first);

        let mut second = StagingFile::open_at(&path, 5).await.unwrap();
        assert_eq!(second.len(), 5);
        second.append(b"world").await.unwrap();

        let store = MemoryStore::new();
        second.seal(&store, "cas/h").await.unwrap();
        assert_eq!(store.get_bytes("cas/h").await.unwrap(), b"helloworld");
    }

    #[tokio::test]
    async fn reopen_discards_unacknowledged_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tail");

        let mut first = StagingFile::open_at(&path, 0).await.unwrap();
        first.append(b"hello junk").await.unwrap();
        drop(first);

        // The server only ever acknowledged 5 bytes.
        let mut second = StagingFile::open_at(&path, 5).await.unwrap();
        second.append(b"world").await.unwrap();

        let store = MemoryStore::new();
        second.seal(&store, "cas/h").await.unwrap();
        assert_eq!(store.get_bytes("cas/h").await.unwrap(), b"helloworld");
    }

    #[tokio::test]
    async fn truncate_resets_for_overwrite() {
        let dir = TempDir::new().unwrap();
        let mut staging = StagingFile::open_at(dir.path().join("ow"), 0).await.unwrap();
        staging.append(b"old content").await.unwrap();

        staging.truncate_to(0).await.unwrap();
        assert!(staging.is_empty());
        staging.append(b"new").await.unwrap();

        let store = MemoryStore::new();
        staging.seal(&store, "cas/ow").await.unwrap();
        assert_eq!(store.get_bytes("cas/ow").await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn discard_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone");
        let mut staging = StagingFile::open_at(&path, 0).await.unwrap();
        staging.append(b"scratch").await.unwrap();
        staging.discard().await.unwrap();
        assert!(!path.exists());
    }
}
