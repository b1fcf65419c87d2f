//! Blob store backends: key to byte-stream persistence with existence
//! checks.
//!
//! The store is oblivious to key semantics; callers namespace keys
//! themselves (`<prefix>/cas/<hash>`, `<prefix>/ac/<hash>`). Puts replace
//! atomically, last write wins; callers uphold the content-addressing
//! contract that makes those rewrites idempotent.
//!
//! On-disk layout shards the final key segment by its first two characters,
//! keeping directories small for large stores:
//!
//! ```text
//! {root}/
//! ├── bazel-cache/
//! │   ├── cas/
//! │   │   ├── ab/
//! │   │   │   └── cde123...   # blob content
//! │   └── ac/
//! │       └── 12/
//! │           └── 3456789...
//! └── tmp/                     # in-flight ingests, renamed into place
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use sawproto::Status;

/// Errors from blob store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("blob not found: {key}")]
    NotFound { key: String },
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("storage i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for Status {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Status::not_found(err.to_string()),
            StoreError::InvalidKey(_) => Status::invalid_argument(err.to_string()),
            StoreError::Io(_) => Status::internal(err.to_string()),
        }
    }
}

/// A streamed blob read.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// A shared handle to any blob store backend.
pub type SharedStore = Arc<dyn BlobStore>;

/// Key to byte-stream persistence. Individual puts are atomic per key;
/// existence checks never read content.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Open the blob at `key` for streamed reading.
    async fn get(&self, key: &str) -> Result<BlobReader, StoreError>;

    /// Persist a stream under `key`, returning the byte count. Callers must
    /// only write content addressed by the key.
    async fn put(&self, key: &str, data: BlobReader) -> Result<u64, StoreError>;

    /// Whether `key` exists, without downloading it.
    async fn contains(&self, key: &str) -> Result<bool, StoreError>;

    /// Read the whole blob into memory.
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut reader = self.get(key).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Persist an in-memory blob under `key`.
    async fn put_bytes(&self, key: &str, data: Vec<u8>) -> Result<u64, StoreError> {
        self.put(key, Box::new(Cursor::new(data))).await
    }
}

/// Filesystem-backed blob store rooted at a single directory (the
/// "bucket").
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store at `root`, creating the directory tree as needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("tmp"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to its sharded object path.
    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let segments: Vec<&str> = key.split('/').collect();
        if key.is_empty()
            || segments
                .iter()
                .any(|s| s.is_empty() || *s == "." || *s == "..")
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }

        let mut path = self.root.clone();
        let Some((last, dirs)) = segments.split_last() else {
            return Err(StoreError::InvalidKey(key.to_string()));
        };
        for dir in dirs {
            path.push(dir);
        }
        if last.len() > 2 {
            path.push(&last[..2]);
            path.push(&last[2..]);
        } else {
            path.push(last);
        }
        Ok(path)
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join("tmp").join(Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl BlobStore for FileStore {
    async fn get(&self, key: &str) -> Result<BlobReader, StoreError> {
        let path = self.object_path(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, mut data: BlobReader) -> Result<u64, StoreError> {
        let path = self.object_path(key)?;
        let temp = self.temp_path();

        let mut file = tokio::fs::File::create(&temp).await?;
        let written = tokio::io::copy(&mut data, &mut file).await?;
        file.sync_all().await?;
        drop(file);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Atomic replace: last write wins. Keys are content-addressed, so
        // concurrent writers of one key are writing the same bytes anyway.
        tokio::fs::rename(&temp, &path).await?;
        Ok(written)
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.object_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory blob store, for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<BlobReader, StoreError> {
        match self.blobs.get(key) {
            Some(entry) => Ok(Box::new(Cursor::new(entry.value().clone()))),
            None => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn put(&self, key: &str, mut data: BlobReader) -> Result<u64, StoreError> {
        let mut buf = Vec::new();
        data.read_to_end(&mut buf).await?;
        let len = buf.len() as u64;
        self.blobs.insert(key.to_string(), buf);
        Ok(len)
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.blobs.contains_key(key))
    }
}
