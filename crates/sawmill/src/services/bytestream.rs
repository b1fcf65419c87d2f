//! Resumable byte streaming over named resources.
//!
//! Write resources arrive as `uploads/<uuid>/blobs/<hash>/<size>`; the
//! first two segments are the client's upload session and are stripped, so
//! the retained name (`blobs/<hash>/<size>`) is content-addressed. Reads
//! use the retained form directly.
//!
//! Per-resource state is `{committed_size, complete}` plus a disk-backed
//! staging file. State outlives the connection on purpose: a client that
//! reconnects and continues at the committed offset resumes the upload.
//! One stream writes a given resource at a time; concurrent writers to the
//! same name are outside the contract.

use dashmap::DashMap;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use sawcas::{BlobReader, SharedStore, StagingFile};
use sawproto::{
    QueryWriteStatusRequest, QueryWriteStatusResponse, ReadRequest, ReadResponse, Status,
    WriteRequest, WriteResponse,
};

use crate::keys::Keyspace;

/// Frame size for read chunking.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug)]
struct ResourceState {
    committed_size: i64,
    complete: bool,
    staging: Option<StagingFile>,
}

pub struct ByteStreamService {
    store: SharedStore,
    keys: Keyspace,
    resources: DashMap<String, ResourceState>,
    staging_dir: PathBuf,
    allow_overwrite: bool,
    chunk_size: usize,
}

impl ByteStreamService {
    pub fn new(
        store: SharedStore,
        keys: Keyspace,
        staging_dir: PathBuf,
        allow_overwrite: bool,
    ) -> Self {
        Self {
            store,
            keys,
            resources: DashMap::new(),
            staging_dir,
            allow_overwrite,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Override the read chunk size (frames per `Read` stream).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Consume one write frame. Returns the terminal `WriteResponse` once a
    /// `finish_write` frame lands, `None` for intermediate frames.
    pub async fn write(&self, request: WriteRequest) -> Result<Option<WriteResponse>, Status> {
        let name = canonical_write_name(&request.resource_name)?;
        debug!(resource = %name, offset = request.write_offset, len = request.data.len(),
               finish = request.finish_write, "write frame");

        // State transition first, under the map entry; file i/o happens
        // with the entry released. The protocol is stream-serial per
        // resource, so nothing else mutates this state meanwhile.
        let (staging, committed) = {
            let mut entry = self
                .resources
                .entry(name.clone())
                .or_insert_with(|| ResourceState {
                    committed_size: request.write_offset,
                    complete: false,
                    staging: None,
                });
            let state = entry.value_mut();

            if state.complete {
                if !self.allow_overwrite {
                    return Err(Status::invalid_argument(format!(
                        "{name:?} already finished and overwriting is disabled"
                    )));
                }
                // Truncate the resource stream and start over.
                state.complete = false;
                state.committed_size = request.write_offset;
            }

            if request.write_offset != state.committed_size {
                return Err(Status::failed_precondition(format!(
                    "{name:?} write_offset={} differs from committed_size={}",
                    request.write_offset, state.committed_size
                )));
            }
            (state.staging.take(), state.committed_size)
        };

        let mut staging = match staging {
            Some(mut open) => {
                if open.len() != committed as u64 {
                    open.truncate_to(committed as u64)
                        .await
                        .map_err(|e| Status::internal(format!("resetting staging: {e}")))?;
                }
                open
            }
            None => StagingFile::open_at(self.staging_path(&name)?, committed as u64)
                .await
                .map_err(|e| Status::internal(format!("opening staging: {e}")))?,
        };

        let new_committed = staging
            .append(&request.data)
            .await
            .map_err(|e| Status::internal(format!("writing {name:?}: {e}")))?
            as i64;

        if request.finish_write {
            let hash = blob_hash(&name)?;
            staging
                .seal(self.store.as_ref(), &self.keys.cas(hash))
                .await
                .map_err(|e| Status::internal(format!("closing {name:?}: {e}")))?;
            if let Some(mut entry) = self.resources.get_mut(&name) {
                entry.committed_size = new_committed;
                entry.complete = true;
                entry.staging = None;
            }
            info!(resource = %name, committed = new_committed, "finished write");
            return Ok(Some(WriteResponse {
                committed_size: new_committed,
            }));
        }

        if let Some(mut entry) = self.resources.get_mut(&name) {
            entry.committed_size = new_committed;
            entry.staging = Some(staging);
        }
        Ok(None)
    }

    pub fn query_write_status(
        &self,
        request: QueryWriteStatusRequest,
    ) -> Result<QueryWriteStatusResponse, Status> {
        match self.resources.get(&request.resource_name) {
            Some(state) => Ok(QueryWriteStatusResponse {
                committed_size: state.committed_size,
                complete: state.complete,
            }),
            None => Err(Status::not_found(format!(
                "resource_name not found: {:?}",
                request.resource_name
            ))),
        }
    }

    /// Open a blob for chunked reading from `read_offset`, up to
    /// `read_limit` bytes (zero means until the end).
    pub async fn read(&self, request: ReadRequest) -> Result<BlobChunks, Status> {
        if request.resource_name.is_empty() {
            return Err(Status::invalid_argument("empty or missing resource_name"));
        }
        if request.read_offset < 0 {
            return Err(Status::invalid_argument(format!(
                "offset={} is invalid",
                request.read_offset
            )));
        }
        if request.read_limit < 0 {
            return Err(Status::invalid_argument(format!(
                "read_limit={} is invalid",
                request.read_limit
            )));
        }

        let hash = blob_hash(&request.resource_name)?;
        let mut reader = self
            .store
            .get(&self.keys.cas(hash))
            .await
            .map_err(Status::from)?;

        if request.read_offset > 0 {
            let mut skip = (&mut reader).take(request.read_offset as u64);
            tokio::io::copy(&mut skip, &mut tokio::io::sink())
                .await
                .map_err(|e| Status::internal(format!("seeking to read offset: {e}")))?;
        }

        Ok(BlobChunks {
            reader,
            remaining: (request.read_limit > 0).then_some(request.read_limit as u64),
            chunk_size: self.chunk_size,
        })
    }

    fn staging_path(&self, canonical_name: &str) -> Result<PathBuf, Status> {
        let mut path = self.staging_dir.clone();
        for segment in canonical_name.split('/') {
            path.push(segment);
        }
        Ok(path)
    }
}

/// A chunked blob read in progress; the server drains it frame by frame.
pub struct BlobChunks {
    reader: BlobReader,
    remaining: Option<u64>,
    chunk_size: usize,
}

impl std::fmt::Debug for BlobChunks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobChunks")
            .field("remaining", &self.remaining)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl BlobChunks {
    /// The next frame of data, or `None` at the end of the stream.
    pub async fn next_chunk(&mut self) -> Result<Option<ReadResponse>, Status> {
        let want = match self.remaining {
            Some(0) => return Ok(None),
            Some(remaining) => self.chunk_size.min(remaining as usize),
            None => self.chunk_size,
        };
        let mut buf = vec![0u8; want];
        let n = self
            .reader
            .read(&mut buf)
            .await
            .map_err(|e| Status::unknown(format!("reading blob: {e}")))?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        if let Some(remaining) = &mut self.remaining {
            *remaining -= n as u64;
        }
        Ok(Some(ReadResponse { data: buf }))
    }
}

/// Strip the upload-session prefix (`uploads/<uuid>/`) from a write
/// resource name, validating what remains.
fn canonical_write_name(resource_name: &str) -> Result<String, Status> {
    let segments: Vec<&str> = resource_name.split('/').collect();
    if segments.len() <= 2 || segments.iter().any(|s| s.is_empty() || *s == "." || *s == "..") {
        return Err(Status::invalid_argument(format!(
            "empty or missing resource_name: {resource_name:?}"
        )));
    }
    Ok(segments[2..].join("/"))
}

/// Extract the content hash from a `blobs/<hash>/<size>` name.
fn blob_hash(canonical_name: &str) -> Result<&str, Status> {
    let mut segments = canonical_name.split('/');
    match (segments.next(), segments.next()) {
        (Some("blobs"), Some(hash)) if !hash.is_empty() => Ok(hash),
        _ => Err(Status::invalid_argument(format!(
            "resource name is not blob-addressed: {canonical_name:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_names_lose_their_upload_prefix() {
        assert_eq!(
            canonical_write_name("uploads/u-1/blobs/abc/10").unwrap(),
            "blobs/abc/10"
        );
        assert!(canonical_write_name("").is_err());
        assert!(canonical_write_name("uploads/u-1").is_err());
        assert!(canonical_write_name("uploads//blobs/abc/10").is_err());
    }

    #[test]
    fn blob_hash_extraction() {
        assert_eq!(blob_hash("blobs/abc123/42").unwrap(), "abc123");
        assert!(blob_hash("something/else").is_err());
        assert!(blob_hash("blobs").is_err());
    }
}
