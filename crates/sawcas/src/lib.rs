//! sawcas - content-addressed blob storage for sawmill.
//!
//! Three pieces:
//!
//! - [`DigestFunction`]: the configured content-hash family (SHA-1 by
//!   default) and streaming digest computation.
//! - [`BlobStore`]: key to byte-stream persistence with existence checks,
//!   backed by a sharded filesystem layout ([`FileStore`]) or memory
//!   ([`MemoryStore`]).
//! - [`StagingFile`]: disk-backed buffers for resumable uploads, sealed
//!   into the store when the write finishes.
//!
//! A blob's key is derived from its digest, so re-writes carry the same
//! bytes and no locking is needed between writers.

pub mod digest;
pub mod staging;
pub mod store;

pub use digest::{DigestFunction, Hasher};
pub use staging::StagingFile;
pub use store::{BlobReader, BlobStore, FileStore, MemoryStore, SharedStore, StoreError};
