//! RPC service implementations.
//!
//! Each service is a plain struct over the shared store, keyspace, and
//! broker; the server layer (`crate::server`) owns the wire concerns. That
//! split keeps every behavior here drivable directly from tests.

pub mod action_cache;
pub mod bytestream;
pub mod cas;
pub mod execution;
pub mod watch;

pub use action_cache::ActionCacheService;
pub use bytestream::ByteStreamService;
pub use cas::CasService;
pub use execution::ExecutionService;
pub use watch::WatchService;
