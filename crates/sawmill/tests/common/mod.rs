//! Shared fixtures for the service test suites: an in-memory store wired
//! into every service, with throwaway staging and execution directories.

use std::sync::Arc;
use tempfile::TempDir;

use sawcas::{DigestFunction, MemoryStore, SharedStore};
use sawmill::services::{
    ActionCacheService, ByteStreamService, CasService, ExecutionService, WatchService,
};
use sawmill::{Broker, Executor, Keyspace};
use sawproto::Digest;

pub struct Harness {
    pub store: SharedStore,
    pub keys: Keyspace,
    pub digest_fn: DigestFunction,
    pub broker: Broker,
    pub cas: CasService,
    pub action_cache: ActionCacheService,
    pub bytestream: ByteStreamService,
    pub execution: ExecutionService,
    pub watch: WatchService,
    // Held for their Drop cleanup.
    #[allow(dead_code)]
    pub exec_root: TempDir,
    #[allow(dead_code)]
    pub staging_dir: TempDir,
}

pub fn harness() -> Harness {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let keys = Keyspace::new("bazel-cache");
    let digest_fn = DigestFunction::Sha1;
    let broker = Broker::new();
    let exec_root = TempDir::new().expect("exec root");
    let staging_dir = TempDir::new().expect("staging dir");

    let executor = Executor::new(
        store.clone(),
        keys.clone(),
        digest_fn,
        exec_root.path().to_path_buf(),
    );

    Harness {
        cas: CasService::new(store.clone(), keys.clone(), digest_fn, broker.clone()),
        action_cache: ActionCacheService::new(store.clone(), keys.clone()),
        bytestream: ByteStreamService::new(
            store.clone(),
            keys.clone(),
            staging_dir.path().to_path_buf(),
            true,
        ),
        execution: ExecutionService::new(
            executor,
            store.clone(),
            keys.clone(),
            digest_fn,
            broker.clone(),
        ),
        watch: WatchService::new(broker.clone()),
        store,
        keys,
        digest_fn,
        broker,
        exec_root,
        staging_dir,
    }
}

/// Store `data` directly in the CAS namespace, returning its digest.
#[allow(dead_code)]
pub async fn seed_blob(harness: &Harness, data: &[u8]) -> Digest {
    let digest = harness.digest_fn.digest_of(data);
    harness
        .store
        .put_bytes(&harness.keys.cas(&digest.hash), data.to_vec())
        .await
        .expect("seed blob");
    digest
}
