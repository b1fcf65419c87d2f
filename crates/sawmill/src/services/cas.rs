//! Content-addressed storage service: missing-blob discovery and batched
//! ingest.

use std::collections::HashSet;
use tokio::task::JoinSet;
use tracing::{debug, info};

use sawcas::{DigestFunction, SharedStore};
use sawproto::{
    BatchUpdateBlobsRequest, BatchUpdateBlobsResponse, Change, FindMissingBlobsRequest,
    FindMissingBlobsResponse, GetTreeRequest, GetTreeResponse, Packed, Status, UpdateBlobRequest,
};

use crate::broker::{Broker, Topic};
use crate::keys::Keyspace;

pub struct CasService {
    store: SharedStore,
    keys: Keyspace,
    digest_fn: DigestFunction,
    broker: Broker,
}

impl CasService {
    pub fn new(
        store: SharedStore,
        keys: Keyspace,
        digest_fn: DigestFunction,
        broker: Broker,
    ) -> Self {
        Self {
            store,
            keys,
            digest_fn,
            broker,
        }
    }

    /// Return the subset of the given digests not present in the store.
    ///
    /// Probes run concurrently, one task per unique digest, under a single
    /// join set; any probe failure fails the whole call. Result order is
    /// unspecified.
    pub async fn find_missing_blobs(
        &self,
        request: FindMissingBlobsRequest,
    ) -> Result<FindMissingBlobsResponse, Status> {
        info!(count = request.blob_digests.len(), "FindMissingBlobs");

        let mut seen = HashSet::new();
        let mut probes = JoinSet::new();
        for digest in request.blob_digests {
            if !seen.insert(digest.clone()) {
                continue;
            }
            let store = self.store.clone();
            let key = self.keys.cas(&digest.hash);
            probes.spawn(async move {
                let found = store.contains(&key).await?;
                Ok::<_, sawcas::StoreError>((!found).then_some(digest))
            });
        }

        let mut missing = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(Ok(Some(digest))) => missing.push(digest),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    return Err(Status::internal(format!("probing blob store: {e}")));
                }
                Err(e) => {
                    return Err(Status::internal(format!("existence probe panicked: {e}")));
                }
            }
        }
        debug!(missing = missing.len(), "FindMissingBlobs complete");
        Ok(FindMissingBlobsResponse {
            missing_blob_digests: missing,
        })
    }

    /// Ingest a batch of blobs. Writes run concurrently; each verified
    /// against its declared digest before landing, and each successful
    /// write publishes an `Exists` change on the CAS channel. Partial
    /// persistence on failure is fine: the store is content-addressed, so
    /// a retry is idempotent.
    pub async fn batch_update_blobs(
        &self,
        request: BatchUpdateBlobsRequest,
    ) -> Result<BatchUpdateBlobsResponse, Status> {
        info!(count = request.requests.len(), "BatchUpdateBlobs");

        let mut writes = JoinSet::new();
        for blob in request.requests {
            let store = self.store.clone();
            let keys = self.keys.clone();
            let digest_fn = self.digest_fn;
            let broker = self.broker.clone();
            writes.spawn(async move {
                let digest = blob
                    .content_digest
                    .clone()
                    .ok_or_else(|| Status::invalid_argument("blob update without a digest"))?;
                if !digest_fn.verify(&blob.data, &digest) {
                    return Err(Status::invalid_argument(format!(
                        "content does not match declared digest {digest}"
                    )));
                }
                store
                    .put_bytes(&keys.cas(&digest.hash), blob.data.clone())
                    .await
                    .map_err(|e| Status::internal(format!("writing cas: {e}")))?;
                broker.publish(
                    Topic::Cas,
                    Change::exists(
                        digest.hash.clone(),
                        Packed::pack(UpdateBlobRequest::TYPE_NAME, &blob),
                    ),
                );
                Ok(())
            });
        }

        while let Some(joined) = writes.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(status)) => return Err(status),
                Err(e) => return Err(Status::internal(format!("blob write panicked: {e}"))),
            }
        }
        Ok(BatchUpdateBlobsResponse {})
    }

    /// Deprecated in the API this serves; kept as a stub.
    pub fn get_tree(&self, _request: GetTreeRequest) -> Result<GetTreeResponse, Status> {
        Err(Status::unimplemented("GetTree is deprecated"))
    }
}
