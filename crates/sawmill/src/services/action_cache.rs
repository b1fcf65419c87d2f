//! Action cache: serialized `ActionResult`s keyed by action digest.

use prost::Message;
use tracing::info;

use sawcas::{SharedStore, StoreError};
use sawproto::{ActionResult, GetActionResultRequest, Status, UpdateActionResultRequest};

use crate::keys::Keyspace;

pub struct ActionCacheService {
    store: SharedStore,
    keys: Keyspace,
}

impl ActionCacheService {
    pub fn new(store: SharedStore, keys: Keyspace) -> Self {
        Self { store, keys }
    }

    pub async fn get_action_result(
        &self,
        request: GetActionResultRequest,
    ) -> Result<ActionResult, Status> {
        let digest = request
            .action_digest
            .ok_or_else(|| Status::invalid_argument("missing action digest"))?;
        info!(%digest, "GetActionResult");

        let bytes = match self.store.get_bytes(&self.keys.ac(&digest.hash)).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound { .. }) => return Err(Status::not_found("")),
            Err(e) => return Err(Status::internal(e.to_string())),
        };
        ActionResult::decode(bytes.as_slice())
            .map_err(|e| Status::internal(format!("decoding cached result: {e}")))
    }

    /// Store a result under the action digest and hand it back. The
    /// canonical encoding keeps the stored bytes stable for equal results,
    /// so rewrites are idempotent.
    pub async fn update_action_result(
        &self,
        request: UpdateActionResultRequest,
    ) -> Result<ActionResult, Status> {
        let digest = request
            .action_digest
            .ok_or_else(|| Status::invalid_argument("missing action digest"))?;
        let result = request
            .action_result
            .ok_or_else(|| Status::invalid_argument("missing action result"))?;
        info!(%digest, exit_code = result.exit_code, "UpdateActionResult");

        self.store
            .put_bytes(&self.keys.ac(&digest.hash), result.encode_to_vec())
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(result)
    }
}
