//! Execution service: accept an action, return a long-running operation,
//! and publish the completed operation through the change fabric.

use prost::Message;
use tracing::{info, warn};

use sawcas::{DigestFunction, SharedStore};
use sawproto::{
    Action, Change, Command, Digest, ExecuteOperationMetadata, ExecuteRequest, ExecuteResponse,
    Operation, Packed, Stage, Status,
};

use crate::broker::{Broker, Topic};
use crate::executor::{ExecError, Executor};
use crate::keys::Keyspace;

pub struct ExecutionService {
    executor: Executor,
    store: SharedStore,
    keys: Keyspace,
    digest_fn: DigestFunction,
    broker: Broker,
}

impl ExecutionService {
    pub fn new(
        executor: Executor,
        store: SharedStore,
        keys: Keyspace,
        digest_fn: DigestFunction,
        broker: Broker,
    ) -> Self {
        Self {
            executor,
            store,
            keys,
            digest_fn,
            broker,
        }
    }

    /// Synchronous part of `Execute`: materialize inputs, decode the
    /// command, and hand back a queued operation. The run itself happens
    /// on a spawned task; completion arrives via the watcher.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<Operation, Status> {
        let action = request
            .action
            .ok_or_else(|| Status::invalid_argument("missing action"))?;
        let command_digest = action
            .command_digest
            .clone()
            .ok_or_else(|| Status::invalid_argument("action has no command digest"))?;
        info!(command = %command_digest, "Execute");

        let metadata = ExecuteOperationMetadata {
            stage: Stage::Queued as i32,
            action_digest: Some(command_digest.clone()),
            stdout_stream_name: format!("{}-stdout", command_digest.hash),
            stderr_stream_name: format!("{}-stderr", command_digest.hash),
        };

        if let Some(root) = &action.input_root_digest {
            self.executor
                .materialize_tree(root)
                .await
                .map_err(|e| Status::internal(format!("materializing input tree: {e}")))?;
        }

        let command = match self.executor.fetch_command(&action).await {
            Ok(command) => command,
            Err(ExecError::EmptyCommand) => {
                return Err(Status::invalid_argument("command has no arguments"))
            }
            Err(e) => return Err(e.into()),
        };

        let task = RunTask {
            executor: self.executor.clone(),
            store: self.store.clone(),
            keys: self.keys.clone(),
            digest_fn: self.digest_fn,
            broker: self.broker.clone(),
            action,
            command,
            command_digest: command_digest.clone(),
        };
        tokio::spawn(task.run_and_publish());

        Ok(Operation {
            name: command_digest.hash,
            metadata: Some(Packed::pack(ExecuteOperationMetadata::TYPE_NAME, &metadata)),
            done: false,
            response: None,
            error: None,
        })
    }
}

struct RunTask {
    executor: Executor,
    store: SharedStore,
    keys: Keyspace,
    digest_fn: DigestFunction,
    broker: Broker,
    action: Action,
    command: Command,
    command_digest: Digest,
}

impl RunTask {
    /// Run to completion and publish exactly one terminal event: a done
    /// operation carrying either the execute response or the failure.
    async fn run_and_publish(self) {
        let element = self.command_digest.hash.clone();
        let operation = match self.run().await {
            Ok(operation) => operation,
            Err(status) => {
                warn!(command = %element, error = %status, "action run failed");
                Operation {
                    name: element.clone(),
                    metadata: None,
                    done: true,
                    response: None,
                    error: Some(status.into()),
                }
            }
        };
        self.broker.publish(
            Topic::Cas,
            Change::exists(element, Packed::pack(Operation::TYPE_NAME, &operation)),
        );
    }

    async fn run(&self) -> Result<Operation, Status> {
        let result = self.executor.run(&self.action, &self.command).await?;

        // Park the serialized result in the content store under its own
        // digest, and in the action cache under the action's digest so a
        // later lookup returns exactly what the watch event carried.
        self.executor
            .ingest_message(&result)
            .await
            .map_err(Status::from)?;
        let action_digest = self.digest_fn.digest_of(&self.action.encode_to_vec());
        self.store
            .put_bytes(&self.keys.ac(&action_digest.hash), result.encode_to_vec())
            .await
            .map_err(|e| Status::internal(format!("caching action result: {e}")))?;

        let metadata = ExecuteOperationMetadata {
            stage: Stage::Completed as i32,
            action_digest: Some(self.command_digest.clone()),
            stdout_stream_name: String::new(),
            stderr_stream_name: String::new(),
        };
        let response = ExecuteResponse {
            result: Some(result),
        };
        Ok(Operation {
            name: self.command_digest.hash.clone(),
            metadata: Some(Packed::pack(ExecuteOperationMetadata::TYPE_NAME, &metadata)),
            done: true,
            response: Some(Packed::pack(ExecuteResponse::TYPE_NAME, &response)),
            error: None,
        })
    }
}
