//! Execution requests and long-running operation handles.

use prost::Message;
use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionResult, Digest};
use crate::status::{RpcStatus, Status};

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct ExecuteRequest {
    #[prost(message, optional, tag = "1")]
    pub action: Option<Action>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct ExecuteResponse {
    #[prost(message, optional, tag = "1")]
    pub result: Option<ActionResult>,
}

impl ExecuteResponse {
    pub const TYPE_NAME: &'static str = "sawmill.ExecuteResponse";
}

/// Pipeline stage of an execution, reported in operation metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Stage {
    Unknown = 0,
    CacheCheck = 1,
    Queued = 2,
    Executing = 3,
    Completed = 4,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct ExecuteOperationMetadata {
    #[prost(enumeration = "Stage", tag = "1")]
    pub stage: i32,
    #[prost(message, optional, tag = "2")]
    pub action_digest: Option<Digest>,
    #[prost(string, tag = "3")]
    pub stdout_stream_name: String,
    #[prost(string, tag = "4")]
    pub stderr_stream_name: String,
}

impl ExecuteOperationMetadata {
    pub const TYPE_NAME: &'static str = "sawmill.ExecuteOperationMetadata";
}

/// A typed byte container: a message name plus its canonical encoding.
/// Used wherever an event or operation carries a payload whose type is only
/// known to the consumer.
#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct Packed {
    #[prost(string, tag = "1")]
    pub type_name: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

impl Packed {
    /// Pack a message under its type name.
    pub fn pack<M: Message>(type_name: &str, message: &M) -> Self {
        Self {
            type_name: type_name.to_string(),
            value: message.encode_to_vec(),
        }
    }

    /// Unpack, verifying the type name matches what the caller expects.
    pub fn unpack<M: Message + Default>(&self, type_name: &str) -> Result<M, Status> {
        if self.type_name != type_name {
            return Err(Status::internal(format!(
                "packed payload is {}, expected {}",
                self.type_name, type_name
            )));
        }
        M::decode(self.value.as_slice())
            .map_err(|e| Status::internal(format!("decoding {}: {}", type_name, e)))
    }
}

/// Handle for a long-running task. `Execute` returns one immediately with
/// `done == false`; the completed form (with either `response` or `error`
/// set) is delivered through the watcher.
#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct Operation {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub metadata: Option<Packed>,
    #[prost(bool, tag = "3")]
    pub done: bool,
    #[prost(message, optional, tag = "4")]
    pub response: Option<Packed>,
    #[prost(message, optional, tag = "5")]
    pub error: Option<RpcStatus>,
}

impl Operation {
    pub const TYPE_NAME: &'static str = "sawmill.Operation";
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn packed_roundtrip() {
        let meta = ExecuteOperationMetadata {
            stage: Stage::Queued as i32,
            action_digest: Some(Digest::new("abc", 3)),
            stdout_stream_name: "abc-stdout".into(),
            stderr_stream_name: "abc-stderr".into(),
        };
        let packed = Packed::pack(ExecuteOperationMetadata::TYPE_NAME, &meta);
        let unpacked: ExecuteOperationMetadata = packed
            .unpack(ExecuteOperationMetadata::TYPE_NAME)
            .unwrap();
        assert_eq!(meta, unpacked);
    }

    #[test]
    fn packed_rejects_wrong_type() {
        let packed = Packed::pack(Operation::TYPE_NAME, &Operation::default());
        let err = packed
            .unpack::<ExecuteResponse>(ExecuteResponse::TYPE_NAME)
            .unwrap_err();
        assert_eq!(err.code(), crate::status::Code::Internal);
    }

    #[test]
    fn completed_operation_carries_response() {
        let response = ExecuteResponse {
            result: Some(ActionResult {
                exit_code: 0,
                ..Default::default()
            }),
        };
        let op = Operation {
            name: "abc".into(),
            metadata: None,
            done: true,
            response: Some(Packed::pack(ExecuteResponse::TYPE_NAME, &response)),
            error: None,
        };
        let bytes = op.encode_to_vec();
        let decoded = Operation::decode(bytes.as_slice()).unwrap();
        assert!(decoded.done);
        let inner: ExecuteResponse = decoded
            .response
            .unwrap()
            .unpack(ExecuteResponse::TYPE_NAME)
            .unwrap();
        assert_eq!(inner.result.unwrap().exit_code, 0);
    }
}
