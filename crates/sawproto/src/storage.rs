//! Blob-storage and action-cache request/response messages.

use prost::Message;
use serde::{Deserialize, Serialize};

use crate::action::{ActionResult, Digest, Directory};

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct FindMissingBlobsRequest {
    #[prost(message, repeated, tag = "1")]
    pub blob_digests: Vec<Digest>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct FindMissingBlobsResponse {
    #[prost(message, repeated, tag = "1")]
    pub missing_blob_digests: Vec<Digest>,
}

/// One blob to ingest: its declared digest and the content bytes.
#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct UpdateBlobRequest {
    #[prost(message, optional, tag = "1")]
    pub content_digest: Option<Digest>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

impl UpdateBlobRequest {
    pub const TYPE_NAME: &'static str = "sawmill.UpdateBlobRequest";
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct BatchUpdateBlobsRequest {
    #[prost(message, repeated, tag = "1")]
    pub requests: Vec<UpdateBlobRequest>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct BatchUpdateBlobsResponse {}

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct GetTreeRequest {
    #[prost(message, optional, tag = "1")]
    pub root_digest: Option<Digest>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct GetTreeResponse {
    #[prost(message, repeated, tag = "1")]
    pub directories: Vec<Directory>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct GetActionResultRequest {
    #[prost(message, optional, tag = "1")]
    pub action_digest: Option<Digest>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct UpdateActionResultRequest {
    #[prost(message, optional, tag = "1")]
    pub action_digest: Option<Digest>,
    #[prost(message, optional, tag = "2")]
    pub action_result: Option<ActionResult>,
}
