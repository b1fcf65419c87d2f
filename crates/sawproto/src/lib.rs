//! sawproto - wire and data-model types for the sawmill build execution
//! service.
//!
//! The crate has two layers:
//!
//! - **Data model**: content-addressed messages ([`Digest`], [`Directory`],
//!   [`Command`], [`Action`], [`ActionResult`], ...) with a canonical
//!   protobuf encoding. Canonical bytes are what digests are computed over
//!   and what the blob store persists, so encoding stability is a
//!   correctness requirement, not a convenience.
//! - **SAW01 framing**: a length-delimited frame protocol (see [`frame`])
//!   carrying MsgPack request/response payloads, with routing fields in a
//!   fixed header so the server can dispatch without deserializing bodies.
//!
//! Service errors are [`Status`] values with canonical RPC codes; on the
//! wire they travel as dedicated error frames.
//!
//! The `client` feature adds a typed client over the same framing, used by
//! the integration tests and handy for ad-hoc poking at a live server.

pub mod action;
pub mod frame;
pub mod operations;
pub mod status;
pub mod storage;
pub mod transfer;
pub mod watch;

#[cfg(feature = "client")]
pub mod client;

#[cfg(feature = "client")]
pub use client::{Client, ClientError};

pub use action::{
    Action, ActionResult, Command, Digest, Directory, DirectoryNode, EnvironmentVariable,
    FileNode, OutputDirectory, OutputFile,
};
pub use frame::{BodyFormat, Frame, FrameCodec, FrameError, FrameKind, Method, PROTOCOL_MAGIC};
pub use operations::{
    ExecuteOperationMetadata, ExecuteRequest, ExecuteResponse, Operation, Packed, Stage,
};
pub use status::{Code, RpcStatus, Status};
pub use storage::{
    BatchUpdateBlobsRequest, BatchUpdateBlobsResponse, FindMissingBlobsRequest,
    FindMissingBlobsResponse, GetActionResultRequest, GetTreeRequest, GetTreeResponse,
    UpdateActionResultRequest, UpdateBlobRequest,
};
pub use transfer::{
    QueryWriteStatusRequest, QueryWriteStatusResponse, ReadRequest, ReadResponse, WriteRequest,
    WriteResponse,
};
pub use watch::{Change, ChangeBatch, ChangeState, WatchRequest};
