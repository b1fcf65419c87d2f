//! A typed client for the SAW01 surface.
//!
//! One connection, one call in flight at a time. Streaming uploads and
//! downloads are driven frame-by-frame; a watch occupies its connection for
//! as long as the subscription lives, so use a dedicated connection for it.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use uuid::Uuid;

use crate::frame::{Frame, FrameCodec, FrameError, FrameKind, Method};
use crate::operations::{ExecuteRequest, Operation};
use crate::status::Status;
use crate::storage::{
    BatchUpdateBlobsRequest, BatchUpdateBlobsResponse, FindMissingBlobsRequest,
    FindMissingBlobsResponse, GetActionResultRequest, UpdateActionResultRequest,
};
use crate::transfer::{
    QueryWriteStatusRequest, QueryWriteStatusResponse, ReadRequest, ReadResponse, WriteRequest,
    WriteResponse,
};
use crate::watch::{ChangeBatch, WatchRequest};
use crate::ActionResult;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Rpc(#[from] Status),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Client {
    framed: Framed<TcpStream, FrameCodec>,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, FrameCodec::new()),
        })
    }

    async fn send(&mut self, frame: Frame) -> Result<(), ClientError> {
        self.framed.send(frame).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Frame, ClientError> {
        match self.framed.next().await {
            Some(frame) => Ok(frame?),
            None => Err(ClientError::Closed),
        }
    }

    /// Wait for the terminal frame of `request_id`, skipping anything else.
    async fn recv_terminal(&mut self, request_id: Uuid) -> Result<Frame, ClientError> {
        loop {
            let frame = self.recv().await?;
            if frame.request_id != request_id {
                continue;
            }
            match frame.kind {
                FrameKind::Reply => return Ok(frame),
                FrameKind::Error => {
                    let status: Status = frame.payload()?;
                    return Err(ClientError::Rpc(status));
                }
                _ => continue,
            }
        }
    }

    async fn unary<Req: Serialize, Resp: DeserializeOwned>(
        &mut self,
        method: Method,
        request: &Req,
    ) -> Result<Resp, ClientError> {
        let frame = Frame::request(method, request)?;
        let request_id = frame.request_id;
        self.send(frame).await?;
        let reply = self.recv_terminal(request_id).await?;
        Ok(reply.payload()?)
    }

    pub async fn execute(&mut self, request: &ExecuteRequest) -> Result<Operation, ClientError> {
        self.unary(Method::Execute, request).await
    }

    pub async fn get_action_result(
        &mut self,
        request: &GetActionResultRequest,
    ) -> Result<ActionResult, ClientError> {
        self.unary(Method::GetActionResult, request).await
    }

    pub async fn update_action_result(
        &mut self,
        request: &UpdateActionResultRequest,
    ) -> Result<ActionResult, ClientError> {
        self.unary(Method::UpdateActionResult, request).await
    }

    pub async fn find_missing_blobs(
        &mut self,
        request: &FindMissingBlobsRequest,
    ) -> Result<FindMissingBlobsResponse, ClientError> {
        self.unary(Method::FindMissingBlobs, request).await
    }

    pub async fn batch_update_blobs(
        &mut self,
        request: &BatchUpdateBlobsRequest,
    ) -> Result<BatchUpdateBlobsResponse, ClientError> {
        self.unary(Method::BatchUpdateBlobs, request).await
    }

    pub async fn query_write_status(
        &mut self,
        request: &QueryWriteStatusRequest,
    ) -> Result<QueryWriteStatusResponse, ClientError> {
        self.unary(Method::QueryWriteStatus, request).await
    }

    /// Upload `data` in chunks under an `uploads/<uuid>/...` resource name.
    pub async fn write_blob(
        &mut self,
        resource_name: &str,
        data: &[u8],
        chunk_size: usize,
    ) -> Result<WriteResponse, ClientError> {
        let request_id = Uuid::new_v4();
        let mut offset = 0usize;
        loop {
            let end = (offset + chunk_size).min(data.len());
            let finish = end == data.len();
            let request = WriteRequest {
                resource_name: resource_name.to_string(),
                write_offset: offset as i64,
                finish_write: finish,
                data: data[offset..end].to_vec(),
            };
            self.send(Frame::request_with_id(Method::Write, request_id, &request)?)
                .await?;
            offset = end;
            if finish {
                break;
            }
        }
        let reply = self.recv_terminal(request_id).await?;
        Ok(reply.payload()?)
    }

    /// Download a blob, concatenating the chunk stream.
    pub async fn read_blob(
        &mut self,
        resource_name: &str,
        read_offset: i64,
        read_limit: i64,
    ) -> Result<Bytes, ClientError> {
        let request = ReadRequest {
            resource_name: resource_name.to_string(),
            read_offset,
            read_limit,
        };
        let frame = Frame::request(Method::Read, &request)?;
        let request_id = frame.request_id;
        self.send(frame).await?;

        let mut data = Vec::new();
        loop {
            let frame = self.recv().await?;
            if frame.request_id != request_id {
                continue;
            }
            match frame.kind {
                FrameKind::Event => {
                    let chunk: ReadResponse = frame.payload()?;
                    data.extend_from_slice(&chunk.data);
                }
                FrameKind::Reply => return Ok(Bytes::from(data)),
                FrameKind::Error => {
                    let status: Status = frame.payload()?;
                    return Err(ClientError::Rpc(status));
                }
                _ => continue,
            }
        }
    }

    /// Begin watching `target`. The returned id correlates the event stream;
    /// pass it to [`next_batch`](Self::next_batch).
    pub async fn start_watch(&mut self, target: &str) -> Result<Uuid, ClientError> {
        let request = WatchRequest {
            target: target.to_string(),
        };
        let frame = Frame::request(Method::Watch, &request)?;
        let request_id = frame.request_id;
        self.send(frame).await?;
        Ok(request_id)
    }

    /// Wait for the next change batch of an active watch.
    pub async fn next_batch(&mut self, watch_id: Uuid) -> Result<ChangeBatch, ClientError> {
        loop {
            let frame = self.recv().await?;
            if frame.request_id != watch_id {
                continue;
            }
            match frame.kind {
                FrameKind::Event => return Ok(frame.payload()?),
                FrameKind::Error => {
                    let status: Status = frame.payload()?;
                    return Err(ClientError::Rpc(status));
                }
                _ => continue,
            }
        }
    }
}
