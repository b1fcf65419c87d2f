//! SAW01 wire protocol.
//!
//! A SAW01 message is one length-delimited packet with a fixed-width header
//! followed by a variable-width method name and body:
//!
//! ```text
//! magic      "SAW01" (5 bytes)
//! kind       2 bytes (big-endian u16)
//! format     2 bytes (big-endian u16)
//! request id 16 bytes (UUID)
//! method len 2 bytes (big-endian u16)
//! method     UTF-8 (variable)
//! body       bytes (interpretation per format)
//! ```
//!
//! Routing needs only the header, so the server can dispatch without
//! touching the body. Streaming calls correlate frames by request id: a
//! write upload is many `Request` frames sharing one id; reads and watches
//! are answered with a run of `Event` frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

use crate::status::Status;

/// Protocol magic, bumped on breaking changes.
pub const PROTOCOL_MAGIC: &[u8] = b"SAW01";

/// Fixed header length: magic + kind + format + request id + method len.
const HEADER_LEN: usize = 5 + 2 + 2 + 16 + 2;

/// Default ceiling on one frame. Batched blob payloads can be large, so
/// this is tuned well above a typical RPC.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Frame kinds (2 bytes, big-endian).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Client-to-server call (or one element of a client stream).
    Request = 0x0001,
    /// Terminal server response for a request id.
    Reply = 0x0002,
    /// One element of a server stream (read chunks, change batches).
    Event = 0x0003,
    /// Terminal failure; body is a MsgPack [`Status`].
    Error = 0x0004,
    /// Liveness check, answered in place.
    Heartbeat = 0x0005,
    /// Graceful connection teardown.
    Disconnect = 0x0006,
}

impl FrameKind {
    pub fn from_u16(value: u16) -> Result<Self, FrameError> {
        match value {
            0x0001 => Ok(FrameKind::Request),
            0x0002 => Ok(FrameKind::Reply),
            0x0003 => Ok(FrameKind::Event),
            0x0004 => Ok(FrameKind::Error),
            0x0005 => Ok(FrameKind::Heartbeat),
            0x0006 => Ok(FrameKind::Disconnect),
            other => Err(FrameError::InvalidKind(other)),
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Body interpretation (2 bytes, big-endian).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    /// No body (heartbeats, stream terminators).
    Empty = 0x0000,
    /// MsgPack-encoded payload.
    MsgPack = 0x0001,
    /// Raw bytes.
    RawBinary = 0x0002,
}

impl BodyFormat {
    pub fn from_u16(value: u16) -> Result<Self, FrameError> {
        match value {
            0x0000 => Ok(BodyFormat::Empty),
            0x0001 => Ok(BodyFormat::MsgPack),
            0x0002 => Ok(BodyFormat::RawBinary),
            other => Err(FrameError::InvalidFormat(other)),
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// The RPC surface, as routable method names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Execute,
    GetActionResult,
    UpdateActionResult,
    FindMissingBlobs,
    BatchUpdateBlobs,
    GetTree,
    Read,
    Write,
    QueryWriteStatus,
    Watch,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Execute => "execution.execute",
            Method::GetActionResult => "action_cache.get_action_result",
            Method::UpdateActionResult => "action_cache.update_action_result",
            Method::FindMissingBlobs => "cas.find_missing_blobs",
            Method::BatchUpdateBlobs => "cas.batch_update_blobs",
            Method::GetTree => "cas.get_tree",
            Method::Read => "bytestream.read",
            Method::Write => "bytestream.write",
            Method::QueryWriteStatus => "bytestream.query_write_status",
            Method::Watch => "watcher.watch",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "execution.execute" => Some(Method::Execute),
            "action_cache.get_action_result" => Some(Method::GetActionResult),
            "action_cache.update_action_result" => Some(Method::UpdateActionResult),
            "cas.find_missing_blobs" => Some(Method::FindMissingBlobs),
            "cas.batch_update_blobs" => Some(Method::BatchUpdateBlobs),
            "cas.get_tree" => Some(Method::GetTree),
            "bytestream.read" => Some(Method::Read),
            "bytestream.write" => Some(Method::Write),
            "bytestream.query_write_status" => Some(Method::QueryWriteStatus),
            "watcher.watch" => Some(Method::Watch),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors during frame encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid protocol magic: expected SAW01")]
    InvalidMagic,
    #[error("frame truncated: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("frame of {size} bytes exceeds limit of {max}")]
    TooLarge { size: usize, max: usize },
    #[error("invalid frame kind: {0:#06x}")]
    InvalidKind(u16),
    #[error("invalid body format: {0:#06x}")]
    InvalidFormat(u16),
    #[error("invalid UTF-8 in method name")]
    InvalidMethod,
    #[error("body format mismatch: expected {expected:?}, got {actual:?}")]
    FormatMismatch {
        expected: BodyFormat,
        actual: BodyFormat,
    },
    #[error("msgpack decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("msgpack encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed SAW01 message.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub format: BodyFormat,
    pub request_id: Uuid,
    pub method: String,
    pub body: Bytes,
}

impl Frame {
    /// Serialize the frame into a single buffer (no length prefix; that is
    /// the codec's job).
    pub fn encode(&self) -> Bytes {
        let method = self.method.as_bytes();
        let mut buf = BytesMut::with_capacity(HEADER_LEN + method.len() + self.body.len());
        buf.put_slice(PROTOCOL_MAGIC);
        buf.put_u16(self.kind.to_u16());
        buf.put_u16(self.format.to_u16());
        buf.put_slice(self.request_id.as_bytes());
        buf.put_u16(method.len() as u16);
        buf.put_slice(method);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Parse a frame from a single buffer.
    pub fn decode(mut buf: Bytes) -> Result<Self, FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::Truncated {
                expected: HEADER_LEN,
                actual: buf.len(),
            });
        }
        let magic = buf.split_to(PROTOCOL_MAGIC.len());
        if magic.as_ref() != PROTOCOL_MAGIC {
            return Err(FrameError::InvalidMagic);
        }
        let kind = FrameKind::from_u16(buf.get_u16())?;
        let format = BodyFormat::from_u16(buf.get_u16())?;
        let mut id_bytes = [0u8; 16];
        id_bytes.copy_from_slice(&buf.split_to(16));
        let request_id = Uuid::from_bytes(id_bytes);
        let method_len = buf.get_u16() as usize;
        if buf.len() < method_len {
            return Err(FrameError::Truncated {
                expected: method_len,
                actual: buf.len(),
            });
        }
        let method = std::str::from_utf8(&buf.split_to(method_len))
            .map_err(|_| FrameError::InvalidMethod)?
            .to_string();
        Ok(Self {
            kind,
            format,
            request_id,
            method,
            body: buf,
        })
    }

    /// A request frame with a MsgPack payload and fresh request id.
    pub fn request<T: Serialize>(method: Method, payload: &T) -> Result<Self, FrameError> {
        Self::request_with_id(method, Uuid::new_v4(), payload)
    }

    /// A request frame reusing an existing request id (stream elements).
    pub fn request_with_id<T: Serialize>(
        method: Method,
        request_id: Uuid,
        payload: &T,
    ) -> Result<Self, FrameError> {
        let body = rmp_serde::to_vec_named(payload)?;
        Ok(Self {
            kind: FrameKind::Request,
            format: BodyFormat::MsgPack,
            request_id,
            method: method.as_str().to_string(),
            body: Bytes::from(body),
        })
    }

    /// The terminal reply for a request id.
    pub fn reply<T: Serialize>(request_id: Uuid, payload: &T) -> Result<Self, FrameError> {
        let body = rmp_serde::to_vec_named(payload)?;
        Ok(Self {
            kind: FrameKind::Reply,
            format: BodyFormat::MsgPack,
            request_id,
            method: String::new(),
            body: Bytes::from(body),
        })
    }

    /// An empty terminal reply (stream end marker).
    pub fn reply_empty(request_id: Uuid) -> Self {
        Self {
            kind: FrameKind::Reply,
            format: BodyFormat::Empty,
            request_id,
            method: String::new(),
            body: Bytes::new(),
        }
    }

    /// One element of a server stream.
    pub fn event<T: Serialize>(request_id: Uuid, payload: &T) -> Result<Self, FrameError> {
        let body = rmp_serde::to_vec_named(payload)?;
        Ok(Self {
            kind: FrameKind::Event,
            format: BodyFormat::MsgPack,
            request_id,
            method: String::new(),
            body: Bytes::from(body),
        })
    }

    /// A terminal error carrying a [`Status`].
    pub fn error(request_id: Uuid, status: &Status) -> Self {
        let body = rmp_serde::to_vec_named(status).unwrap_or_default();
        Self {
            kind: FrameKind::Error,
            format: BodyFormat::MsgPack,
            request_id,
            method: String::new(),
            body: Bytes::from(body),
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            kind: FrameKind::Heartbeat,
            format: BodyFormat::Empty,
            request_id: Uuid::new_v4(),
            method: String::new(),
            body: Bytes::new(),
        }
    }

    pub fn disconnect() -> Self {
        Self {
            kind: FrameKind::Disconnect,
            format: BodyFormat::Empty,
            request_id: Uuid::new_v4(),
            method: String::new(),
            body: Bytes::new(),
        }
    }

    /// Extract a typed MsgPack payload, checking the body format.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        if self.format != BodyFormat::MsgPack {
            return Err(FrameError::FormatMismatch {
                expected: BodyFormat::MsgPack,
                actual: self.format,
            });
        }
        Ok(rmp_serde::from_slice(&self.body)?)
    }
}

/// Length-prefixed codec for SAW01 frames: 4-byte big-endian length, then
/// the frame buffer. The length is validated before any allocation.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > self.max_frame_len {
            return Err(FrameError::TooLarge {
                size: length,
                max: self.max_frame_len,
            });
        }
        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }
        src.advance(4);
        let payload = src.split_to(length).freeze();
        Frame::decode(payload).map(Some)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let encoded = item.encode();
        if encoded.len() > self.max_frame_len {
            return Err(FrameError::TooLarge {
                size: encoded.len(),
                max: self.max_frame_len,
            });
        }
        dst.reserve(4 + encoded.len());
        dst.put_u32(encoded.len() as u32);
        dst.extend_from_slice(&encoded);
        Ok(())
    }
}
