//! Canonical RPC status codes and the service-level error type.

use prost::Message;
use serde::{Deserialize, Serialize};

/// Canonical RPC codes. The subset this service actually produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    Ok,
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    Internal,
    Unimplemented,
    Unavailable,
    Unknown,
}

impl Code {
    pub fn as_i32(self) -> i32 {
        match self {
            Code::Ok => 0,
            Code::InvalidArgument => 3,
            Code::NotFound => 5,
            Code::FailedPrecondition => 9,
            Code::Internal => 13,
            Code::Unimplemented => 12,
            Code::Unavailable => 14,
            Code::Unknown => 2,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Code::Ok,
            3 => Code::InvalidArgument,
            5 => Code::NotFound,
            9 => Code::FailedPrecondition,
            13 => Code::Internal,
            12 => Code::Unimplemented,
            14 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }
}

/// An RPC failure: a canonical code plus a human-readable message.
///
/// Services return `Result<_, Status>`; the server surfaces a `Status` to
/// the client as an error frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn code(&self) -> Code {
        self.code
    }
}

/// Message form of [`Status`], for embedding in an
/// [`Operation`](crate::operations::Operation) that ended in failure.
#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

impl From<Status> for RpcStatus {
    fn from(status: Status) -> Self {
        Self {
            code: status.code.as_i32(),
            message: status.message,
        }
    }
}

impl From<RpcStatus> for Status {
    fn from(status: RpcStatus) -> Self {
        Self {
            code: Code::from_i32(status.code),
            message: status.message,
        }
    }
}
