//! Change notification messages for the watch service.

use prost::Message;
use serde::{Deserialize, Serialize};

use crate::operations::Packed;

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct WatchRequest {
    /// The element to watch, e.g. a command digest hash.
    #[prost(string, tag = "1")]
    pub target: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ChangeState {
    Error = 0,
    Initial = 1,
    Exists = 2,
    DoesNotExist = 3,
}

/// A state change of one element, with an optional typed payload.
#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct Change {
    #[prost(string, tag = "1")]
    pub element: String,
    #[prost(enumeration = "ChangeState", tag = "2")]
    pub state: i32,
    #[prost(message, optional, tag = "3")]
    pub data: Option<Packed>,
}

impl Change {
    pub fn exists(element: impl Into<String>, data: Packed) -> Self {
        Self {
            element: element.into(),
            state: ChangeState::Exists as i32,
            data: Some(data),
        }
    }

    pub fn is_exists(&self) -> bool {
        self.state == ChangeState::Exists as i32
    }
}

/// The unit a watch stream delivers.
#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct ChangeBatch {
    #[prost(message, repeated, tag = "1")]
    pub changes: Vec<Change>,
}
