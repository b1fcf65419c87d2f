//! Content-addressed data model: digests, input trees, commands, and results.
//!
//! Every message here has a canonical binary encoding (`encode_to_vec`) which
//! is what gets hashed and what lands in the blob store. Two structurally
//! equal messages always encode to the same bytes, so digests are stable
//! across processes.

use prost::Message;
use serde::{Deserialize, Serialize};

/// Identity of a byte string: the lowercase hex of its content hash plus its
/// length. Equal digests imply equal content.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Message)]
pub struct Digest {
    #[prost(string, tag = "1")]
    pub hash: String,
    #[prost(int64, tag = "2")]
    pub size_bytes: i64,
}

impl Digest {
    pub fn new(hash: impl Into<String>, size_bytes: i64) -> Self {
        Self {
            hash: hash.into(),
            size_bytes,
        }
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.hash, self.size_bytes)
    }
}

/// A file entry within a [`Directory`].
#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct FileNode {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub digest: Option<Digest>,
    #[prost(bool, tag = "3")]
    pub is_executable: bool,
}

/// A subdirectory entry within a [`Directory`]. The digest points at another
/// serialized `Directory` blob, so identical subtrees share storage.
#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct DirectoryNode {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub digest: Option<Digest>,
}

/// One level of an input or output tree. Names are unique within a
/// directory; the tree as a whole is a DAG of these blobs.
#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct Directory {
    #[prost(message, repeated, tag = "1")]
    pub files: Vec<FileNode>,
    #[prost(message, repeated, tag = "2")]
    pub directories: Vec<DirectoryNode>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct EnvironmentVariable {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

/// The command to run. `arguments[0]` is the executable, the rest are
/// positional arguments.
#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct Command {
    #[prost(string, repeated, tag = "1")]
    pub arguments: Vec<String>,
    #[prost(message, repeated, tag = "2")]
    pub environment: Vec<EnvironmentVariable>,
}

/// A command plus its input tree and declared outputs. The digest of the
/// canonical encoding of this message is the action cache key.
#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct Action {
    #[prost(message, optional, tag = "1")]
    pub command_digest: Option<Digest>,
    #[prost(message, optional, tag = "2")]
    pub input_root_digest: Option<Digest>,
    #[prost(string, repeated, tag = "3")]
    pub output_files: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    pub output_directories: Vec<String>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct OutputFile {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(message, optional, tag = "2")]
    pub digest: Option<Digest>,
    #[prost(bool, tag = "3")]
    pub is_executable: bool,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct OutputDirectory {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(message, optional, tag = "2")]
    pub digest: Option<Digest>,
}

/// What running an [`Action`] produced: the exit code and the digests of
/// everything the command left behind.
#[derive(Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct ActionResult {
    #[prost(int32, tag = "1")]
    pub exit_code: i32,
    #[prost(message, repeated, tag = "2")]
    pub output_files: Vec<OutputFile>,
    #[prost(message, repeated, tag = "3")]
    pub output_directories: Vec<OutputDirectory>,
    #[prost(message, optional, tag = "4")]
    pub stdout_digest: Option<Digest>,
    #[prost(message, optional, tag = "5")]
    pub stderr_digest: Option<Digest>,
}
