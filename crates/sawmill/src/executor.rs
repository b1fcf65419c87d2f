//! Action execution: materialize an input tree out of the content store,
//! run the command, and ingest whatever it produced back into the store.
//!
//! Materialization is incremental: a destination file whose hash and size
//! already match the declared digest is left alone, so consecutive actions
//! sharing an input tree do not re-download it. Output ingestion streams
//! file content through the digest function rather than buffering it.

use prost::Message;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tracing::{debug, info};

use sawcas::{DigestFunction, SharedStore, StoreError};
use sawproto::{
    Action, ActionResult, Command, Digest, Directory, DirectoryNode, FileNode, OutputDirectory,
    OutputFile,
};

use crate::keys::Keyspace;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("decoding {what}: {message}")]
    Decode { what: &'static str, message: String },
    #[error("action is missing its {0} digest")]
    MissingDigest(&'static str),
    #[error("command has no arguments")]
    EmptyCommand,
    #[error("spawning {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

impl From<ExecError> for sawproto::Status {
    fn from(err: ExecError) -> Self {
        sawproto::Status::internal(err.to_string())
    }
}

/// Runs actions against a shared content store.
#[derive(Clone)]
pub struct Executor {
    store: SharedStore,
    keys: Keyspace,
    digest_fn: DigestFunction,
    exec_root: PathBuf,
}

impl Executor {
    pub fn new(
        store: SharedStore,
        keys: Keyspace,
        digest_fn: DigestFunction,
        exec_root: PathBuf,
    ) -> Self {
        Self {
            store,
            keys,
            digest_fn,
            exec_root,
        }
    }

    pub fn exec_root(&self) -> &Path {
        &self.exec_root
    }

    async fn fetch_decode<M: Message + Default>(
        &self,
        digest: &Digest,
        what: &'static str,
    ) -> Result<M, ExecError> {
        let bytes = self.store.get_bytes(&self.keys.cas(&digest.hash)).await?;
        M::decode(bytes.as_slice()).map_err(|e| ExecError::Decode {
            what,
            message: e.to_string(),
        })
    }

    /// Fetch and decode the command an action points at.
    pub async fn fetch_command(&self, action: &Action) -> Result<Command, ExecError> {
        let digest = action
            .command_digest
            .as_ref()
            .ok_or(ExecError::MissingDigest("command"))?;
        let command: Command = self.fetch_decode(digest, "command blob").await?;
        if command.arguments.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        Ok(command)
    }

    /// Materialize the input tree rooted at `root` into the exec root.
    pub async fn materialize_tree(&self, root: &Digest) -> Result<(), ExecError> {
        let dest = self.exec_root.clone();
        self.materialize_dir(root.clone(), dest).await
    }

    fn materialize_dir(
        &self,
        digest: Digest,
        dest: PathBuf,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExecError>> + Send + '_>> {
        Box::pin(async move {
            let dir: Directory = self.fetch_decode(&digest, "directory blob").await?;
            ensure_dir(&dest).await?;

            for sub in &dir.directories {
                let sub_digest = sub
                    .digest
                    .clone()
                    .ok_or(ExecError::MissingDigest("subdirectory"))?;
                self.materialize_dir(sub_digest, dest.join(&sub.name)).await?;
            }
            for file in &dir.files {
                self.materialize_file(file, &dest).await?;
            }
            Ok(())
        })
    }

    async fn materialize_file(&self, node: &FileNode, dir: &Path) -> Result<(), ExecError> {
        let digest = node
            .digest
            .as_ref()
            .ok_or(ExecError::MissingDigest("file"))?;
        let dest = dir.join(&node.name);

        if digest.size_bytes == 0 {
            debug!(path = %dest.display(), "declared empty, creating instead of fetching");
            tokio::fs::File::create(&dest).await?;
            set_executable(&dest, node.is_executable).await?;
            return Ok(());
        }

        if let Ok(file) = tokio::fs::File::open(&dest).await {
            let local = self.digest_fn.digest_of_reader(file).await?;
            if local == *digest {
                debug!(path = %dest.display(), "already present, skipping fetch");
                return Ok(());
            }
        }

        let mut reader = self.store.get(&self.keys.cas(&digest.hash)).await?;
        let mut file = tokio::fs::File::create(&dest).await?;
        tokio::io::copy(&mut reader, &mut file).await?;
        drop(file);
        set_executable(&dest, node.is_executable).await?;
        Ok(())
    }

    /// Run the command and ingest its outputs, producing the result to
    /// cache. A non-zero exit is not an error; it is data.
    pub async fn run(&self, action: &Action, command: &Command) -> Result<ActionResult, ExecError> {
        if command.arguments.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let program = &command.arguments[0];
        info!(%program, "running action command");

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(&command.arguments[1..])
            .current_dir(&self.exec_root);
        for var in &command.environment {
            cmd.env(&var.name, &var.value);
        }
        let output = cmd.output().await.map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?;
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(exit_code, "command finished");

        let stdout_digest = self.ingest_blob(output.stdout).await?;
        let stderr_digest = self.ingest_blob(output.stderr).await?;

        let mut output_files = Vec::with_capacity(action.output_files.len());
        for path in &action.output_files {
            let full = self.exec_root.join(path);
            let (digest, is_executable) = self.ingest_file(&full).await?;
            output_files.push(OutputFile {
                path: path.clone(),
                digest: Some(digest),
                is_executable,
            });
        }

        let mut output_directories = Vec::with_capacity(action.output_directories.len());
        for path in &action.output_directories {
            let full = self.exec_root.join(path);
            let digest = self.ingest_dir(full).await?;
            output_directories.push(OutputDirectory {
                path: path.clone(),
                digest: Some(digest),
            });
        }

        Ok(ActionResult {
            exit_code,
            output_files,
            output_directories,
            stdout_digest: Some(stdout_digest),
            stderr_digest: Some(stderr_digest),
        })
    }

    /// Store an in-memory blob under its computed digest.
    pub async fn ingest_blob(&self, data: Vec<u8>) -> Result<Digest, ExecError> {
        let digest = self.digest_fn.digest_of(&data);
        self.store
            .put_bytes(&self.keys.cas(&digest.hash), data)
            .await?;
        Ok(digest)
    }

    /// Store a message's canonical encoding under its computed digest.
    pub async fn ingest_message<M: Message>(&self, message: &M) -> Result<Digest, ExecError> {
        self.ingest_blob(message.encode_to_vec()).await
    }

    /// Hash a file on disk, stream it into the store, and report whether it
    /// carries an executable bit.
    pub async fn ingest_file(&self, path: &Path) -> Result<(Digest, bool), ExecError> {
        let file = tokio::fs::File::open(path).await?;
        let digest = self.digest_fn.digest_of_reader(file).await?;

        let reader = tokio::fs::File::open(path).await?;
        self.store
            .put(&self.keys.cas(&digest.hash), Box::new(reader))
            .await?;

        let is_executable = is_executable(path).await?;
        Ok((digest, is_executable))
    }

    /// Recursively ingest a directory: children first, then the descriptor
    /// blob itself. Entries are ordered by name so the descriptor digest is
    /// deterministic.
    fn ingest_dir(
        &self,
        path: PathBuf,
    ) -> Pin<Box<dyn Future<Output = Result<Digest, ExecError>> + Send + '_>> {
        Box::pin(async move {
            let mut entries = Vec::new();
            let mut read_dir = tokio::fs::read_dir(&path).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                entries.push(entry);
            }
            entries.sort_by_key(|e| e.file_name());

            let mut descriptor = Directory::default();
            for entry in entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                let entry_path = entry.path();
                if entry.file_type().await?.is_dir() {
                    let digest = self.ingest_dir(entry_path).await?;
                    descriptor.directories.push(DirectoryNode {
                        name,
                        digest: Some(digest),
                    });
                } else {
                    let (digest, is_executable) = self.ingest_file(&entry_path).await?;
                    descriptor.files.push(FileNode {
                        name,
                        digest: Some(digest),
                        is_executable,
                    });
                }
            }
            self.ingest_message(&descriptor).await
        })
    }
}

async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777)).await?;
    }
    Ok(())
}

async fn set_executable(path: &Path, executable: bool) -> std::io::Result<()> {
    if !executable {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777)).await?;
    }
    Ok(())
}

#[cfg(unix)]
async fn is_executable(path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = tokio::fs::metadata(path).await?;
    Ok(metadata.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
async fn is_executable(_path: &Path) -> std::io::Result<bool> {
    Ok(false)
}
