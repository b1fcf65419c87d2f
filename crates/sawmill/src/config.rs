//! Daemon configuration: flags, environment, and an optional TOML file.
//!
//! Precedence is CLI flags over file over environment over defaults; the
//! binary wires that up in `main`. The file form is a `[sawmill]` table:
//!
//! ```toml
//! [sawmill]
//! bucket = "/var/lib/sawmill/bucket"
//! listen = "0.0.0.0:50051"
//! key_prefix = "bazel-cache"
//! digest_function = "sha1"
//! allow_overwrite = true
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use sawcas::DigestFunction;

/// Namespace prefix used by existing build-tool clients.
pub const DEFAULT_KEY_PREFIX: &str = "bazel-cache";

/// Default RPC port.
pub const DEFAULT_PORT: u16 = 50051;

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_frame_len() -> usize {
    sawproto::frame::DEFAULT_MAX_FRAME_LEN
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SawmillConfig {
    /// Directory backing the blob store (the "bucket").
    pub bucket: PathBuf,

    /// Bind address for the RPC surface.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Namespace prefix for cache keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Content-hash family for every digest in the system.
    #[serde(default)]
    pub digest_function: DigestFunction,

    /// Whether a completed byte-stream resource may be rewritten.
    #[serde(default = "default_true")]
    pub allow_overwrite: bool,

    /// Where actions run. Defaults to the process working directory;
    /// isolating it is a deployment concern.
    #[serde(default)]
    pub exec_root: Option<PathBuf>,

    /// Where in-flight uploads are staged. Defaults to `<bucket>/uploads`.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Ceiling on a single RPC frame.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

impl SawmillConfig {
    /// A config with defaults for everything but the bucket.
    pub fn with_bucket(bucket: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            listen: default_listen(),
            key_prefix: default_key_prefix(),
            digest_function: DigestFunction::default(),
            allow_overwrite: true,
            exec_root: None,
            staging_dir: None,
            max_frame_len: default_max_frame_len(),
        }
    }

    /// Load from environment variables, falling back to defaults.
    /// `SAWMILL_BUCKET` is required; `SAWMILL_LISTEN` is optional.
    pub fn from_env() -> Result<Self> {
        let bucket = env::var("SAWMILL_BUCKET")
            .context("SAWMILL_BUCKET is not set and no --bucket flag was given")?;
        let mut config = Self::with_bucket(bucket);
        if let Ok(listen) = env::var("SAWMILL_LISTEN") {
            config.listen = listen
                .parse()
                .with_context(|| format!("invalid SAWMILL_LISTEN address: {listen}"))?;
        }
        Ok(config)
    }

    /// Load the `[sawmill]` section of a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let table: toml::Table = contents
            .parse()
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        let section = table
            .get("sawmill")
            .with_context(|| format!("no [sawmill] section in {}", path.display()))?;
        section
            .clone()
            .try_into()
            .context("failed to parse [sawmill] section")
    }

    /// Effective staging directory.
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| self.bucket.join("uploads"))
    }

    /// Effective execution root.
    pub fn exec_root(&self) -> PathBuf {
        self.exec_root
            .clone()
            .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SawmillConfig::with_bucket("/tank/bucket");
        assert_eq!(config.listen.port(), DEFAULT_PORT);
        assert_eq!(config.key_prefix, "bazel-cache");
        assert_eq!(config.digest_function, DigestFunction::Sha1);
        assert!(config.allow_overwrite);
        assert_eq!(config.staging_dir(), PathBuf::from("/tank/bucket/uploads"));
    }

    #[test]
    fn from_file_parses_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sawmill.toml");
        std::fs::write(
            &path,
            r#"
[sawmill]
bucket = "/data/bucket"
listen = "127.0.0.1:9090"
digest_function = "blake3"
allow_overwrite = false
"#,
        )
        .unwrap();

        let config = SawmillConfig::from_file(&path).unwrap();
        assert_eq!(config.bucket, PathBuf::from("/data/bucket"));
        assert_eq!(config.listen.port(), 9090);
        assert_eq!(config.digest_function, DigestFunction::Blake3);
        assert!(!config.allow_overwrite);
        // Unset fields keep their defaults.
        assert_eq!(config.key_prefix, "bazel-cache");
    }

    #[test]
    fn from_file_without_section_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.toml");
        std::fs::write(&path, "[something_else]\nx = 1\n").unwrap();
        assert!(SawmillConfig::from_file(&path).is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let config = SawmillConfig::with_bucket("/b");
        let text = toml::to_string(&config).unwrap();
        let back: SawmillConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.bucket, config.bucket);
        assert_eq!(back.listen, config.listen);
    }
}
