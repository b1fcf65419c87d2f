//! Digest computation, parameterized over the hash family.
//!
//! The wire protocol is digest-function agnostic; a deployment picks one
//! family and every digest in the system is the lowercase hex of that
//! function over the content. SHA-1 is the default for compatibility with
//! existing build-tool clients.

use serde::{Deserialize, Serialize};
use sha1::Digest as _;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt};

use sawproto::Digest;

/// Supported content-hash families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestFunction {
    #[default]
    Sha1,
    Sha256,
    Blake3,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown digest function: {0}")]
pub struct UnknownDigestFunction(String);

impl DigestFunction {
    pub fn name(&self) -> &'static str {
        match self {
            DigestFunction::Sha1 => "sha1",
            DigestFunction::Sha256 => "sha256",
            DigestFunction::Blake3 => "blake3",
        }
    }

    /// Start a streaming hasher for this family.
    pub fn hasher(&self) -> Hasher {
        let inner = match self {
            DigestFunction::Sha1 => HasherKind::Sha1(sha1::Sha1::new()),
            DigestFunction::Sha256 => HasherKind::Sha256(sha2::Sha256::new()),
            DigestFunction::Blake3 => HasherKind::Blake3(Box::new(blake3::Hasher::new())),
        };
        Hasher { inner, len: 0 }
    }

    /// Digest of an in-memory byte string.
    pub fn digest_of(&self, data: &[u8]) -> Digest {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Digest of a stream, without buffering it whole.
    pub async fn digest_of_reader<R>(&self, mut reader: R) -> std::io::Result<Digest>
    where
        R: AsyncRead + Unpin,
    {
        let mut hasher = self.hasher();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    /// Check that `data` matches a declared digest (hash and size).
    pub fn verify(&self, data: &[u8], declared: &Digest) -> bool {
        if data.len() as i64 != declared.size_bytes {
            return false;
        }
        self.digest_of(data).hash == declared.hash.to_lowercase()
    }
}

impl FromStr for DigestFunction {
    type Err = UnknownDigestFunction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(DigestFunction::Sha1),
            "sha256" | "sha-256" => Ok(DigestFunction::Sha256),
            "blake3" => Ok(DigestFunction::Blake3),
            other => Err(UnknownDigestFunction(other.to_string())),
        }
    }
}

impl std::fmt::Display for DigestFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

enum HasherKind {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

/// Incremental hash state; tracks the byte count so `finalize` can produce
/// a complete [`Digest`].
pub struct Hasher {
    inner: HasherKind,
    len: u64,
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        self.len += data.len() as u64;
        match &mut self.inner {
            HasherKind::Sha1(h) => h.update(data),
            HasherKind::Sha256(h) => h.update(data),
            HasherKind::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize(self) -> Digest {
        let hash = match self.inner {
            HasherKind::Sha1(h) => hex::encode(h.finalize()),
            HasherKind::Sha256(h) => hex::encode(h.finalize()),
            HasherKind::Blake3(h) => hex::encode(h.finalize().as_bytes()),
        };
        Digest::new(hash, self.len as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_known_vectors() {
        let d = DigestFunction::Sha1.digest_of(b"hello");
        assert_eq!(d.hash, "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
        assert_eq!(d.size_bytes, 5);

        let empty = DigestFunction::Sha1.digest_of(b"");
        assert_eq!(empty.hash, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(empty.size_bytes, 0);
    }

    #[test]
    fn sha256_known_vector() {
        let d = DigestFunction::Sha256.digest_of(b"hello");
        assert_eq!(
            d.hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn blake3_shape_and_determinism() {
        let a = DigestFunction::Blake3.digest_of(b"hello");
        let b = DigestFunction::Blake3.digest_of(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.hash.len(), 64);
        assert!(a.hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn streaming_matches_one_shot() {
        let one_shot = DigestFunction::Sha1.digest_of(b"helloworld");
        let mut hasher = DigestFunction::Sha1.hasher();
        hasher.update(b"hello");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), one_shot);
    }

    #[tokio::test]
    async fn reader_digest_matches_one_shot() {
        let data = vec![7u8; 200 * 1024];
        let from_reader = DigestFunction::Sha256
            .digest_of_reader(data.as_slice())
            .await
            .unwrap();
        assert_eq!(from_reader, DigestFunction::Sha256.digest_of(&data));
    }

    #[test]
    fn verify_checks_hash_and_size() {
        let data = b"content";
        let good = DigestFunction::Sha1.digest_of(data);
        assert!(DigestFunction::Sha1.verify(data, &good));

        let wrong_size = Digest::new(good.hash.clone(), 999);
        assert!(!DigestFunction::Sha1.verify(data, &wrong_size));

        let wrong_hash = Digest::new("0000", data.len() as i64);
        assert!(!DigestFunction::Sha1.verify(data, &wrong_hash));
    }

    #[test]
    fn parse_names() {
        assert_eq!("sha1".parse::<DigestFunction>().unwrap(), DigestFunction::Sha1);
        assert_eq!(
            "SHA-256".parse::<DigestFunction>().unwrap(),
            DigestFunction::Sha256
        );
        assert!("md5".parse::<DigestFunction>().is_err());
    }
}
