use std::path::Path;

use sha1::Sha1;
use sha2::{Digest, Sha512};
use tokio::io::AsyncReadExt;

const CHUNK_SIZE: usize = 65536;

/// Lowercase hex digest of a file.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct HexDigest(String);

impl HexDigest {
    #[cfg(test)]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_digest<D: Digest>(hasher: D) -> Self {
        Self(hex::encode(hasher.finalize()))
    }
}

impl std::fmt::Display for HexDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-1 and SHA-512 of the same file.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FileDigests {
    pub sha1: HexDigest,
    pub sha512: HexDigest,
}

impl FileDigests {
    /// Hash `path` with both algorithms in a single read.
    pub async fn from_async_path(path: &Path) -> Result<Self, std::io::Error> {
        let mut sha1 = Sha1::new();
        let mut sha512 = Sha512::new();
        for_each_chunk(path, |chunk| {
            sha1.update(chunk);
            sha512.update(chunk);
        })
        .await?;

        Ok(Self {
            sha1: HexDigest::from_digest(sha1),
            sha512: HexDigest::from_digest(sha512),
        })
    }
}

/// SHA-512 of `path`.
pub async fn sha512_async_path(path: &Path) -> Result<HexDigest, std::io::Error> {
    let mut sha512 = Sha512::new();
    for_each_chunk(path, |chunk| sha512.update(chunk)).await?;
    Ok(HexDigest::from_digest(sha512))
}

async fn for_each_chunk(path: &Path, mut f: impl FnMut(&[u8])) -> Result<(), std::io::Error> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let len = file.read(&mut buf).await?;
        if len == 0 {
            break;
        }
        f(&buf[..len]);
    }
    Ok(())
}
