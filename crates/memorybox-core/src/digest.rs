//! Streaming content digest (spec §4.1).

use sha2::digest::{FixedOutput as _, Update as _};
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Algorithm tag appended to every digest this version produces.
pub const ALGORITHM_SUFFIX: &str = "sha256";

/// A stable, algorithm-tagged content digest: `<hex-lowercase-sha256>-sha256`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

impl Digest {
    /// Wrap an already-formatted digest string (`<hex>-sha256`), as read back
    /// from a store name or a metafile's `memorybox.file` field.
    pub fn from_raw(s: impl Into<String>) -> Self {
        Digest(s.into())
    }

    /// The digest's string form, as used for store keys.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read `source` to EOF, returning its digest and the number of bytes consumed.
///
/// Fails only if the underlying read fails (spec §4.1: "Fails only if the
/// source read fails").
pub async fn hash_reader<R>(mut source: R) -> Result<(Digest, u64)>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::default();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total: u64 = 0;
    loop {
        let n = source
            .read(&mut buf)
            .await
            .map_err(|e| Error::HashError(e.to_string()))?;
        if n == 0 {
            break;
        }
        Update::update(&mut hasher, &buf[..n]);
        total += n as u64;
    }
    let out = hasher.finalize_fixed();
    let digest = Digest(format!("{}-{}", hex::encode(out), ALGORITHM_SUFFIX));
    Ok((digest, total))
}

/// Hash an in-memory byte slice directly (used when constructing synthetic
/// metafile pairs, where the bytes are already resident).
pub fn hash_bytes(bytes: &[u8]) -> Digest {
    let mut hasher = Sha256::default();
    Update::update(&mut hasher, bytes);
    let out = hasher.finalize_fixed();
    Digest(format!("{}-{}", hex::encode(out), ALGORITHM_SUFFIX))
}
