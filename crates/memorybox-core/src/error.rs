//! The tagged error discriminator shared across every memorybox operation.

use thiserror::Error;

/// Every failure mode a memorybox operation can surface (spec §7).
#[derive(Debug, Error)]
pub enum Error {
    /// A store operation targeted a name that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A prefix resolved to a number of entries other than exactly one.
    #[error("prefix resolved to {0} entries, expected exactly 1")]
    AmbiguousOrMissing(usize),

    /// A URL fetch returned a non-2xx status after retries were exhausted.
    #[error("http status {0}")]
    HttpStatus(u16),

    /// A connection-level failure while fetching a URL.
    #[error("network error: {0}")]
    NetworkError(String),

    /// A local filesystem read, write, or fsync failure.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// The hasher failed to read the source to EOF.
    #[error("hash error: {0}")]
    HashError(String),

    /// A store factory was asked to construct an unrecognized backend type.
    #[error("unknown store type: {0}")]
    UnknownStoreType(String),

    /// Index re-hash disagreed with the stored digest (corruption).
    #[error("corruption detected in {0}: recomputed digest does not match stored name")]
    Corruption(String),

    /// Index found a datafile with no metafile, or vice versa.
    #[error("missing pair(s): {0:?}")]
    MissingPair(Vec<String>),

    /// A metafile's `memorybox.file` field did not equal its paired datafile's name.
    #[error("metafile {metafile} claims file {claimed}, but is paired with {actual}")]
    MetaMismatch {
        /// The metafile's own name.
        metafile: String,
        /// What `memorybox.file` says the datafile's name is.
        claimed: String,
        /// What the datafile's name actually is.
        actual: String,
    },

    /// The operation was cancelled before or during execution.
    #[error("cancelled")]
    Cancelled,

    /// A store-backend-specific failure not covered by the above.
    #[error("store error: {0}")]
    Store(String),

    /// Malformed JSON where a metafile or metadata document was expected.
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A manifest line was malformed (missing the specifier/metadata separator).
    #[error("malformed manifest line {0}: {1}")]
    MalformedManifestLine(usize, String),

    /// Two manifest lines shared a specifier but disagreed on metadata.
    #[error("manifest specifier {0} appears twice with conflicting metadata")]
    ConflictingManifestMetadata(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            Error::HttpStatus(status.as_u16())
        } else {
            Error::NetworkError(e.to_string())
        }
    }
}
