//! Content-addressed archive storage: hash, store, and retrieve byte
//! sequences under their SHA-256 digest, paired with a mutable JSON
//! metafile sidecar.
//!
//! See [`put::put`] for ingestion, [`ops`] for retrieval and metadata
//! mutation, [`import::import`] for bulk manifest ingestion, and
//! [`index::index`] for the integrity scan.

pub mod archive;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod import;
pub mod index;
pub mod metafile;
pub mod ops;
pub mod put;
pub mod store;

pub use archive::ArchiveFile;
pub use digest::Digest;
pub use error::{Error, Result};
pub use index::{index as run_index, IndexOptions};
pub use import::import;
pub use metafile::{ManagedFields, MetaDocument};
pub use put::{put, PutInput, PutOptions};
pub use store::{build_store, resolve_unique, BoxedReader, Store, TargetConfig};
