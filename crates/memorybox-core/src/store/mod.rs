//! The Store contract and its backends (spec §4.4).

mod local;
mod memory;
mod s3;

pub use local::LocalDiskStore;
pub use memory::TestingStore;
pub use s3::{S3Config, S3Store};

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A boxed, owned, `Send` byte stream -- what `Store::get` returns and what
/// `Store::put` consumes.
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// The four-operation contract every backend implements (spec §4.4).
///
/// All operations take a [`CancellationToken`] so the Put and Index
/// pipelines can propagate cancellation into in-flight I/O (spec §5).
#[async_trait]
pub trait Store: Send + Sync {
    /// Write exactly `reader`'s bytes under `name`, overwriting any prior
    /// entry with that name. Returns once the write is durable.
    async fn put(&self, name: &str, reader: BoxedReader, ctx: &CancellationToken) -> Result<()>;

    /// Open `name` for reading. Fails with [`Error::NotFound`] when absent.
    async fn get(&self, name: &str, ctx: &CancellationToken) -> Result<BoxedReader>;

    /// Best-effort existence check. No false positives; transient errors
    /// are reported as absent rather than propagated.
    async fn exists(&self, name: &str, ctx: &CancellationToken) -> bool;

    /// List every entry whose name starts with `prefix`. `"*"` or `""`
    /// means "all". Order is unspecified.
    async fn search(&self, prefix: &str, ctx: &CancellationToken) -> Result<Vec<String>>;
}

/// A configured, named store instance: `type` plus backend-specific keys
/// (spec §3 "Configuration target", §6 "Store factory configuration").
pub type TargetConfig = BTreeMap<String, String>;

/// Construct the backend named by `config["type"]`.
///
/// Fails with [`Error::UnknownStoreType`] for anything other than
/// `localDisk`, `s3`, or `testing` (spec §4.4, §6).
pub async fn build_store(config: &TargetConfig) -> Result<Arc<dyn Store>> {
    let ty = config
        .get("type")
        .ok_or_else(|| Error::UnknownStoreType("<missing type>".to_string()))?;
    match ty.as_str() {
        "localDisk" => {
            let path = config
                .get("path")
                .ok_or_else(|| Error::UnknownStoreType("localDisk missing `path`".to_string()))?;
            Ok(Arc::new(LocalDiskStore::new(path.into())))
        }
        "s3" => {
            let cfg = S3Config::from_target(config)?;
            Ok(Arc::new(S3Store::new(cfg).await?))
        }
        "testing" => Ok(Arc::new(TestingStore::new())),
        other => Err(Error::UnknownStoreType(other.to_string())),
    }
}

/// Prefix-resolve `prefix` against `store`, requiring exactly one match
/// (spec §4.5, §GLOSSARY "Prefix resolution").
pub async fn resolve_unique(store: &dyn Store, prefix: &str, ctx: &CancellationToken) -> Result<String> {
    let matches = store.search(prefix, ctx).await?;
    match matches.len() {
        1 => Ok(matches.into_iter().next().unwrap()),
        n => Err(Error::AmbiguousOrMissing(n)),
    }
}
