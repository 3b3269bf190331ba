//! Index / Integrity: pair every datafile with its metafile (spec §4.8).

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::digest::hash_reader;
use crate::error::{Error, Result};
use crate::metafile::{is_metafile_name, to_datafile_name, to_metafile_name, MetaDocument};
use crate::store::Store;

/// Tuning knobs for one Index invocation.
pub struct IndexOptions {
    /// Bounds the number of datafiles validated concurrently (spec §4.8: `C`).
    pub concurrency: usize,
    /// Re-hash every datafile's content and compare against its stored name.
    pub integrity_check: bool,
}

/// Search the store, partition into datafile/metafile name sets, and fail
/// with [`Error::MissingPair`] listing every unpaired entry (spec §4.8 step 1).
async fn partition_and_check_pairs(store: &dyn Store, ctx: &CancellationToken) -> Result<Vec<String>> {
    let all = store.search("*", ctx).await?;
    let mut datafiles: Vec<String> = Vec::new();
    let mut metafile_targets: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for name in all {
        if is_metafile_name(&name) {
            metafile_targets.insert(to_datafile_name(&name).to_string());
        } else {
            datafiles.push(name);
        }
    }
    datafiles.sort();

    let datafile_set: std::collections::BTreeSet<String> = datafiles.iter().cloned().collect();
    let mut mismatches = Vec::new();
    for d in &datafile_set {
        if !metafile_targets.contains(d) {
            mismatches.push(to_metafile_name(d));
        }
    }
    for m in &metafile_targets {
        if !datafile_set.contains(m) {
            mismatches.push(to_metafile_name(m));
        }
    }
    if !mismatches.is_empty() {
        mismatches.sort();
        mismatches.dedup();
        return Err(Error::MissingPair(mismatches));
    }
    Ok(datafiles)
}

/// Run the full Index/Integrity operation, writing `{"memorybox": [...]}`
/// (one entry per datafile's metafile bytes, as JSON) to `sink`.
#[instrument(skip(store, sink, ctx))]
pub async fn index<W>(store: Arc<dyn Store>, opts: IndexOptions, mut sink: W, ctx: CancellationToken) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let datafiles = partition_and_check_pairs(store.as_ref(), &ctx).await?;

    let permits = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let errors: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));

    let mut tasks = JoinSet::new();
    for name in datafiles {
        let store = store.clone();
        let permits = permits.clone();
        let tx = tx.clone();
        let ctx = ctx.clone();
        let errors = errors.clone();
        let integrity_check = opts.integrity_check;
        tasks.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            if ctx.is_cancelled() {
                return;
            }
            match validate_one(&store, &name, integrity_check, &ctx).await {
                Ok(entry) => {
                    let _ = tx.send(entry);
                }
                Err(e) => {
                    let mut slot = errors.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                    ctx.cancel();
                }
            }
        });
    }
    drop(tx);

    // Collector: accumulate entries as they arrive, in parallel with the
    // remaining validation workers (spec §4.8: "a single collector goroutine
    // reading from an entries channel").
    let mut entries = Vec::new();
    while let Some(entry) = rx.recv().await {
        entries.push(entry);
    }
    while tasks.join_next().await.is_some() {}

    if let Some(e) = errors.lock().unwrap().take() {
        return Err(e);
    }
    if ctx.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let doc = serde_json::json!({ "memorybox": entries });
    let bytes = serde_json::to_vec_pretty(&doc)?;
    sink.write_all(&bytes).await?;
    sink.flush().await?;
    Ok(())
}

async fn validate_one(store: &Arc<dyn Store>, name: &str, integrity_check: bool, ctx: &CancellationToken) -> Result<Value> {
    if integrity_check {
        let mut reader = store.get(name, ctx).await?;
        let (recomputed, _size) = hash_reader(&mut reader).await?;
        if recomputed.as_str() != name {
            return Err(Error::Corruption(name.to_string()));
        }
    }

    let meta_name = to_metafile_name(name);
    let mut meta_reader = store.get(&meta_name, ctx).await?;
    let mut buf = Vec::new();
    meta_reader.read_to_end(&mut buf).await?;
    let value: Value = serde_json::from_slice(&buf)?;
    let doc = MetaDocument::try_parse(value.clone())?.ok_or_else(|| {
        Error::InvalidJson(serde_json::Error::io(std::io::Error::other(format!(
            "{meta_name} does not parse as a metafile document"
        ))))
    })?;
    let claimed = doc
        .file_digest()
        .map(|d| d.as_str().to_string())
        .unwrap_or_default();
    if claimed != name {
        return Err(Error::MetaMismatch { metafile: meta_name, claimed, actual: name.to_string() });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TestingStore;
    use serde_json::json;

    fn metafile_bytes(file: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "memorybox": {"file": file, "source": "x", "size": 4},
            "data": {},
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn missing_pair_is_reported() {
        let ts = TestingStore::new();
        ts.inject("abc-sha256", b"test".to_vec());
        let store: Arc<dyn Store> = Arc::new(ts);
        let ctx = CancellationToken::new();
        let mut out = Vec::new();
        let err = index(store, IndexOptions { concurrency: 4, integrity_check: false }, &mut out, ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingPair(_)));
    }

    #[tokio::test]
    async fn corruption_is_detected() {
        let ts = Arc::new(TestingStore::new());
        ts.inject("abc-sha256", b"corrupted-content".to_vec());
        ts.inject("memorybox-meta-abc-sha256", metafile_bytes("abc-sha256"));
        let store: Arc<dyn Store> = ts;
        let ctx = CancellationToken::new();
        let mut out = Vec::new();
        let err = index(store, IndexOptions { concurrency: 4, integrity_check: true }, &mut out, ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[tokio::test]
    async fn clean_pair_roundtrips_to_sink() {
        let ts = Arc::new(TestingStore::new());
        ts.inject("9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08-sha256", b"test".to_vec());
        ts.inject(
            "memorybox-meta-9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08-sha256",
            metafile_bytes("9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08-sha256"),
        );
        let store: Arc<dyn Store> = ts;
        let ctx = CancellationToken::new();
        let mut out = Vec::new();
        index(store, IndexOptions { concurrency: 4, integrity_check: true }, &mut out, ctx)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["memorybox"].as_array().unwrap().len(), 1);
    }
}
