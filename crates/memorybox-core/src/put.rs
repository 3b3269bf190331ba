//! The two-stage, metafile-wins concurrent Put pipeline (spec §4.6).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::archive::ArchiveFile;
use crate::error::{Error, Result};
use crate::metafile::to_metafile_name;
use crate::store::Store;

/// One source to ingest, with its optional inline metadata (spec §4.6,
/// §4.7's bulk-import use of "a parallel list of inline metadata strings").
pub struct PutInput {
    /// The input specifier: a path, a URL, or `"-"` for stdin.
    pub specifier: String,
    /// Raw JSON object string to replace `data` with, if supplied.
    pub inline_metadata: Option<String>,
}

impl PutInput {
    /// Build an input with no inline metadata.
    pub fn new(specifier: impl Into<String>) -> Self {
        Self { specifier: specifier.into(), inline_metadata: None }
    }

    /// Build an input carrying inline metadata.
    pub fn with_metadata(specifier: impl Into<String>, inline_metadata: impl Into<String>) -> Self {
        Self { specifier: specifier.into(), inline_metadata: Some(inline_metadata.into()) }
    }
}

/// Tuning knobs for one Put invocation.
pub struct PutOptions {
    /// Bounds the number of in-flight sources per stage (spec §4.6: `C`).
    pub concurrency: usize,
    /// Scratch directory for fetched temp files; shared across workers in
    /// this invocation and not cleaned up until the invocation ends.
    pub scratch_dir: PathBuf,
}

/// First error raised by any worker, shared so that whichever worker hits
/// it first both records it and cancels the rest (spec §4.6/§5's
/// "error-aware group").
#[derive(Clone)]
struct ErrorSlot(Arc<Mutex<Option<Error>>>);

impl ErrorSlot {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    fn record(&self, err: Error, ctx: &CancellationToken) {
        let mut slot = self.0.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
        ctx.cancel();
    }

    fn take(self) -> Option<Error> {
        self.0.lock().unwrap().take()
    }
}

/// Run the Put pipeline over `inputs` against `store`.
///
/// Stage 1 classifies and persists non-conflicting datafiles; any input
/// whose content is itself a metafile is forwarded to stage 2 instead of
/// stored immediately, so that stage 2 -- which strictly follows stage 1 --
/// can overwrite whatever auto-generated metafile stage 1 produced. This is
/// the metafile-wins guarantee (spec §4.6, invariant 3 in §8).
#[instrument(skip(store, inputs, ctx))]
pub async fn put(
    store: Arc<dyn Store>,
    inputs: Vec<PutInput>,
    opts: PutOptions,
    ctx: CancellationToken,
) -> Result<()> {
    tokio::fs::create_dir_all(&opts.scratch_dir).await?;

    let stage1_permits = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let stage2_permits = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let (tx, mut rx) = mpsc::unbounded_channel::<ArchiveFile>();
    let errors = ErrorSlot::new();

    // Stage 1: one task per source, each acquiring a stage-1 permit.
    let mut stage1 = JoinSet::new();
    for input in inputs {
        let store = store.clone();
        let scratch_dir = opts.scratch_dir.clone();
        let permits = stage1_permits.clone();
        let tx = tx.clone();
        let ctx = ctx.clone();
        let errors = errors.clone();
        stage1.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            if ctx.is_cancelled() {
                return;
            }
            if let Err(e) = stage1_one(&store, &input, &scratch_dir, &tx, &ctx).await {
                warn!(specifier = %input.specifier, error = %e, "put: stage 1 failed");
                errors.record(e, &ctx);
            }
        });
    }
    drop(tx);
    while stage1.join_next().await.is_some() {}

    // Stage 2: drains the channel strictly after stage 1 finishes, so a
    // user-supplied metafile always lands after (and therefore wins over)
    // whatever stage 1 auto-generated for the same name.
    let mut stage2 = JoinSet::new();
    while let Some(metafile) = rx.recv().await {
        if ctx.is_cancelled() {
            break;
        }
        let store = store.clone();
        let permits = stage2_permits.clone();
        let ctx2 = ctx.clone();
        let errors = errors.clone();
        stage2.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            if ctx2.is_cancelled() {
                return;
            }
            let name = metafile.name().to_string();
            let result = put_one(&store, &metafile, &ctx2).await;
            metafile.close().await;
            if let Err(e) = result {
                warn!(name, error = %e, "put: stage 2 failed");
                errors.record(e, &ctx2);
            } else {
                info!(name, "put: explicit metafile persisted (wins)");
            }
        });
    }
    while stage2.join_next().await.is_some() {}

    match errors.take() {
        Some(e) => Err(e),
        None if ctx.is_cancelled() => Err(Error::Cancelled),
        None => Ok(()),
    }
}

async fn stage1_one(
    store: &Arc<dyn Store>,
    input: &PutInput,
    scratch_dir: &std::path::Path,
    to_stage2: &mpsc::UnboundedSender<ArchiveFile>,
    ctx: &CancellationToken,
) -> Result<()> {
    let mut archive = ArchiveFile::open(&input.specifier, scratch_dir).await?;
    if let Some(raw) = &input.inline_metadata {
        archive.meta_replace_data(raw)?;
    }

    if archive.is_metafile() {
        // Don't store yet; stage 2 persists it last so it wins.
        let _ = to_stage2.send(archive);
        return Ok(());
    }

    let name = archive.name().to_string();
    if store.exists(&name, ctx).await {
        info!(name, "put: skipped, already exists");
        archive.close().await;
        return Ok(());
    }

    let meta_name = to_metafile_name(&name);
    let meta_already_exists = store.exists(&meta_name, ctx).await;
    let pair = (!meta_already_exists).then(|| archive.metafile_pair());

    let datafile_put = put_one(store, &archive, ctx);
    let result = if let Some(pair) = &pair {
        let metafile_put = put_one(store, pair, ctx);
        futures::try_join!(datafile_put, metafile_put).map(|_| ())
    } else {
        datafile_put.await
    };

    archive.close().await;
    if let Some(pair) = pair {
        pair.close().await;
    }
    result
}

async fn put_one(store: &Arc<dyn Store>, archive: &ArchiveFile, ctx: &CancellationToken) -> Result<()> {
    let reader = archive.open_read().await?;
    store.put(archive.name(), reader, ctx).await
}
