//! Turns an input specifier into a re-readable byte source (spec §4.2).

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt};
use url::Url;

use crate::error::{Error, Result};

/// Number of attempts the fetcher makes against a URL before giving up,
/// including the first attempt.
const HTTP_MAX_ATTEMPTS: u32 = 3;
const HTTP_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Where a fetched byte source reads from.
pub enum FetchedSource {
    /// A plain file on disk -- either the caller's own input path (case 3)
    /// or a scratch temp file the fetcher tee'd a stream into (cases 1, 2).
    File(File),
}

/// The result of classifying and opening an input specifier.
pub struct Fetched {
    /// The byte source downstream code reads from.
    pub source: FetchedSource,
    /// The resolved filesystem path: the original path for case 3, or the
    /// scratch tee file for cases 1 and 2.
    pub resolved_path: PathBuf,
    /// The origin label recorded into a metafile's `memorybox.source`.
    pub source_label: String,
    /// `true` if this call created a temp file under `scratch_dir` that the
    /// caller (the Archive File) owns and must remove on close.
    pub owns_temp_file: bool,
}

impl Fetched {
    /// Open the resolved path fresh, for a second read pass (the Archive
    /// File re-reads content once to hash it and once to persist it).
    pub async fn reopen(&self) -> Result<File> {
        Ok(File::open(&self.resolved_path).await?)
    }
}

/// Classify `specifier` and produce a re-readable byte source plus a label.
///
/// `scratch_dir` must already exist; temp files for stdin/URL input are
/// created inside it. Classification order (spec §4.2):
/// 1. `"-"` -> stdin
/// 2. an absolute URL with a non-empty scheme and host -> HTTP GET w/ retry
/// 3. otherwise -> a local filesystem path
pub async fn fetch(specifier: &str, scratch_dir: &Path) -> Result<Fetched> {
    if specifier == "-" {
        return fetch_stdin(scratch_dir).await;
    }
    if let Ok(url) = Url::parse(specifier) {
        if !url.scheme().is_empty() && url.host().is_some() && (url.scheme() == "http" || url.scheme() == "https") {
            return fetch_url(&url, scratch_dir).await;
        }
    }
    fetch_local(specifier).await
}

async fn fetch_local(specifier: &str) -> Result<Fetched> {
    let path = PathBuf::from(specifier);
    // Verify the path opens now so construction failures surface immediately,
    // per spec §4.2: "inability to ... open is fatal to this call".
    let f = File::open(&path).await?;
    drop(f);
    Ok(Fetched {
        source: FetchedSource::File(File::open(&path).await?),
        resolved_path: path,
        source_label: specifier.to_string(),
        owns_temp_file: false,
    })
}

async fn fetch_stdin(scratch_dir: &Path) -> Result<Fetched> {
    let tmp_path = unique_temp_path(scratch_dir, "stdin");
    let mut tee = File::create(&tmp_path).await?;
    let mut stdin = tokio::io::stdin();
    tokio::io::copy(&mut stdin, &mut tee).await?;
    tee.flush().await?;
    drop(tee);
    Ok(Fetched {
        source: FetchedSource::File(File::open(&tmp_path).await?),
        resolved_path: tmp_path,
        source_label: "-".to_string(),
        owns_temp_file: true,
    })
}

async fn fetch_url(url: &Url, scratch_dir: &Path) -> Result<Fetched> {
    let client = reqwest::Client::new();
    let mut last_err: Option<Error> = None;
    for attempt in 0..HTTP_MAX_ATTEMPTS {
        match client.get(url.clone()).send().await {
            Ok(resp) if resp.status().is_success() => {
                let tmp_path = unique_temp_path(scratch_dir, "http");
                let mut tee = File::create(&tmp_path).await?;
                let mut stream = resp.bytes_stream();
                use futures::StreamExt;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    tee.write_all(&chunk).await?;
                }
                tee.flush().await?;
                drop(tee);
                return Ok(Fetched {
                    source: FetchedSource::File(File::open(&tmp_path).await?),
                    resolved_path: tmp_path,
                    source_label: url.to_string(),
                    owns_temp_file: true,
                });
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                if !(500..600).contains(&status) {
                    // Non-2xx, non-5xx: not a transient failure, fail immediately.
                    return Err(Error::HttpStatus(status));
                }
                last_err = Some(Error::HttpStatus(status));
            }
            Err(e) => last_err = Some(e.into()),
        }
        if attempt + 1 < HTTP_MAX_ATTEMPTS {
            tokio::time::sleep(HTTP_RETRY_BASE_DELAY * 2u32.pow(attempt)).await;
        }
    }
    Err(last_err.unwrap_or(Error::NetworkError("exhausted retries".into())))
}

/// Exposed for callers outside this module that also tee a stream into a
/// scratch file (the Archive File's in-memory-reader constructor).
pub fn unique_temp_path(scratch_dir: &Path, prefix: &str) -> PathBuf {
    scratch_dir.join(format!("{prefix}-{}-{}", std::process::id(), next_scratch_id()))
}

/// Monotonic counter giving every scratch file a distinct name within one
/// process, even when two workers race to fetch inputs concurrently.
fn next_scratch_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(0);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Exposed so the Archive File can construct a `FetchedSource` from an
/// already-opened reader (in-memory reader construction path, spec §4.3
/// "or an already-opened readable source").
pub fn as_async_read(source: FetchedSource) -> impl AsyncRead + Unpin {
    match source {
        FetchedSource::File(f) => f,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn classifies_local_path() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.txt");
        tokio::fs::write(&p, b"hi").await.unwrap();
        let fetched = fetch(p.to_str().unwrap(), dir.path()).await.unwrap();
        assert!(!fetched.owns_temp_file);
        assert_eq!(fetched.source_label, p.to_str().unwrap());
    }

    #[tokio::test]
    async fn local_path_not_found_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        let err = fetch(missing.to_str().unwrap(), dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::IoError(_)));
    }
}
