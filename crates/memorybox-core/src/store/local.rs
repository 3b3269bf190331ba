//! Flat local-disk backend: write-temp, fsync, atomic rename (spec §4.4).

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::{BoxedReader, Store};
use crate::error::{Error, Result};

/// A flat directory of content-addressed entries on local disk.
pub struct LocalDiskStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl LocalDiskStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// first `put`, mirroring the teacher backend's `create_dir_all` on write.
    pub fn new(root: PathBuf) -> Self {
        Self { root, tmp_counter: AtomicU64::new(0) }
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn tmp_path(&self, name: &str) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(".{name}.{}.tmp", std::process::id() as u64 ^ n))
    }
}

#[async_trait]
impl Store for LocalDiskStore {
    async fn put(&self, name: &str, mut reader: BoxedReader, _ctx: &CancellationToken) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let tmp = self.tmp_path(name);
        let final_path = self.entry_path(name);
        {
            let mut f = tokio::fs::File::create(&tmp).await?;
            tokio::io::copy(&mut reader, &mut f).await?;
            f.flush().await?;
            f.sync_all().await?;
        }
        tokio::fs::rename(&tmp, &final_path).await?;
        if let Ok(dir) = tokio::fs::File::open(&self.root).await {
            let _ = dir.sync_all().await;
        }
        Ok(())
    }

    async fn get(&self, name: &str, _ctx: &CancellationToken) -> Result<BoxedReader> {
        let path = self.entry_path(name);
        match tokio::fs::File::open(&path).await {
            Ok(f) => Ok(Box::pin(f) as BoxedReader),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(name.to_string())),
            Err(e) => Err(Error::IoError(e)),
        }
    }

    async fn exists(&self, name: &str, _ctx: &CancellationToken) -> bool {
        tokio::fs::metadata(self.entry_path(name)).await.is_ok()
    }

    async fn search(&self, prefix: &str, _ctx: &CancellationToken) -> Result<Vec<String>> {
        let prefix = normalize_prefix(prefix);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::IoError(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else { continue };
            if name.starts_with('.') {
                continue; // temp files
            }
            if name.starts_with(prefix.as_str()) {
                out.push(name);
            }
        }
        Ok(out)
    }
}

fn normalize_prefix(prefix: &str) -> String {
    if prefix == "*" {
        String::new()
    } else {
        prefix.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(bytes: &[u8]) -> BoxedReader {
        Box::pin(Cursor::new(bytes.to_vec()))
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path().to_path_buf());
        let ctx = CancellationToken::new();
        store.put("abc-sha256", reader(b"hello"), &ctx).await.unwrap();
        assert!(store.exists("abc-sha256", &ctx).await);
        let mut got = Vec::new();
        let mut r = store.get("abc-sha256", &ctx).await.unwrap();
        tokio::io::AsyncReadExt::read_to_end(&mut r, &mut got).await.unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path().to_path_buf());
        let ctx = CancellationToken::new();
        let err = store.get("missing-sha256", &ctx).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn search_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path().to_path_buf());
        let ctx = CancellationToken::new();
        store.put("aaa-sha256", reader(b"1"), &ctx).await.unwrap();
        store.put("aab-sha256", reader(b"2"), &ctx).await.unwrap();
        store.put("bbb-sha256", reader(b"3"), &ctx).await.unwrap();
        let mut matches = store.search("aa", &ctx).await.unwrap();
        matches.sort();
        assert_eq!(matches, vec!["aaa-sha256", "aab-sha256"]);
        let all = store.search("*", &ctx).await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
