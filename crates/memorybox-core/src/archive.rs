//! The Archive File: a re-readable, content-hashed handle (spec §4.3).
//!
//! Per the redesign called out in spec §9 ("Auto-reclassification of
//! identity"), construction returns a tagged variant -- [`ArchiveFile::Data`]
//! or [`ArchiveFile::Meta`] -- decided once, before the handle is ever
//! visible to a caller. There is no mid-life identity swap.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::digest::{hash_reader, Digest};
use crate::error::{Error, Result};
use crate::fetch::{self, Fetched};
use crate::metafile::{to_metafile_name, ManagedFields, MetaDocument, METAFILE_SIZE_GUARD};

/// A datafile-shaped handle: ordinary content, named by its digest.
pub struct DataFile {
    name: Digest,
    source_label: String,
    size: u64,
    metadata: MetaDocument,
    resolved_path: PathBuf,
    owns_temp_file: bool,
}

/// A metafile-shaped handle: the input content itself parsed as a metafile
/// document.
pub struct MetaFile {
    name: String,
    source_label: String,
    metadata: MetaDocument,
}

/// A content-addressed, re-readable handle produced by fetching and hashing
/// one input specifier.
pub enum ArchiveFile {
    /// An ordinary datafile.
    Data(DataFile),
    /// Content recognized as a metafile document.
    Meta(MetaFile),
}

impl ArchiveFile {
    /// Fetch `specifier`, hash it, and classify it as a datafile or metafile.
    pub async fn open(specifier: &str, scratch_dir: &Path) -> Result<Self> {
        let fetched = fetch::fetch(specifier, scratch_dir).await?;
        Self::from_fetched(fetched).await
    }

    /// Build an Archive File around bytes already resident in memory (the
    /// in-memory reader input shape, spec §1). Tees through a scratch file
    /// the same way a URL/stdin fetch does, so the rest of the pipeline
    /// doesn't need a separate code path.
    pub async fn from_reader<R: AsyncRead + Unpin>(
        mut reader: R,
        source_label: String,
        scratch_dir: &Path,
    ) -> Result<Self> {
        let tmp_path = fetch::unique_temp_path(scratch_dir, "reader");
        let mut tee = tokio::fs::File::create(&tmp_path).await?;
        tokio::io::copy(&mut reader, &mut tee).await?;
        use tokio::io::AsyncWriteExt;
        tee.flush().await?;
        drop(tee);
        let fetched = Fetched {
            source: fetch::FetchedSource::File(tokio::fs::File::open(&tmp_path).await?),
            resolved_path: tmp_path,
            source_label,
            owns_temp_file: true,
        };
        Self::from_fetched(fetched).await
    }

    async fn from_fetched(fetched: Fetched) -> Result<Self> {
        let Fetched { source, resolved_path, source_label, owns_temp_file } = fetched;
        let reader = fetch::as_async_read(source);
        let (digest, size) = hash_reader(reader).await?;

        // Metafile auto-detection (spec §4.3 step 3): only attempt for
        // content under the size guard, to avoid parsing large binaries.
        if size <= METAFILE_SIZE_GUARD {
            let mut buf = Vec::with_capacity(size as usize);
            let mut f = tokio::fs::File::open(&resolved_path).await?;
            f.read_to_end(&mut buf).await?;
            if let Ok(value) = serde_json::from_slice::<Value>(&buf) {
                if let Some(doc) = MetaDocument::try_parse(value)? {
                    // Reclassify: the in-memory metadata *is* the content, so
                    // the temp file (if any) is no longer needed.
                    if owns_temp_file {
                        let _ = tokio::fs::remove_file(&resolved_path).await;
                    }
                    let file_digest = doc
                        .file_digest()
                        .cloned()
                        .ok_or_else(|| Error::InvalidJson(serde_json::Error::io(std::io::Error::other(
                            "metafile missing memorybox.file",
                        ))))?;
                    let name = to_metafile_name(file_digest.as_str());
                    return Ok(ArchiveFile::Meta(MetaFile { name, source_label, metadata: doc }));
                }
            }
        }

        let metadata = MetaDocument::new(ManagedFields { file: digest.clone(), source: source_label.clone(), size });
        Ok(ArchiveFile::Data(DataFile {
            name: digest,
            source_label,
            size,
            metadata,
            resolved_path,
            owns_temp_file,
        }))
    }

    /// This handle's name in the store: a digest for a datafile, or
    /// `memorybox-meta-<digest>` for a metafile.
    pub fn name(&self) -> &str {
        match self {
            ArchiveFile::Data(d) => d.name.as_str(),
            ArchiveFile::Meta(m) => &m.name,
        }
    }

    /// The original input specifier or URL this handle was fetched from.
    pub fn source(&self) -> &str {
        match self {
            ArchiveFile::Data(d) => &d.source_label,
            ArchiveFile::Meta(m) => &m.source_label,
        }
    }

    /// Whether this handle's content is itself a metafile document.
    pub fn is_metafile(&self) -> bool {
        matches!(self, ArchiveFile::Meta(_))
    }

    /// Size in bytes of the datafile content. Zero for a metafile handle
    /// (its own serialized size is recovered via `metadata().to_bytes().len()`).
    pub fn size(&self) -> u64 {
        match self {
            ArchiveFile::Data(d) => d.size,
            ArchiveFile::Meta(_) => 0,
        }
    }

    fn metadata(&self) -> &MetaDocument {
        match self {
            ArchiveFile::Data(d) => &d.metadata,
            ArchiveFile::Meta(m) => &m.metadata,
        }
    }

    fn metadata_mut(&mut self) -> &mut MetaDocument {
        match self {
            ArchiveFile::Data(d) => &mut d.metadata,
            ArchiveFile::Meta(m) => &mut m.metadata,
        }
    }

    /// Read `data.<key>`.
    pub fn meta_get(&self, key: &str) -> Option<Value> {
        self.metadata().get(key)
    }

    /// Write `data.<key>`, parsing `value` as JSON when possible.
    pub fn meta_set(&mut self, key: &str, value: &str) {
        self.metadata_mut().set(key, value);
    }

    /// Replace the entire `data` sub-object from a raw JSON object string.
    pub fn meta_replace_data(&mut self, raw_json: &str) -> Result<()> {
        self.metadata_mut().replace_data(raw_json)
    }

    /// Remove `data.<key>`.
    pub fn meta_delete(&mut self, key: &str) {
        self.metadata_mut().delete(key);
    }

    /// Produce this handle's metafile pair: a new Archive File whose content
    /// is this one's metadata document, under the metafile name.
    pub fn metafile_pair(&self) -> ArchiveFile {
        let name = to_metafile_name(self.name());
        ArchiveFile::Meta(MetaFile {
            name,
            source_label: self.source().to_string(),
            metadata: self.metadata().clone(),
        })
    }

    /// Materialize the readable byte source exposed to downstream consumers:
    /// a reopen of the resolved path for a datafile, or the serialized
    /// metadata document for a metafile handle (spec §4.3 invariant: "a
    /// metafile-handle's readable output is byte-identical to the serialized
    /// metadata document").
    pub async fn open_read(&self) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        match self {
            ArchiveFile::Data(d) => Ok(Box::new(tokio::fs::File::open(&d.resolved_path).await?)),
            ArchiveFile::Meta(m) => Ok(Box::new(Cursor::new(m.metadata.to_bytes()))),
        }
    }

    /// Release any temporary scratch file this handle owns. Idempotent.
    pub async fn close(self) {
        if let ArchiveFile::Data(d) = self {
            if d.owns_temp_file {
                let _ = tokio::fs::remove_file(&d.resolved_path).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn datafile_name_is_digest() {
        let dir = tempfile::tempdir().unwrap();
        let af = ArchiveFile::from_reader(Cursor::new(b"test".to_vec()), "stdin".into(), dir.path())
            .await
            .unwrap();
        assert!(!af.is_metafile());
        assert_eq!(af.name(), "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08-sha256");
        af.close().await;
    }

    #[tokio::test]
    async fn metafile_content_is_reclassified() {
        let dir = tempfile::tempdir().unwrap();
        let json = serde_json::json!({
            "memorybox": {"file": "abc-sha256", "source": "x", "size": 0},
            "data": {},
        })
        .to_string();
        let af = ArchiveFile::from_reader(Cursor::new(json.into_bytes()), "manual".into(), dir.path())
            .await
            .unwrap();
        assert!(af.is_metafile());
        assert_eq!(af.name(), "memorybox-meta-abc-sha256");
        af.close().await;
    }

    #[tokio::test]
    async fn metafile_pair_name_matches_invariant() {
        let dir = tempfile::tempdir().unwrap();
        let af = ArchiveFile::from_reader(Cursor::new(b"test".to_vec()), "stdin".into(), dir.path())
            .await
            .unwrap();
        let pair = af.metafile_pair();
        assert_eq!(pair.name(), format!("memorybox-meta-{}", af.name()));
        af.close().await;
    }

    #[tokio::test]
    async fn metafile_handle_output_is_its_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let af = ArchiveFile::from_reader(Cursor::new(b"test".to_vec()), "stdin".into(), dir.path())
            .await
            .unwrap();
        let pair = af.metafile_pair();
        let mut out = Vec::new();
        let mut r = pair.open_read().await.unwrap();
        r.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, pair.metadata().to_bytes());
        af.close().await;
    }
}
