//! Get and per-key metadata mutation (spec §4.5).

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::metafile::{to_metafile_name, MetaDocument};
use crate::store::{resolve_unique, BoxedReader, Store};

/// Resolve `prefix` against the datafile namespace and copy the matched
/// entry's bytes into `sink`. Fails with `AmbiguousOrMissing` unless the
/// prefix names exactly one entry (spec §4.5).
pub async fn get<W>(store: &dyn Store, prefix: &str, mut sink: W, ctx: &CancellationToken) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let name = resolve_unique(store, prefix, ctx).await?;
    let mut reader: BoxedReader = store.get(&name, ctx).await?;
    tokio::io::copy(&mut reader, &mut sink).await?;
    sink.flush().await?;
    Ok(())
}

/// Resolve `prefix` against the datafile namespace, fetch and parse its
/// metafile, and return the raw serialized bytes (spec §4.5: "Reading
/// returns the metafile bytes").
pub async fn meta_read_bytes(store: &dyn Store, prefix: &str, ctx: &CancellationToken) -> Result<Vec<u8>> {
    let (_datafile_name, doc) = load_metafile(store, prefix, ctx).await?;
    Ok(doc.to_bytes())
}

/// Read a single `data.<key>` value out of `prefix`'s metafile.
pub async fn meta_get(store: &dyn Store, prefix: &str, key: &str, ctx: &CancellationToken) -> Result<Option<Value>> {
    let (_datafile_name, doc) = load_metafile(store, prefix, ctx).await?;
    Ok(doc.get(key))
}

/// Set `data.<key> = value` on `prefix`'s metafile and write it back.
pub async fn meta_set(store: &dyn Store, prefix: &str, key: &str, value: &str, ctx: &CancellationToken) -> Result<()> {
    let (datafile_name, mut doc) = load_metafile(store, prefix, ctx).await?;
    doc.set(key, value);
    write_back(store, &datafile_name, &doc, ctx).await
}

/// Delete `data.<key>` on `prefix`'s metafile and write it back.
pub async fn meta_delete(store: &dyn Store, prefix: &str, key: &str, ctx: &CancellationToken) -> Result<()> {
    let (datafile_name, mut doc) = load_metafile(store, prefix, ctx).await?;
    doc.delete(key);
    write_back(store, &datafile_name, &doc, ctx).await
}

async fn load_metafile(store: &dyn Store, prefix: &str, ctx: &CancellationToken) -> Result<(String, MetaDocument)> {
    // The one-match rule binds to datafiles: callers supply a datafile
    // digest prefix, not a metafile name (spec §4.5).
    let datafile_name = resolve_unique(store, prefix, ctx).await?;
    let meta_name = to_metafile_name(&datafile_name);
    let mut reader = store.get(&meta_name, ctx).await?;
    let mut buf = Vec::new();
    read_all(&mut reader, &mut buf).await?;
    let value: Value = serde_json::from_slice(&buf)?;
    let doc = MetaDocument::try_parse(value)?.ok_or_else(|| {
        crate::error::Error::InvalidJson(serde_json::Error::io(std::io::Error::other(format!(
            "{meta_name} does not parse as a metafile document"
        ))))
    })?;
    Ok((datafile_name, doc))
}

async fn write_back(store: &dyn Store, datafile_name: &str, doc: &MetaDocument, ctx: &CancellationToken) -> Result<()> {
    let meta_name = to_metafile_name(datafile_name);
    let bytes = doc.to_bytes();
    let reader: BoxedReader = Box::pin(std::io::Cursor::new(bytes));
    store.put(&meta_name, reader, ctx).await
}

async fn read_all<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> Result<()> {
    tokio::io::AsyncReadExt::read_to_end(reader, buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TestingStore;
    use serde_json::json;

    fn metafile_bytes(file: &str, data: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "memorybox": {"file": file, "source": "x", "size": 4},
            "data": data,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn get_requires_exactly_one_match() {
        let store = TestingStore::new();
        let ctx = CancellationToken::new();
        store.inject("9f8-sha256", b"test".to_vec());
        let mut out = Vec::new();
        get(&store, "9f8", &mut out, &ctx).await.unwrap();
        assert_eq!(out, b"test");

        store.inject("9fa-sha256", b"other".to_vec());
        let mut out2 = Vec::new();
        let err = get(&store, "9f", &mut out2, &ctx).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::AmbiguousOrMissing(2)));
    }

    #[tokio::test]
    async fn meta_set_then_get_round_trips() {
        let store = TestingStore::new();
        let ctx = CancellationToken::new();
        store.inject("abc-sha256", b"test".to_vec());
        store.inject("memorybox-meta-abc-sha256", metafile_bytes("abc-sha256", json!({})));

        meta_set(&store, "abc", "k", "v", &ctx).await.unwrap();
        let v = meta_get(&store, "abc", "k", &ctx).await.unwrap();
        assert_eq!(v, Some(Value::String("v".into())));

        meta_set(&store, "abc", "k", "42", &ctx).await.unwrap();
        let v = meta_get(&store, "abc", "k", &ctx).await.unwrap();
        assert_eq!(v, Some(Value::from(42)));

        meta_delete(&store, "abc", "k", &ctx).await.unwrap();
        let v = meta_get(&store, "abc", "k", &ctx).await.unwrap();
        assert_eq!(v, None);
    }

    #[tokio::test]
    async fn reserved_key_is_immutable_through_ops() {
        let store = TestingStore::new();
        let ctx = CancellationToken::new();
        store.inject("abc-sha256", b"test".to_vec());
        store.inject("memorybox-meta-abc-sha256", metafile_bytes("abc-sha256", json!({})));
        meta_set(&store, "abc", "memorybox", "{}", &ctx).await.unwrap();
        let still_managed = meta_get(&store, "abc", "memorybox", &ctx).await.unwrap();
        assert_eq!(still_managed.unwrap().get("file").unwrap(), "abc-sha256");
    }
}
