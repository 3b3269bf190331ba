//! In-memory backend with injectable error hooks, for unit tests (spec §4.4).

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use super::{BoxedReader, Store};
use crate::error::{Error, Result};

/// Error hooks a test can flip on to exercise the Put/Index pipelines'
/// error-handling paths without touching a real backend.
#[derive(Default)]
pub struct ErrorHooks {
    /// Force every `search` call to fail.
    pub force_search_error: bool,
    /// Force every `get` call to fail.
    pub force_get_error: bool,
    /// Force `get` to hang until the cancellation token fires.
    pub force_timeout_on_read: bool,
}

/// An in-memory name -> bytes map used as the testing backend.
#[derive(Default)]
pub struct TestingStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    hooks: Mutex<ErrorHooks>,
}

impl TestingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active error hooks.
    pub fn set_hooks(&self, hooks: ErrorHooks) {
        *self.hooks.lock().unwrap() = hooks;
    }

    /// Directly inject or overwrite an entry, bypassing `put` (used to set
    /// up corruption/fixture scenarios in tests).
    pub fn inject(&self, name: impl Into<String>, bytes: Vec<u8>) {
        self.entries.lock().unwrap().insert(name.into(), bytes);
    }

    /// Snapshot every name currently stored, for assertions.
    pub fn entry_names(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl Store for TestingStore {
    async fn put(&self, name: &str, mut reader: BoxedReader, _ctx: &CancellationToken) -> Result<()> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        self.entries.lock().unwrap().insert(name.to_string(), buf);
        Ok(())
    }

    async fn get(&self, name: &str, ctx: &CancellationToken) -> Result<BoxedReader> {
        if self.hooks.lock().unwrap().force_timeout_on_read {
            ctx.cancelled().await;
            return Err(Error::Cancelled);
        }
        if self.hooks.lock().unwrap().force_get_error {
            return Err(Error::Store("forced get error".to_string()));
        }
        let entries = self.entries.lock().unwrap();
        match entries.get(name) {
            Some(bytes) => Ok(Box::pin(std::io::Cursor::new(bytes.clone())) as BoxedReader),
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    async fn exists(&self, name: &str, _ctx: &CancellationToken) -> bool {
        self.entries.lock().unwrap().contains_key(name)
    }

    async fn search(&self, prefix: &str, _ctx: &CancellationToken) -> Result<Vec<String>> {
        if self.hooks.lock().unwrap().force_search_error {
            return Err(Error::Store("forced search error".to_string()));
        }
        let prefix = if prefix == "*" { "" } else { prefix };
        Ok(self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forced_search_error_surfaces() {
        let store = TestingStore::new();
        store.set_hooks(ErrorHooks { force_search_error: true, ..Default::default() });
        let ctx = CancellationToken::new();
        assert!(store.search("*", &ctx).await.is_err());
    }

    #[tokio::test]
    async fn forced_timeout_resolves_on_cancel() {
        let store = TestingStore::new();
        store.set_hooks(ErrorHooks { force_timeout_on_read: true, ..Default::default() });
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = store.get("x", &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
