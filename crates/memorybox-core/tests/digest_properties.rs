//! Property-based coverage for digest stability and prefix resolution,
//! the two invariants spec.md §8 calls out as holding for *all* valid
//! inputs rather than a handful of fixed examples.

use std::sync::Arc;

use memorybox_core::store::TestingStore;
use memorybox_core::{resolve_unique, Error, Store};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

proptest! {
    /// `hash_bytes` and `hash_reader` must agree on the same bytes
    /// regardless of size or content, and running either twice on the same
    /// input must reproduce the same digest (spec.md §8 invariant: "Name
    /// stability").
    #[test]
    fn hash_bytes_and_hash_reader_agree(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let from_bytes = memorybox_core::digest::hash_bytes(&bytes);
        let (from_reader, size) = rt
            .block_on(memorybox_core::digest::hash_reader(std::io::Cursor::new(bytes.clone())))
            .unwrap();
        prop_assert_eq!(from_bytes.as_str(), from_reader.as_str());
        prop_assert_eq!(size, bytes.len() as u64);

        let again = memorybox_core::digest::hash_bytes(&bytes);
        prop_assert_eq!(from_bytes.as_str(), again.as_str());
    }

    /// Whatever prefix of a name is supplied, resolving it against a store
    /// that contains exactly one entry starting with that prefix always
    /// succeeds and names that entry (spec.md §8 invariant 5: "Prefix
    /// uniqueness").
    #[test]
    fn unique_prefix_always_resolves(
        suffix in "[a-f0-9]{8,16}",
        prefix_len in 1usize..8,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let name = format!("ff{suffix}-sha256");
        let prefix: String = name.chars().take(prefix_len.min(name.len())).collect();

        let store = TestingStore::new();
        store.inject(name.clone(), b"payload".to_vec());
        let store: Arc<dyn Store> = Arc::new(store);
        let ctx = CancellationToken::new();

        let resolved = rt.block_on(resolve_unique(store.as_ref(), &prefix, &ctx)).unwrap();
        prop_assert_eq!(resolved, name);
    }

    /// Two entries sharing a prefix make that prefix ambiguous; resolution
    /// must fail with the exact match count rather than picking one
    /// arbitrarily (spec.md §8 invariant 5, §7 `AmbiguousOrMissing`).
    #[test]
    fn shared_prefix_is_ambiguous(suffix_a in "[a-f0-9]{8}", suffix_b in "[a-f0-9]{8}") {
        prop_assume!(suffix_a != suffix_b);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let shared_prefix = "aa";
        let name_a = format!("{shared_prefix}{suffix_a}-sha256");
        let name_b = format!("{shared_prefix}{suffix_b}-sha256");

        let store = TestingStore::new();
        store.inject(name_a, b"a".to_vec());
        store.inject(name_b, b"b".to_vec());
        let store: Arc<dyn Store> = Arc::new(store);
        let ctx = CancellationToken::new();

        let err = rt.block_on(resolve_unique(store.as_ref(), shared_prefix, &ctx)).unwrap_err();
        prop_assert!(matches!(err, Error::AmbiguousOrMissing(2)));
    }
}
