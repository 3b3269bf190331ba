//! Bulk import from manifest files (spec §4.7).

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::metafile::{MetaDocument, METAFILE_PREFIX};
use crate::put::{put, PutInput, PutOptions};
use crate::store::Store;

/// One parsed manifest line: `<specifier> <json-object>`.
#[derive(Clone, Debug, PartialEq)]
struct ManifestLine {
    specifier: String,
    metadata_json: String,
}

/// Parse manifest text into lines of `<specifier> <json-object>`.
///
/// A line missing the space separator between the specifier and the JSON
/// object is rejected outright rather than silently truncated (spec §9,
/// "Manifest-import parsing"). Blank lines are skipped.
fn parse_manifest(text: &str) -> Result<Vec<ManifestLine>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        let Some(sep) = line.find(' ') else {
            return Err(Error::MalformedManifestLine(idx + 1, line.to_string()));
        };
        let (specifier, rest) = line.split_at(sep);
        let metadata_json = rest[1..].trim_start().to_string();
        if metadata_json.is_empty() {
            return Err(Error::MalformedManifestLine(idx + 1, line.to_string()));
        }
        // Validate it actually parses as JSON now, rather than deferring the
        // failure to the Put pipeline.
        let _: serde_json::Value = serde_json::from_str(&metadata_json)?;
        out.push(ManifestLine { specifier: specifier.to_string(), metadata_json });
    }
    Ok(out)
}

/// De-duplicate lines sharing a specifier, failing if they disagree on
/// metadata (spec §4.7).
fn dedup(lines: Vec<ManifestLine>) -> Result<Vec<ManifestLine>> {
    let mut by_specifier: BTreeMap<String, ManifestLine> = BTreeMap::new();
    for line in lines {
        match by_specifier.get(&line.specifier) {
            Some(existing) if existing.metadata_json != line.metadata_json => {
                return Err(Error::ConflictingManifestMetadata(line.specifier));
            }
            _ => {
                by_specifier.insert(line.specifier.clone(), line);
            }
        }
    }
    Ok(by_specifier.into_values().collect())
}

/// Drop lines whose specifier already appears as some existing metafile's
/// `memorybox.source` (spec §4.7).
async fn drop_already_imported(
    store: &dyn Store,
    lines: Vec<ManifestLine>,
    ctx: &CancellationToken,
) -> Result<Vec<ManifestLine>> {
    let all = store.search(METAFILE_PREFIX, ctx).await?;
    let mut known_sources = std::collections::HashSet::new();
    for name in all {
        if let Ok(mut reader) = store.get(&name, ctx).await {
            let mut buf = Vec::new();
            if tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf).await.is_err() {
                continue;
            }
            let Ok(value) = serde_json::from_slice::<serde_json::Value>(&buf) else { continue };
            if let Ok(Some(doc)) = MetaDocument::try_parse(value) {
                if let Some(managed) = doc.managed() {
                    known_sources.insert(managed.source.clone());
                }
            }
        }
    }
    Ok(lines.into_iter().filter(|l| !known_sources.contains(&l.specifier)).collect())
}

/// Import every manifest file in `manifest_paths`, delegating the filtered
/// result to [`put`].
pub async fn import(
    store: Arc<dyn Store>,
    manifest_paths: &[std::path::PathBuf],
    opts: PutOptions,
    ctx: CancellationToken,
) -> Result<()> {
    let mut lines = Vec::new();
    for path in manifest_paths {
        let text = tokio::fs::read_to_string(path).await?;
        lines.extend(parse_manifest(&text)?);
    }
    let lines = dedup(lines)?;
    let lines = drop_already_imported(store.as_ref(), lines, &ctx).await?;

    let inputs = lines
        .into_iter()
        .map(|l| PutInput::with_metadata(l.specifier, l.metadata_json))
        .collect();

    put(store, inputs, opts, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_line_without_separator() {
        let err = parse_manifest("justaspecifier\n").unwrap_err();
        assert!(matches!(err, Error::MalformedManifestLine(1, _)));
    }

    #[test]
    fn parses_specifier_and_json() {
        let lines = parse_manifest("a.txt {\"k\":1}\nb.txt {\"k\":2}\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].specifier, "a.txt");
        assert_eq!(lines[0].metadata_json, "{\"k\":1}");
    }

    #[test]
    fn dedup_rejects_conflicting_metadata() {
        let lines = vec![
            ManifestLine { specifier: "a.txt".into(), metadata_json: "{\"k\":1}".into() },
            ManifestLine { specifier: "a.txt".into(), metadata_json: "{\"k\":2}".into() },
        ];
        let err = dedup(lines).unwrap_err();
        assert!(matches!(err, Error::ConflictingManifestMetadata(_)));
    }

    #[test]
    fn dedup_allows_identical_repeats() {
        let lines = vec![
            ManifestLine { specifier: "a.txt".into(), metadata_json: "{\"k\":1}".into() },
            ManifestLine { specifier: "a.txt".into(), metadata_json: "{\"k\":1}".into() },
        ];
        let deduped = dedup(lines).unwrap();
        assert_eq!(deduped.len(), 1);
    }
}
