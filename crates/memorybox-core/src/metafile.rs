//! Metafile name predicates and the metafile JSON document shape (spec §3, §9).

use serde_json::{Map, Value};

use crate::digest::Digest;
use crate::error::{Error, Result};

/// Prefix that identifies a store entry as a metafile rather than a datafile.
pub const METAFILE_PREFIX: &str = "memorybox-meta-";

/// Largest content size that is still eligible for metafile auto-detection
/// (spec §4.3, §9: fixed at 1 MiB, kept as a compile-time constant).
pub const METAFILE_SIZE_GUARD: u64 = 1024 * 1024;

/// `is_metafile_name(s) ≡ s startswith "memorybox-meta-"` (spec §9, the
/// single canonical predicate chosen to resolve the source's ambiguity).
pub fn is_metafile_name(name: &str) -> bool {
    name.starts_with(METAFILE_PREFIX)
}

/// `to_metafile_name(d) ≡ is_metafile_name(d) ? d : "memorybox-meta-" + d`.
pub fn to_metafile_name(name: &str) -> String {
    if is_metafile_name(name) {
        name.to_string()
    } else {
        format!("{METAFILE_PREFIX}{name}")
    }
}

/// `to_datafile_name(s) ≡ strip_prefix(s, "memorybox-meta-")`.
pub fn to_datafile_name(name: &str) -> &str {
    name.strip_prefix(METAFILE_PREFIX).unwrap_or(name)
}

/// The managed `memorybox` sub-object of a metafile document.
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedFields {
    /// The paired datafile's digest.
    pub file: Digest,
    /// The origin label the bytes were fetched from.
    pub source: String,
    /// Size in bytes of the datafile's content.
    pub size: u64,
}

/// A parsed metafile document: the managed `memorybox` object plus the
/// user-facing `data` object, with any unknown top-level keys preserved.
#[derive(Clone, Debug, Default)]
pub struct MetaDocument {
    managed: Option<ManagedFields>,
    data: Map<String, Value>,
    /// Top-level keys other than `memorybox`/`data`, preserved verbatim.
    extra: Map<String, Value>,
}

impl MetaDocument {
    /// Build a fresh document around a newly computed datafile.
    pub fn new(managed: ManagedFields) -> Self {
        Self { managed: Some(managed), data: Map::new(), extra: Map::new() }
    }

    /// Parse a metafile document from its serialized JSON form.
    ///
    /// Returns `Ok(None)` (rather than an error) when `value` does not look
    /// like a metafile at all -- i.e. it is not a JSON object, or it has no
    /// top-level `memorybox` key -- so callers can use this directly for the
    /// auto-detection check in spec §4.3.
    pub fn try_parse(value: Value) -> Result<Option<Self>> {
        let Value::Object(mut top) = value else { return Ok(None) };
        let Some(managed_value) = top.remove("memorybox") else { return Ok(None) };
        let managed = parse_managed(managed_value)?;
        let data = match top.remove("data") {
            Some(Value::Object(m)) => m,
            Some(other) => {
                return Err(Error::InvalidJson(serde_json::Error::io(std::io::Error::other(
                    format!("metafile `data` must be an object, got {other}"),
                ))))
            }
            None => Map::new(),
        };
        Ok(Some(Self { managed: Some(managed), data, extra: top }))
    }

    /// The managed fields, if present.
    pub fn managed(&self) -> Option<&ManagedFields> {
        self.managed.as_ref()
    }

    /// The datafile digest this metafile describes.
    pub fn file_digest(&self) -> Option<&Digest> {
        self.managed.as_ref().map(|m| &m.file)
    }

    /// Read `data.<key>`. Reading the reserved key `memorybox` returns the
    /// managed sub-object instead (spec §4.3: `MetaGet("memorybox")`).
    pub fn get(&self, key: &str) -> Option<Value> {
        if key == "memorybox" {
            return self.managed.as_ref().map(managed_to_value);
        }
        self.data.get(key).cloned()
    }

    /// Write `data.<key> = parse(value)`. If `value` parses as a JSON
    /// object, array, number, bool, or null, it is stored as that JSON
    /// value; a bare JSON string literal (e.g. `"\"foo\""`) is excluded from
    /// that category and, like any other non-JSON text, stored as the plain
    /// string `value` itself rather than being unwrapped (spec §4.3: "parses
    /// as JSON (object, array, number, bool, or null)"). The reserved key
    /// `memorybox` is silently ignored.
    pub fn set(&mut self, key: &str, value: &str) {
        if key == "memorybox" {
            return;
        }
        let parsed = match serde_json::from_str::<Value>(value) {
            Ok(v @ (Value::Object(_) | Value::Array(_) | Value::Number(_) | Value::Bool(_) | Value::Null)) => v,
            _ => Value::String(value.to_string()),
        };
        self.data.insert(key.to_string(), parsed);
    }

    /// Replace the entire `data` sub-object with the parsed contents of
    /// `raw_json` (used by the Put pipeline's inline-metadata application,
    /// spec §4.6 stage 1 step 2: `MetaSet("", raw-json-string)`).
    pub fn replace_data(&mut self, raw_json: &str) -> Result<()> {
        let value: Value = serde_json::from_str(raw_json)?;
        match value {
            Value::Object(m) => {
                self.data = m;
                Ok(())
            }
            other => Err(Error::InvalidJson(serde_json::Error::io(std::io::Error::other(format!(
                "inline metadata must be a JSON object, got {other}"
            ))))),
        }
    }

    /// Remove `data.<key>`. The reserved key is ignored.
    pub fn delete(&mut self, key: &str) {
        if key == "memorybox" {
            return;
        }
        self.data.remove(key);
    }

    /// Serialize to the canonical on-disk JSON form.
    pub fn to_json(&self) -> Value {
        let mut top = Map::new();
        if let Some(m) = &self.managed {
            top.insert("memorybox".to_string(), managed_to_value(m));
        }
        top.insert("data".to_string(), Value::Object(self.data.clone()));
        for (k, v) in &self.extra {
            top.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Value::Object(top)
    }

    /// Serialize to pretty-printed bytes, the form persisted to a store.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(&self.to_json()).expect("metafile document is always serializable")
    }
}

fn parse_managed(value: Value) -> Result<ManagedFields> {
    let obj = match value {
        Value::Object(m) => m,
        other => {
            return Err(Error::InvalidJson(serde_json::Error::io(std::io::Error::other(format!(
                "memorybox field must be an object, got {other}"
            )))))
        }
    };
    let file = obj
        .get("file")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidJson(serde_json::Error::io(std::io::Error::other("memorybox.file missing"))))?
        .to_string();
    let source = obj.get("source").and_then(Value::as_str).unwrap_or("").to_string();
    let size = obj.get("size").and_then(Value::as_u64).unwrap_or(0);
    Ok(ManagedFields { file: Digest::from_raw(file), source, size })
}

fn managed_to_value(m: &ManagedFields) -> Value {
    let mut obj = Map::new();
    obj.insert("file".to_string(), Value::String(m.file.as_str().to_string()));
    obj.insert("source".to_string(), Value::String(m.source.clone()));
    obj.insert("size".to_string(), Value::from(m.size));
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metafile_name_predicates_round_trip() {
        let d = "abc-sha256";
        let meta = to_metafile_name(d);
        assert_eq!(meta, "memorybox-meta-abc-sha256");
        assert!(is_metafile_name(&meta));
        assert_eq!(to_datafile_name(&meta), d);
        // Idempotent when already a metafile name.
        assert_eq!(to_metafile_name(&meta), meta);
    }

    #[test]
    fn reserved_key_is_immutable() {
        let mut doc = MetaDocument::new(ManagedFields {
            file: Digest::from_raw("abc-sha256"),
            source: "stdin".into(),
            size: 4,
        });
        doc.set("memorybox", "{}");
        assert!(doc.get("memorybox").is_some());
        doc.delete("memorybox");
        assert!(doc.get("memorybox").is_some());
    }

    #[test]
    fn set_parses_json_scalars() {
        let mut doc = MetaDocument::new(ManagedFields {
            file: Digest::from_raw("abc-sha256"),
            source: "stdin".into(),
            size: 4,
        });
        doc.set("k", "v");
        assert_eq!(doc.get("k"), Some(Value::String("v".into())));
        doc.set("k", "42");
        assert_eq!(doc.get("k"), Some(Value::from(42)));
    }

    #[test]
    fn set_does_not_unwrap_a_json_string_literal() {
        let mut doc = MetaDocument::new(ManagedFields {
            file: Digest::from_raw("abc-sha256"),
            source: "stdin".into(),
            size: 4,
        });
        // `"\"foo\""` parses as the JSON string `foo`, but spec §4.3 only
        // names object/array/number/bool/null as the "parses as JSON"
        // category, so the literal text (quotes included) is stored as-is.
        doc.set("k", "\"foo\"");
        assert_eq!(doc.get("k"), Some(Value::String("\"foo\"".into())));
    }

    #[test]
    fn round_trip_preserves_unknown_keys() {
        let json = serde_json::json!({
            "memorybox": {"file": "abc-sha256", "source": "x", "size": 0},
            "data": {"k": 1},
            "future_field": "kept",
        });
        let doc = MetaDocument::try_parse(json.clone()).unwrap().unwrap();
        let back = doc.to_json();
        assert_eq!(back.get("future_field"), json.get("future_field"));
    }
}
