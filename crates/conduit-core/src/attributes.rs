//! `SessionAttributes` deep-merge (spec §4.5/§4.6): a JSON-object tree with
//! a handful of reserved keys (`core.workingDir`, `core.activeBranch`,
//! `core.lastActiveAt`, `core.autoTitle`, `providers.<id>.{sessionId,cwd}`).
//!
//! Merge semantics, applied recursively key by key:
//!   - key absent from the patch → keep the existing value
//!   - key present with `null`   → delete the existing value
//!   - both sides are objects    → recurse
//!   - otherwise                 → replace

use serde_json::{Map, Value};

use crate::error::{ConduitError, Result};

/// Recursively merge `patch` into `base` in place, applying null-is-delete
/// semantics. `base` is created as an empty object if it is `Value::Null`.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    if base.is_null() {
        *base = Value::Object(Map::new());
    }

    let (Value::Object(base_map), Value::Object(patch_map)) = (base, patch) else {
        return;
    };

    for (key, patch_value) in patch_map {
        match patch_value {
            Value::Null => {
                base_map.remove(key);
            }
            Value::Object(_) => {
                let entry = base_map.entry(key.clone()).or_insert_with(|| Value::Object(Map::new()));
                if entry.is_object() {
                    deep_merge(entry, patch_value);
                } else {
                    *entry = patch_value.clone();
                }
            }
            other => {
                base_map.insert(key.clone(), other.clone());
            }
        }
    }
}

/// Validate reserved keys at the attribute-tree boundary. Currently this
/// only enforces that `core.workingDir`, when present, is an absolute path
/// (spec §3/§4.6 invariant).
pub fn validate_reserved_keys(attrs: &Value) -> Result<()> {
    if let Some(working_dir) = attrs.pointer("/core/workingDir").and_then(Value::as_str) {
        if !std::path::Path::new(working_dir).is_absolute() {
            return Err(ConduitError::InvalidArguments(format!(
                "core.workingDir must be an absolute path, got: {working_dir}"
            )));
        }
    }
    Ok(())
}

/// Read `core.workingDir` from an attribute tree, if set.
pub fn working_dir(attrs: &Value) -> Option<&str> {
    attrs.pointer("/core/workingDir").and_then(Value::as_str)
}

/// Read a provider continuation handle `providers.<id>.{sessionId,cwd}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderHandle {
    pub session_id: String,
    pub cwd: String,
}

pub fn provider_handle(attrs: &Value, provider_id: &str) -> Option<ProviderHandle> {
    let node = attrs.pointer(&format!("/providers/{provider_id}"))?;
    let session_id = node.get("sessionId")?.as_str()?.to_string();
    let cwd = node.get("cwd")?.as_str()?.to_string();
    Some(ProviderHandle { session_id, cwd })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merges_nested_objects() {
        let mut base = json!({"core": {"workingDir": "/tmp/a", "autoTitle": "old"}});
        let patch = json!({"core": {"autoTitle": "new"}});
        deep_merge(&mut base, &patch);
        assert_eq!(base, json!({"core": {"workingDir": "/tmp/a", "autoTitle": "new"}}));
    }

    #[test]
    fn null_deletes_key() {
        let mut base = json!({"core": {"workingDir": "/tmp/a", "autoTitle": "old"}});
        let patch = json!({"core": {"autoTitle": null}});
        deep_merge(&mut base, &patch);
        assert_eq!(base, json!({"core": {"workingDir": "/tmp/a"}}));
    }

    #[test]
    fn absent_key_is_kept() {
        let mut base = json!({"core": {"workingDir": "/tmp/a"}});
        let patch = json!({"providers": {"claude-cli": {"sessionId": "abc", "cwd": "/tmp/a"}}});
        deep_merge(&mut base, &patch);
        assert_eq!(base["core"]["workingDir"], "/tmp/a");
        assert_eq!(base["providers"]["claude-cli"]["sessionId"], "abc");
    }

    #[test]
    fn non_object_replaces_wholesale() {
        let mut base = json!({"core": {"workingDir": "/tmp/a"}});
        let patch = json!({"core": "not-an-object"});
        deep_merge(&mut base, &patch);
        assert_eq!(base["core"], json!("not-an-object"));
    }

    #[test]
    fn rejects_relative_working_dir() {
        let attrs = json!({"core": {"workingDir": "relative/path"}});
        assert!(validate_reserved_keys(&attrs).is_err());
    }

    #[test]
    fn accepts_absolute_working_dir() {
        let attrs = json!({"core": {"workingDir": "/abs/path"}});
        assert!(validate_reserved_keys(&attrs).is_ok());
    }

    #[test]
    fn reads_provider_handle() {
        let attrs = json!({"providers": {"claude-cli": {"sessionId": "abc", "cwd": "/w"}}});
        let handle = provider_handle(&attrs, "claude-cli").unwrap();
        assert_eq!(handle.session_id, "abc");
        assert_eq!(handle.cwd, "/w");
    }
}
