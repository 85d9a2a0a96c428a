//! `$ref` resolution anchored at the family's openapi directory.
//!
//! References come in three shapes: local (`#/components/schemas/X`),
//! cross-document (`vnd.acme.bar.v3.0.0#/components/schemas/Y`), and full
//! file URLs (`file:///.../vnd.acme.bar.v3.0.0#/...`). All resolve against
//! `file://<basedir>/apischemas/openapi/`.

use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Expansion past this depth means a reference cycle; the remaining `$ref`
/// is left in place.
const MAX_REF_DEPTH: usize = 32;

pub struct Resolver {
    base_dir: PathBuf,
    root: Value,
    docs: RefCell<HashMap<String, Value>>,
}

impl Resolver {
    pub fn new(base_dir: PathBuf, root: Value) -> Resolver {
        Resolver {
            base_dir,
            root,
            docs: RefCell::new(HashMap::new()),
        }
    }

    /// Resolve one `$ref` string to the referenced value (not yet expanded).
    pub fn resolve(&self, ref_str: &str) -> anyhow::Result<Value> {
        debug!(reference = %ref_str, "resolving reference");
        let (doc_part, pointer) = match ref_str.split_once('#') {
            Some((d, p)) => (d, p),
            None => (ref_str, ""),
        };
        if doc_part.is_empty() {
            return follow_pointer(&self.root, pointer);
        }
        let file_name = doc_part
            .strip_prefix("file://")
            .unwrap_or(doc_part)
            .rsplit('/')
            .next()
            .unwrap_or(doc_part)
            .to_string();
        {
            let docs = self.docs.borrow();
            if let Some(doc) = docs.get(&file_name) {
                return follow_pointer(doc, pointer);
            }
        }
        let path = self.base_dir.join(&file_name);
        let doc = super::load_document(&path)?;
        let out = follow_pointer(&doc, pointer);
        self.docs.borrow_mut().insert(file_name, doc);
        out
    }

    /// Recursively expand every `$ref` in `value` in place.
    pub fn expand(&self, value: &mut Value) {
        self.expand_depth(value, 0);
    }

    fn expand_depth(&self, value: &mut Value, depth: usize) {
        if depth > MAX_REF_DEPTH {
            return;
        }
        match value {
            Value::Object(obj) => {
                if let Some(ref_str) = obj.get("$ref").and_then(Value::as_str) {
                    match self.resolve(ref_str) {
                        Ok(mut resolved) => {
                            self.expand_depth(&mut resolved, depth + 1);
                            *value = resolved;
                            return;
                        }
                        Err(e) => {
                            debug!(reference = %ref_str, error = %e, "unresolvable reference");
                        }
                    }
                }
                for v in obj.values_mut() {
                    self.expand_depth(v, depth + 1);
                }
            }
            Value::Array(arr) => {
                for v in arr.iter_mut() {
                    self.expand_depth(v, depth + 1);
                }
            }
            _ => {}
        }
    }
}

/// Follow a JSON pointer (`/components/schemas/X`) into a document.
fn follow_pointer(doc: &Value, pointer: &str) -> anyhow::Result<Value> {
    if pointer.is_empty() {
        return Ok(doc.clone());
    }
    let mut current = doc;
    for raw in pointer.trim_start_matches('/').split('/') {
        let token = raw.replace("~1", "/").replace("~0", "~");
        current = match current {
            Value::Object(obj) => obj
                .get(&token)
                .ok_or_else(|| anyhow::anyhow!("unresolvable pointer segment '{token}'"))?,
            Value::Array(arr) => {
                let idx: usize = token.parse()?;
                arr.get(idx)
                    .ok_or_else(|| anyhow::anyhow!("pointer index {idx} out of range"))?
            }
            _ => anyhow::bail!("pointer descends into a scalar at '{token}'"),
        };
    }
    Ok(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver_with(root: Value) -> Resolver {
        Resolver::new(std::env::temp_dir(), root)
    }

    #[test]
    fn test_local_ref() {
        let root = json!({
            "components": { "schemas": { "Pet": { "type": "object" } } }
        });
        let r = resolver_with(root);
        let v = r.resolve("#/components/schemas/Pet").unwrap();
        assert_eq!(v, json!({"type": "object"}));
    }

    #[test]
    fn test_expand_nested_refs() {
        let root = json!({
            "components": { "schemas": {
                "Name": { "type": "string" },
                "Pet": {
                    "type": "object",
                    "properties": { "name": { "$ref": "#/components/schemas/Name" } }
                }
            }}
        });
        let r = resolver_with(root.clone());
        let mut v = json!({ "$ref": "#/components/schemas/Pet" });
        r.expand(&mut v);
        assert_eq!(v["properties"]["name"], json!({"type": "string"}));
    }

    #[test]
    fn test_cyclic_refs_terminate() {
        let root = json!({
            "components": { "schemas": {
                "Node": {
                    "type": "object",
                    "properties": { "next": { "$ref": "#/components/schemas/Node" } }
                }
            }}
        });
        let r = resolver_with(root);
        let mut v = json!({ "$ref": "#/components/schemas/Node" });
        // Must not loop forever; the innermost ref survives unexpanded.
        r.expand(&mut v);
        assert_eq!(v["type"], "object");
    }

    #[test]
    fn test_cross_file_ref() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("vnd.acme.bar.v3.0.0"),
            serde_json::to_string(&json!({
                "components": { "schemas": { "Widget": { "type": "integer" } } }
            }))
            .unwrap(),
        )
        .unwrap();
        let r = Resolver::new(dir.path().to_path_buf(), json!({}));
        let v = r
            .resolve("vnd.acme.bar.v3.0.0#/components/schemas/Widget")
            .unwrap();
        assert_eq!(v, json!({"type": "integer"}));
    }

    #[test]
    fn test_missing_pointer_errors() {
        let r = resolver_with(json!({"components": {}}));
        assert!(r.resolve("#/components/schemas/Nope").is_err());
    }
}
