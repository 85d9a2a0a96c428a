//! Input merge algebra for the CLI assembler.
//!
//! Inputs arrive from several sources (defaults, stdin YAML, getopt flags,
//! inline YAML). Each source normalizes to a list of objects, and the final
//! input is the Cartesian deep-merge of all non-empty sources. Deep merge is
//! pointwise: objects recurse, everything else the right side wins.

use serde_json::{Map, Value};

/// Deep merge two values.
///
/// `Null` on either side yields the other. Two objects merge key by key,
/// recursing where both sides hold objects. Anything else is an error at the
/// top level; inside a recursion the right side simply wins.
pub fn deep_merge(left: &Value, right: &Value) -> anyhow::Result<Value> {
    match (left, right) {
        (Value::Null, r) => Ok(r.clone()),
        (l, Value::Null) => Ok(l.clone()),
        (Value::Object(l), Value::Object(r)) => Ok(Value::Object(merge_objects(l, r))),
        (l, _) if !l.is_object() => {
            anyhow::bail!("Invalid argument: must be an object: {l}")
        }
        (_, r) => anyhow::bail!("Invalid argument: must be an object: {r}"),
    }
}

fn merge_objects(left: &Map<String, Value>, right: &Map<String, Value>) -> Map<String, Value> {
    let mut out = left.clone();
    for (key, rval) in right {
        let merged = match (out.get(key), rval) {
            (Some(Value::Object(lo)), Value::Object(ro)) => Value::Object(merge_objects(lo, ro)),
            _ => rval.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}

/// Normalize one input source into a list of objects.
///
/// - `null` and `[]` become `None`;
/// - a list of scalars becomes `[{_id: s}, ...]`;
/// - an object becomes a single-element list;
/// - a list containing objects (or lists) is passed through unchanged.
pub fn normalize_input(input: &Value) -> anyhow::Result<Option<Vec<Value>>> {
    match input {
        Value::Null => Ok(None),
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(None);
            }
            let any_compound = items.iter().any(|i| i.is_object() || i.is_array());
            if any_compound {
                Ok(Some(items.clone()))
            } else {
                Ok(Some(
                    items
                        .iter()
                        .map(|s| {
                            let mut m = Map::new();
                            m.insert("_id".to_string(), s.clone());
                            Value::Object(m)
                        })
                        .collect(),
                ))
            }
        }
        Value::Object(_) => Ok(Some(vec![input.clone()])),
        other => anyhow::bail!("Invalid input: {other}"),
    }
}

/// Cartesian product of two normalized lists under deep merge.
pub fn input_multiply(left: &[Value], right: &[Value]) -> anyhow::Result<Vec<Value>> {
    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in left {
        for r in right {
            out.push(deep_merge(l, r)?);
        }
    }
    Ok(out)
}

/// Merge all input sources into the final object list.
///
/// Sources normalize first; empty ones drop out; the rest reduce under
/// [`input_multiply`]. No sources at all yields `None`.
pub fn merge_inputs(sources: &[Value]) -> anyhow::Result<Option<Vec<Value>>> {
    let mut lists: Vec<Vec<Value>> = Vec::new();
    for src in sources {
        if let Some(list) = normalize_input(src)? {
            lists.push(list);
        }
    }
    let mut iter = lists.into_iter();
    let first = match iter.next() {
        Some(f) => f,
        None => return Ok(None),
    };
    let mut acc = first;
    for next in iter {
        acc = input_multiply(&acc, &next)?;
    }
    Ok(Some(acc))
}
