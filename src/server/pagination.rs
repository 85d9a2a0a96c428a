//! Pagination link synthesis for collection GETs.
//!
//! A handler returning `{_elem: [...], _cursor: <next>}` gets `_links`
//! injected: `_self` always, `_prev` when the request carried a cursor,
//! `_next` when the response carries one. The response `_cursor` moves into
//! the `_next` link.

use serde_json::{json, Map, Value};
use tracing::debug;

const DEFAULT_LIMIT: u64 = 10;

/// Rewrite a collection response with pagination links.
///
/// `req_obj` is the merged request input (carrying `_cursor`/`_limit` when
/// the client paged), `resp` the handler payload containing `_elem`.
pub fn add_pagination_info(url: &str, req_obj: &Value, resp: &Value, txid: &str) -> Value {
    let mut response = Map::new();
    let curr_cursor = req_obj
        .get("_cursor")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let limit = resp
        .get("_limit")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_LIMIT);

    let Some(elem) = resp.get("_elem") else {
        return Value::Object(response);
    };
    response.insert("_elem".to_string(), elem.clone());

    let mut links = Map::new();
    if curr_cursor.is_empty() {
        links.insert("_self".to_string(), json!({ "href": url }));
    } else {
        let href = format!("{url}?_cursor={curr_cursor}&_limit={limit}");
        links.insert("_self".to_string(), json!({ "href": href }));
        // TODO: _prev points at the current page's cursor; emitting a true
        // previous page needs cursor history the handlers do not expose yet.
        let prev = format!("{url}?_cursor={curr_cursor}&_limit={limit}");
        links.insert("_prev".to_string(), json!({ "href": prev }));
    }
    if let Some(next_cursor) = resp.get("_cursor").and_then(Value::as_str) {
        let href = format!("{url}?_cursor={next_cursor}&_limit={limit}");
        links.insert("_next".to_string(), json!({ "href": href }));
    }
    response.insert("_links".to_string(), Value::Object(links));

    if let Some(map) = resp.as_object() {
        for (key, value) in map {
            if key == "_elem" || key == "_cursor" {
                continue;
            }
            response.insert(key.clone(), value.clone());
        }
    }

    debug!(txid = %txid, "pagination links injected");
    Value::Object(response)
}
