//! Response writing helpers for `may_minihttp`.

use may_minihttp::Response;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

fn status_reason(status: u16) -> &'static str {
    match status {
        102 => "Processing",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        406 => "Not Acceptable",
        410 => "Gone",
        415 => "Unsupported Media Type",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// `may_minihttp` wants `&'static str` headers; dynamic values are interned
/// once so repeats do not leak again.
fn intern_header(value: String) -> &'static str {
    static INTERN: OnceLock<RwLock<HashMap<String, &'static str>>> = OnceLock::new();
    let map = INTERN.get_or_init(|| RwLock::new(HashMap::new()));
    if let Ok(read) = map.read() {
        if let Some(existing) = read.get(&value).copied() {
            return existing;
        }
    }
    let mut write = match map.write() {
        Ok(w) => w,
        Err(_) => return Box::leak(value.into_boxed_str()),
    };
    if let Some(existing) = write.get(&value).copied() {
        return existing;
    }
    let leaked: &'static str = Box::leak(value.into_boxed_str());
    write.insert(leaked.to_string(), leaked);
    leaked
}

/// Write one response: status, content type, extra headers, body. A 204
/// carries no body.
pub fn write_payload(
    res: &mut Response,
    status: u16,
    content_type: &str,
    extra_headers: &[(String, String)],
    body: String,
) {
    res.status_code(status as usize, status_reason(status));
    res.header(intern_header(format!("Content-Type: {content_type}")));
    res.header("Access-Control-Allow-Origin: *");
    for (name, value) in extra_headers {
        res.header(intern_header(format!("{name}: {value}")));
    }
    if status != 204 {
        res.body_vec(body.into_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reason() {
        assert_eq!(status_reason(200), "OK");
        assert_eq!(status_reason(202), "Accepted");
        assert_eq!(status_reason(503), "Service Unavailable");
        assert_eq!(status_reason(599), "OK");
    }

    #[test]
    fn test_intern_header_reuses_allocations() {
        let a = intern_header("X-Test: 1".to_string());
        let b = intern_header("X-Test: 1".to_string());
        assert!(std::ptr::eq(a, b));
    }
}
