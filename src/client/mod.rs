//! The remote client: drive a gateway from the CLI.

mod remote;

pub use remote::{
    generate_url, get_request_status, get_url_prefix, query_string_for, remote_handler,
    ClientAuth,
};

/// HTTP verbs with a native method mapping; everything else is a custom
/// verb.
pub const HTTP_VERBS: [&str; 4] = ["get", "create", "delete", "update"];

/// Map a lone verb (plus pk presence) onto an HTTP method name.
pub fn get_http_method(pk: Option<&str>, verb: &str) -> &'static str {
    match verb {
        "get" => "get",
        "delete" => "delete",
        "create" => {
            if pk.is_some() {
                "put"
            } else {
                "post"
            }
        }
        "update" => "put",
        _ => "post",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_method_mapping() {
        assert_eq!(get_http_method(None, "get"), "get");
        assert_eq!(get_http_method(Some("x"), "delete"), "delete");
        assert_eq!(get_http_method(Some("x"), "create"), "put");
        assert_eq!(get_http_method(None, "create"), "post");
        assert_eq!(get_http_method(Some("x"), "update"), "put");
        assert_eq!(get_http_method(None, "reindex"), "post");
    }
}
