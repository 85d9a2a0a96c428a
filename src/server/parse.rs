//! Inbound HTTP request parsing.

use http::Method;
use may_minihttp::Request;
use std::io::Read;
use tracing::debug;

/// Parsed pieces of one inbound request.
///
/// The path is kept raw (still percent-encoded) so that `%2F` survives to
/// the router; decoding happens per typed parameter afterwards.
#[derive(Debug)]
pub struct ParsedRequest {
    pub method: Method,
    /// Path without the query string, percent-encoded as received.
    pub raw_path: String,
    /// Decoded query parameters, in arrival order.
    pub query: Vec<(String, String)>,
    /// Headers with lowercase names.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ParsedRequest {
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Header value, treating an empty string as absent.
    pub fn header_nonempty(&self, name: &str) -> Option<String> {
        self.get_header(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// Split a raw request target into its encoded path and decoded query pairs.
pub fn split_target(target: &str) -> (String, Vec<(String, String)>) {
    match target.split_once('?') {
        Some((path, query_str)) => {
            let query = url::form_urlencoded::parse(query_str.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            (path.to_string(), query)
        }
        None => (target.to_string(), Vec::new()),
    }
}

/// Parse one `may_minihttp` request. An unparseable HTTP method is returned
/// as the error value.
pub fn parse_request(req: Request) -> Result<ParsedRequest, String> {
    let method_str = req.method();
    let method: Method = method_str.parse().map_err(|_| method_str.to_string())?;
    let (raw_path, query) = split_target(req.path());

    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|h| {
            (
                h.name.to_ascii_lowercase(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    let mut body = Vec::new();
    let _ = req.body().read_to_end(&mut body);

    debug!(
        method = %method,
        path = %raw_path,
        header_count = headers.len(),
        query_count = query.len(),
        body_bytes = body.len(),
        "request parsed"
    );

    Ok(ParsedRequest {
        method,
        raw_path,
        query,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_target() {
        let (path, query) = split_target("/foo?x=1&y=two");
        assert_eq!(path, "/foo");
        assert_eq!(
            query,
            vec![
                ("x".to_string(), "1".to_string()),
                ("y".to_string(), "two".to_string())
            ]
        );
    }

    #[test]
    fn test_split_target_keeps_encoded_path() {
        let (path, query) = split_target("/foo/a%2Fb");
        assert_eq!(path, "/foo/a%2Fb");
        assert!(query.is_empty());
    }

    #[test]
    fn test_query_values_are_decoded() {
        let (_, query) = split_target("/foo?name=a%20b");
        assert_eq!(query[0].1, "a b");
    }
}
