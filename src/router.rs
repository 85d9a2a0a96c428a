//! Path matching for compiled operations.
//!
//! OpenAPI path templates become regexes with typed segments
//! (`{integer→int, number→float, string→string, object→string}`). Matching
//! runs against the *raw*, still percent-encoded path so that `%2F` inside
//! a segment never splits it; captured values are decoded afterwards by the
//! parameter decoding layer.

use crate::spec::{LoneSpec, OperationSpec, SegmentKind};
use http::Method;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One installed route.
pub struct Route {
    pub op: Arc<OperationSpec>,
    regex: Regex,
    param_names: Vec<String>,
}

/// Result of matching a request path against the route table.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub op: Arc<OperationSpec>,
    /// Captured path values, still percent-encoded, in template order.
    pub path_values: Vec<(String, String)>,
}

/// Route table compiled from the loaded lone specs.
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Build the table. Specs are expected latest-first per lone; duplicate
    /// `(method, path)` pairs keep the first (newest) entry.
    pub fn new(specs: &[LoneSpec]) -> Router {
        let mut routes: Vec<Route> = Vec::new();
        for spec in specs {
            for op in &spec.operations {
                let duplicate = routes
                    .iter()
                    .any(|r| r.op.method == op.method && r.op.path_pattern == op.path_pattern);
                if duplicate {
                    continue;
                }
                match path_to_regex(op) {
                    Ok((regex, param_names)) => {
                        routes.push(Route {
                            op: Arc::new(op.clone()),
                            regex,
                            param_names,
                        });
                    }
                    Err(e) => {
                        warn!(
                            path = %op.path_pattern,
                            error = %e,
                            "route pattern does not compile, skipped"
                        );
                    }
                }
            }
        }
        info!(routes_count = routes.len(), "routing table loaded");
        Router { routes }
    }

    /// Match a method and raw request path to an operation.
    pub fn route(&self, method: &Method, raw_path: &str) -> Option<RouteMatch> {
        debug!(method = %method, path = %raw_path, "route match attempt");
        for route in &self.routes {
            if &route.op.method != method {
                continue;
            }
            if let Some(caps) = route.regex.captures(raw_path) {
                let path_values = route
                    .param_names
                    .iter()
                    .enumerate()
                    .filter_map(|(i, name)| {
                        caps.get(i + 1)
                            .map(|m| (name.clone(), m.as_str().to_string()))
                    })
                    .collect();
                debug!(
                    method = %method,
                    path = %raw_path,
                    operation_id = %route.op.operation_id,
                    "route matched"
                );
                return Some(RouteMatch {
                    op: route.op.clone(),
                    path_values,
                });
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Compile an OpenAPI path template into a regex and its parameter names.
fn path_to_regex(op: &OperationSpec) -> anyhow::Result<(Regex, Vec<String>)> {
    let mut pattern = String::with_capacity(op.path_pattern.len() + 8);
    pattern.push('^');
    let mut param_names = Vec::new();
    for segment in op.path_pattern.split('/') {
        if segment.is_empty() {
            continue;
        }
        if let Some(name) = segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
        {
            let kind = op
                .param_kind(name)
                .map(SegmentKind::from)
                .unwrap_or(SegmentKind::Str);
            pattern.push_str(match kind {
                SegmentKind::Int => r"/(-?\d+)",
                SegmentKind::Float => r"/(-?\d+(?:\.\d+)?)",
                SegmentKind::Str => r"/([^/]+)",
            });
            param_names.push(name.to_string());
        } else {
            pattern.push('/');
            pattern.push_str(&regex::escape(segment));
        }
    }
    if param_names.is_empty() && pattern == "^" {
        pattern.push('/');
    }
    // Trailing slashes are not significant.
    pattern.push_str("/?$");
    Ok((Regex::new(&pattern)?, param_names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ParamKind, ParameterSpec};
    use serde_json::json;
    use std::collections::HashMap;

    fn op(method: Method, pattern: &str, params: &[(&str, ParamKind)]) -> OperationSpec {
        let mut param_types = HashMap::new();
        let mut path_params = Vec::new();
        for (name, kind) in params {
            param_types.insert(name.to_string(), *kind);
            path_params.push(ParameterSpec {
                name: name.to_string(),
                required: true,
                kind: *kind,
                schema: json!({}),
            });
        }
        OperationSpec {
            lone: "foo".to_string(),
            version: "v3.0.0".to_string(),
            major_version: "v3".to_string(),
            method,
            path_pattern: pattern.to_string(),
            operation_id: format!("op_{pattern}"),
            path_params,
            query_params: Vec::new(),
            param_types,
            request_body_schema: None,
            request_body_required: false,
            input_schema: json!({}),
            response_schema: json!({}),
            media_types: Vec::new(),
        }
    }

    fn router(ops: Vec<OperationSpec>) -> Router {
        let spec = LoneSpec {
            lone: "foo".to_string(),
            version: "v3.0.0".to_string(),
            major_version: "v3".to_string(),
            file_name: "vnd.acme.foo.v3.0.0".to_string(),
            file_path: std::path::PathBuf::new(),
            media_types: Vec::new(),
            schema_names: Vec::new(),
            parameter_names: Vec::new(),
            operations: ops,
        };
        Router::new(&[spec])
    }

    #[test]
    fn test_static_and_param_routes() {
        let r = router(vec![
            op(Method::GET, "/foo", &[]),
            op(Method::GET, "/foo/{primary_key}", &[("primary_key", ParamKind::String)]),
        ]);
        let m = r.route(&Method::GET, "/foo").unwrap();
        assert_eq!(m.op.path_pattern, "/foo");
        let m = r.route(&Method::GET, "/foo/abc").unwrap();
        assert_eq!(m.path_values, vec![("primary_key".to_string(), "abc".to_string())]);
        assert!(r.route(&Method::DELETE, "/foo").is_none());
        assert!(r.route(&Method::GET, "/bar").is_none());
    }

    #[test]
    fn test_typed_segments() {
        let r = router(vec![op(
            Method::GET,
            "/foo/{num}",
            &[("num", ParamKind::Integer)],
        )]);
        assert!(r.route(&Method::GET, "/foo/123").is_some());
        assert!(r.route(&Method::GET, "/foo/abc").is_none());
    }

    #[test]
    fn test_encoded_slash_stays_in_segment() {
        let r = router(vec![op(
            Method::GET,
            "/foo/{primary_key}",
            &[("primary_key", ParamKind::String)],
        )]);
        let m = r.route(&Method::GET, "/foo/a%2Fb").unwrap();
        assert_eq!(m.path_values[0].1, "a%2Fb");
        // A literal slash still splits and fails the single-segment route.
        assert!(r.route(&Method::GET, "/foo/a/b").is_none());
    }

    #[test]
    fn test_trailing_slash_not_significant() {
        let r = router(vec![op(Method::GET, "/foo", &[])]);
        assert!(r.route(&Method::GET, "/foo/").is_some());
    }
}
