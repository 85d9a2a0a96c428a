//! Local (lone-mode) request handling: validate in-process against the
//! openapi document, then run the handler directly.

use crate::client::{get_http_method, HTTP_VERBS};
use crate::config::{CmConfig, FamilyConfig};
use crate::error::{gen_error, where_of, ApiError};
use crate::handler;
use crate::lone::Lone;
use crate::request::Request;
use crate::spec::{
    compile_operation, decode_path_value, decode_query_value, latest_spec_file, load_lone_spec,
    schema_error, LoneSpec, ParamKind,
};
use http::Method;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::info;

/// Build the templated request path and its url variables from a request's
/// pk and sub path.
///
/// Sub-path pieces that are schema names become literal segments; the
/// piece after a schema name becomes a `{<name>}` variable, and `k=v`
/// pieces collapse into a `{<name>_keys}` variable that accumulates
/// following non-schema pieces.
pub fn get_path_for_request(
    req: &Request,
    schema_names: &[String],
    luser: &str,
    lhost: &str,
) -> Result<(String, Map<String, Value>), Value> {
    let mut urlvars = Map::new();
    let mut reqpath = format!("/{}", req.lone);
    if !HTTP_VERBS.contains(&req.verb.as_str()) {
        reqpath.push(':');
        reqpath.push_str(&req.verb);
        return Ok((reqpath, urlvars));
    }
    if let Some(pk) = &req.pk {
        reqpath.push_str("/{primary_key}");
        urlvars.insert("primary_key".to_string(), Value::String(pk.clone()));
    }
    if req.pk.is_some() {
        if let Some(path) = &req.path {
            let mut pathpart: Option<String> = None;
            let mut in_keys = false;
            for piece in path.trim_start_matches('/').split('/') {
                if schema_names.iter().any(|s| s == piece) {
                    reqpath.push('/');
                    reqpath.push_str(piece);
                    pathpart = Some(piece.to_string());
                    in_keys = false;
                    continue;
                }
                let Some(part) = &pathpart else {
                    return Err(gen_error(
                        Value::String("Wrong request format".to_string()),
                        &req.lone,
                        Some(&req.verb),
                        req.pk.as_deref(),
                        req.obj.as_ref(),
                        Some(luser),
                        Some(lhost),
                    ));
                };
                if piece.contains('=') {
                    reqpath.push_str(&format!("/{{{part}_keys}}"));
                    urlvars.insert(format!("{part}_keys"), Value::String(piece.to_string()));
                    in_keys = true;
                } else if in_keys {
                    let key = format!("{part}_keys");
                    if let Some(Value::String(existing)) = urlvars.get(&key) {
                        let appended = format!("{existing}/{piece}");
                        urlvars.insert(key, Value::String(appended));
                    }
                } else {
                    reqpath.push_str(&format!("/{{{part}}}"));
                    urlvars.insert(part.clone(), Value::String(piece.to_string()));
                }
            }
        }
    }
    Ok((reqpath, urlvars))
}

/// Whether the operation a CLI invocation resolves to requires a request
/// body. Conservative: no openapi document means yes. An unknown request
/// path prints the error envelope and exits 1.
pub fn is_body_required(
    basedir: &Path,
    family: &str,
    lone: &str,
    pk: Option<&str>,
    verb: &str,
    path: Option<&str>,
    obj: Option<&[Value]>,
    luser: &str,
    lhost: &str,
) -> bool {
    let openapi_dir = basedir.join(crate::config::OPENAPI_DIR);
    let Ok(Some(file)) = latest_spec_file(&openapi_dir, family, lone) else {
        return true;
    };
    let Ok(spec) = load_lone_spec(&openapi_dir, &file) else {
        return true;
    };

    let probe = Request::new(crate::request::RequestParts {
        lone: lone.to_string(),
        verb: verb.to_string(),
        pk: pk.map(str::to_string),
        path: path.map(str::to_string),
        obj: obj.and_then(|o| o.first().cloned()),
        ..Default::default()
    });
    let (request_path, _) = match get_path_for_request(&probe, &spec.schema_names, luser, lhost) {
        Ok(v) => v,
        Err(res) => {
            println!("{}", serde_yaml::to_string(&res).unwrap_or_default());
            std::process::exit(1);
        }
    };
    let method = method_for(pk, verb);
    let Some(op) = spec.operation(&request_path, &method) else {
        let res = gen_error(
            Value::String(format!("Wrong command request format {request_path}")),
            lone,
            Some(verb),
            pk,
            obj.and_then(|o| o.first()),
            Some(luser),
            Some(lhost),
        );
        println!("{}", serde_yaml::to_string(&res).unwrap_or_default());
        std::process::exit(1);
    };
    op.request_body_required
}

fn method_for(pk: Option<&str>, verb: &str) -> Method {
    match get_http_method(pk, verb).to_uppercase().parse() {
        Ok(m) => m,
        Err(_) => Method::POST,
    }
}

/// Validate each request against the lone's openapi document, decode its
/// typed variables and rewrite the verb to the operation id.
///
/// Errors come back as finished `_error` documents; the caller prints them
/// and exits 1.
pub fn validate_requests(
    spec: &LoneSpec,
    cm_config: &CmConfig,
    requests: Vec<Request>,
    luser: &str,
    lhost: &str,
) -> Result<Vec<Request>, Value> {
    let mut results = Vec::with_capacity(requests.len());
    for mut req in requests {
        let (request_path, urlvars) =
            get_path_for_request(&req, &spec.schema_names, luser, lhost)?;
        let method = method_for(req.pk.as_deref(), &req.verb);
        let Some(op) = spec.operation(&request_path, &method) else {
            return Err(gen_error(
                Value::String(format!("Wrong command request format {request_path}")),
                &req.lone,
                Some(&req.verb),
                req.pk.as_deref(),
                req.obj.as_ref(),
                Some(luser),
                Some(lhost),
            ));
        };

        let mut obj = Map::new();
        let mut final_obj = Map::new();

        if method == Method::GET && req.pk.is_none() {
            let mut query = Map::new();
            if let Some(Value::Object(input)) = &req.obj {
                for (key, val) in input {
                    let kind = op.param_kind(key).unwrap_or(ParamKind::String);
                    let raw = match val {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    let decoded = decode_query_value(&raw, kind)
                        .map_err(|e| local_error(&e, &req, luser, lhost))?;
                    query.insert(key.clone(), decoded.clone());
                    final_obj.insert(key.clone(), decoded);
                }
            }
            if !query.is_empty() {
                obj.insert("query".to_string(), Value::Object(query));
            }
        }

        if !urlvars.is_empty() {
            let mut path_section = Map::new();
            for (key, val) in &urlvars {
                let kind = op.param_kind(key).unwrap_or(ParamKind::String);
                let raw = match val {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let decoded = decode_path_value(&raw, kind)
                    .map_err(|e| local_error(&e, &req, luser, lhost))?;
                path_section.insert(key.clone(), decoded.clone());
                final_obj.insert(key.clone(), decoded);
            }
            obj.insert("path".to_string(), Value::Object(path_section));
        }

        if let (Some(body), false) = (&req.body, method == Method::GET) {
            obj.insert("body".to_string(), body.clone());
            final_obj.insert("body".to_string(), body.clone());
        }

        if cm_config.requires_ticket(&req.lone, &op.operation_id) && req.cm.is_none() {
            let err = ApiError::with_context(
                "Please provide a valid change management ticket",
                400,
                Some(&req.lone),
                Some(&req.verb),
                req.pk.as_deref(),
                req.obj.as_ref(),
                Some(luser),
                Some(lhost),
            );
            return Err(err.error_message());
        }

        let validators = compile_operation(op).map_err(|e| {
            gen_error(
                Value::String(e.to_string()),
                &req.lone,
                Some(&req.verb),
                req.pk.as_deref(),
                req.obj.as_ref(),
                Some(luser),
                Some(lhost),
            )
        })?;
        if let Some(err) = schema_error(&validators.input, &Value::Object(obj.clone())) {
            return Err(gen_error(
                err,
                &req.lone,
                Some(&req.verb),
                req.pk.as_deref(),
                req.obj.as_ref(),
                Some(luser),
                Some(lhost),
            ));
        }

        final_obj.remove("primary_key");
        req.obj = Some(Value::Object(final_obj));
        req.verb = op.operation_id.clone();
        req.user = luser.to_string();
        req.host = lhost.to_string();
        results.push(req);
    }
    Ok(results)
}

fn local_error(err: &ApiError, req: &Request, luser: &str, lhost: &str) -> Value {
    gen_error(
        err.message.clone(),
        &req.lone,
        Some(&req.verb),
        req.pk.as_deref(),
        req.obj.as_ref(),
        Some(luser),
        Some(lhost),
    )
}

/// Run requests against the in-process handler table.
pub fn local_handler(
    lone: &Lone,
    requests: Vec<Request>,
    config: &FamilyConfig,
    luser: &str,
    lhost: &str,
) -> Result<Vec<Value>, Value> {
    let openapi_dir = config.openapi_dir();
    let spec_file = latest_spec_file(&openapi_dir, &config.family, lone.name())
        .ok()
        .flatten();
    let spec = match spec_file {
        Some(file) => load_lone_spec(&openapi_dir, &file).map_err(|e| {
            gen_error(
                Value::String(e.to_string()),
                lone.name(),
                None,
                None,
                None,
                Some(luser),
                Some(lhost),
            )
        })?,
        None => {
            return Err(gen_error(
                Value::String("no openapi document found for lone".to_string()),
                lone.name(),
                None,
                None,
                None,
                Some(luser),
                Some(lhost),
            ));
        }
    };
    let cm_config = CmConfig::load(&config.basedir).unwrap_or_default();
    let requests = validate_requests(&spec, &cm_config, requests, luser, lhost)?;

    let mut results = Vec::with_capacity(requests.len());
    for req in &requests {
        info!(txid = %req.txid, verb = %req.verb, "local request");
        let (resp, code) = handler::process_req(config, lone, req, None);
        if code == 200 || code == 204 {
            results.push(resp);
        } else {
            let err = ApiError::with_context(
                resp,
                code,
                Some(&where_of(&config.deployment, &config.family, &req.lone)),
                Some(&req.verb),
                req.pk.as_deref(),
                req.obj.as_ref(),
                Some(luser),
                Some(lhost),
            );
            results.push(err.error_message());
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestParts;

    fn req(verb: &str, pk: Option<&str>, path: Option<&str>) -> Request {
        Request::new(RequestParts {
            lone: "foo".to_string(),
            verb: verb.to_string(),
            pk: pk.map(str::to_string),
            path: path.map(str::to_string),
            ..Default::default()
        })
    }

    #[test]
    fn test_path_for_plain_get() {
        let (path, urlvars) = get_path_for_request(&req("get", None, None), &[], "u", "h").unwrap();
        assert_eq!(path, "/foo");
        assert!(urlvars.is_empty());
    }

    #[test]
    fn test_path_for_pk() {
        let (path, urlvars) =
            get_path_for_request(&req("get", Some("abc"), None), &[], "u", "h").unwrap();
        assert_eq!(path, "/foo/{primary_key}");
        assert_eq!(urlvars["primary_key"], "abc");
    }

    #[test]
    fn test_path_for_custom_verb() {
        let (path, _) = get_path_for_request(&req("reindex", None, None), &[], "u", "h").unwrap();
        assert_eq!(path, "/foo:reindex");
    }

    #[test]
    fn test_path_with_schema_sub_path() {
        let schema_names = vec!["props".to_string()];
        let (path, urlvars) = get_path_for_request(
            &req("update", Some("abc"), Some("props/color")),
            &schema_names,
            "u",
            "h",
        )
        .unwrap();
        assert_eq!(path, "/foo/{primary_key}/props/{props}");
        assert_eq!(urlvars["props"], "color");
    }

    #[test]
    fn test_path_with_keyed_sub_path() {
        let schema_names = vec!["props".to_string()];
        let (path, urlvars) = get_path_for_request(
            &req("update", Some("abc"), Some("props/k=v/more")),
            &schema_names,
            "u",
            "h",
        )
        .unwrap();
        assert_eq!(path, "/foo/{primary_key}/props/{props_keys}");
        assert_eq!(urlvars["props_keys"], "k=v/more");
    }

    #[test]
    fn test_leading_non_schema_piece_is_an_error() {
        let err = get_path_for_request(
            &req("update", Some("abc"), Some("mystery/x")),
            &[],
            "u",
            "h",
        )
        .unwrap_err();
        assert!(err["_error"]["why"]
            .as_str()
            .unwrap()
            .contains("Wrong request format"));
    }
}
