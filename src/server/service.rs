//! The gateway application service: one `call` per inbound request.

use crate::auth::{get_authentication_plugin, AuthPlugin};
use crate::broker::socket_path;
use crate::config::{
    load_family_config, CmConfig, ConfigOptions, FamilyConfig, Mode, ServerConfig,
};
use crate::error::ApiError;
use crate::framing::{read_json_frame, write_json_frame};
use crate::journal;
use crate::media::{negotiate_accept, negotiate_content_type, Negotiated};
use crate::request::{Request, RequestParts};
use crate::router::Router;
use crate::server::pagination::add_pagination_info;
use crate::server::parse::{parse_request, ParsedRequest};
use crate::server::response::write_payload;
use crate::services;
use crate::spec::{
    compile_operation, decode_path_value, decode_query_value, load_family_specs, schema_error,
    LoneSpec, OperationValidators, ParamKind,
};
use crate::worker::{DispatchEnvelope, WorkerReply};
use http::Method;
use may_minihttp::{HttpService, Response};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::io;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lones answered directly in the gateway, never dispatched.
const INTERNAL_LONES: [&str; 4] = ["_status", "_config", "_lones", "_ping"];

/// Gateway process configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub basedir: PathBuf,
    pub deployment: String,
    /// Fabric frontend url the gateway dispatches over.
    pub client_socket: String,
    pub auth_type: String,
    pub auth_data: Option<PathBuf>,
    pub validation_socket: Option<PathBuf>,
    pub authorization_socket: Option<PathBuf>,
}

struct Inner {
    config: FamilyConfig,
    cm: CmConfig,
    specs: HashMap<String, LoneSpec>,
    served: Vec<String>,
    router: Router,
    /// Compiled validators keyed by `lone::operationId`.
    validators: HashMap<String, OperationValidators>,
    auth: Arc<dyn AuthPlugin>,
    client_socket: String,
    validation_socket: Option<PathBuf>,
    authorization_socket: Option<PathBuf>,
}

/// The HTTP gateway service. Cloning shares all state.
#[derive(Clone)]
pub struct AppService {
    inner: Arc<Inner>,
}

struct Reply {
    status: u16,
    payload: Value,
    headers: Vec<(String, String)>,
}

impl AppService {
    pub fn new(gw: GatewayConfig) -> anyhow::Result<AppService> {
        let options = ConfigOptions {
            deployment: Some(gw.deployment.clone()),
            mode: Some(Mode::Server),
            servers: None,
        };
        let config = load_family_config(&gw.basedir, &options)?;
        let server_config = ServerConfig::load(&gw.basedir)?;
        let cm = CmConfig::load(&gw.basedir)?;
        let specs_vec = load_family_specs(
            &config.openapi_dir(),
            &config.family,
            &server_config.lones,
        )?;
        let router = Router::new(&specs_vec);

        let mut validators = HashMap::new();
        for spec in &specs_vec {
            for op in &spec.operations {
                let key = format!("{}::{}", op.lone, op.operation_id);
                match compile_operation(op) {
                    Ok(v) => {
                        validators.insert(key, v);
                    }
                    Err(e) => warn!(operation = %key, error = %e, "validator does not compile"),
                }
            }
        }

        let auth_data = gw
            .auth_data
            .as_ref()
            .map(|p| -> anyhow::Result<Value> {
                let content = std::fs::read_to_string(p)?;
                Ok(serde_yaml::from_str(&content)?)
            })
            .transpose()?;
        let auth = get_authentication_plugin(&gw.auth_type, auth_data.as_ref())?;

        let specs = specs_vec
            .into_iter()
            .map(|s| (s.lone.clone(), s))
            .collect();

        info!(
            family = %config.family,
            deployment = %config.deployment,
            lones = ?server_config.lones,
            "gateway configured"
        );

        Ok(AppService {
            inner: Arc::new(Inner {
                config,
                cm,
                specs,
                served: server_config.lones,
                router,
                validators,
                auth,
                client_socket: gw.client_socket,
                validation_socket: gw.validation_socket,
                authorization_socket: gw.authorization_socket,
            }),
        })
    }

    fn docs_page(&self, lone: &str) -> Option<String> {
        let spec = self.inner.specs.get(lone)?;
        let spec_url = format!("/{}/_static/{}", lone, spec.file_name);
        let title = format!("{} {} resource", self.inner.config.family, lone);
        Some(format!(
            concat!(
                "<!DOCTYPE html><html><head><title>{title}</title>",
                "<link rel=\"stylesheet\" href=\"https://unpkg.com/swagger-ui-dist@4/swagger-ui.css\">",
                "</head><body><div id=\"swagger-ui\"></div>",
                "<script src=\"https://unpkg.com/swagger-ui-dist@4/swagger-ui-bundle.js\"></script>",
                "<script>window.onload = () => SwaggerUIBundle({{ url: \"{url}\", dom_id: \"#swagger-ui\" }});</script>",
                "</body></html>"
            ),
            title = title,
            url = spec_url,
        ))
    }

    fn static_spec(&self, lone: &str, file_name: &str) -> Option<Vec<u8>> {
        // Only the vendor documents of a served lone are exposed.
        if !self.inner.served.iter().any(|l| l == lone) {
            return None;
        }
        if !file_name.starts_with("vnd.") || file_name.contains('/') || file_name.contains("..") {
            return None;
        }
        std::fs::read(self.inner.config.openapi_dir().join(file_name)).ok()
    }

    fn internal_lone(&self, path: &str) -> Option<Reply> {
        let inner = &self.inner;
        let payload = match path.trim_end_matches('/') {
            "/_ping" => json!({ "status": "pong" }),
            "/_lones" => json!({ "_elem": inner.served }),
            "/_config" => json!({
                "family": inner.config.family,
                "deployment": inner.config.deployment,
                "mode": inner.config.mode,
            }),
            _ => return None,
        };
        Some(Reply {
            status: 200,
            payload,
            headers: Vec::new(),
        })
    }

    /// Dispatch one envelope over the fabric and wait for the worker reply.
    fn dispatch(
        &self,
        request: &Request,
        auth: Option<Value>,
        version: &str,
    ) -> Result<(Value, u16), ApiError> {
        let transport_err = |e: String| {
            ApiError::with_context(
                e,
                500,
                Some(&request.lone),
                Some(&request.verb),
                request.pk.as_deref(),
                request.obj.as_ref(),
                Some(&request.user),
                Some(&request.host),
            )
        };
        let envelope = DispatchEnvelope {
            request: request.clone(),
            auth,
            version: Some(version.to_string()),
        };
        let path = socket_path(&self.inner.client_socket);
        debug!(txid = %request.txid, socket = %path.display(), "dispatching over fabric");
        let mut stream = UnixStream::connect(&path)
            .map_err(|e| transport_err(format!("dispatch fabric unreachable: {e}")))?;
        write_json_frame(&mut stream, &envelope)
            .map_err(|e| transport_err(format!("dispatch send failed: {e}")))?;
        let reply: WorkerReply = read_json_frame(&mut stream)
            .map_err(|e| transport_err(format!("dispatch receive failed: {e}")))?
            .ok_or_else(|| transport_err("dispatch fabric closed the connection".to_string()))?;
        debug!(txid = %request.txid, code = reply.code, "worker reply received");
        Ok((reply.resp, reply.code))
    }

    #[allow(clippy::too_many_lines)]
    fn handle(&self, parsed: &ParsedRequest, _negotiated: &Negotiated) -> Result<Reply, ApiError> {
        let inner = &self.inner;

        // Decode the body with the Content-Type decoder when one is present.
        let body: Option<Value> = if parsed.body.is_empty() {
            None
        } else {
            let decoder = negotiate_content_type(parsed.get_header("content-type"))?;
            Some(decoder.decode(&parsed.body).map_err(|e| {
                ApiError::new(format!("undecodable request body: {e}"), 400)
            })?)
        };

        // Long-running task status polling.
        if parsed.method == Method::GET {
            if let Some(rqid) = parsed.raw_path.strip_prefix("/status/") {
                let rqid = rqid.trim_end_matches('/');
                info!(rqid = %rqid, "task status request");
                let (resp, status) = journal::get_status(rqid)
                    .map_err(|e| ApiError::new(format!("status unavailable: {e}"), 500))?;
                return Ok(Reply {
                    status,
                    payload: resp,
                    headers: Vec::new(),
                });
            }
        }

        if let Some(reply) = self.internal_lone(&parsed.raw_path) {
            return Ok(reply);
        }

        let m = inner
            .router
            .route(&parsed.method, &parsed.raw_path)
            .ok_or_else(|| ApiError::new("Not Found", 404))?;
        let op = m.op.clone();
        let identity = inner.auth.identify(&parsed.headers)?;

        // Typed path variables, decoded per simple/exploded style.
        let mut path_obj = Map::new();
        for (name, raw) in &m.path_values {
            let kind = op.param_kind(name).unwrap_or(ParamKind::String);
            let value = decode_path_value(raw, kind).map_err(|_| {
                ApiError::with_context(
                    format!("Invalid path value:{raw} for key:{name}"),
                    400,
                    Some(&op.lone),
                    Some(&op.operation_id),
                    None,
                    None,
                    Some(&identity.user),
                    Some(&identity.host),
                )
            })?;
            path_obj.insert(name.clone(), value);
        }
        let pk = path_obj.get("primary_key").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });

        // Typed query variables, decoded per form style.
        let mut query_obj = Map::new();
        for (name, raw) in &parsed.query {
            let kind = op.param_kind(name).unwrap_or(ParamKind::String);
            let value = decode_query_value(raw, kind).map_err(|_| {
                ApiError::with_context(
                    format!("Invalid query value:{raw} for key:{name}"),
                    400,
                    Some(&op.lone),
                    Some(&op.operation_id),
                    pk.as_deref(),
                    None,
                    Some(&identity.user),
                    Some(&identity.host),
                )
            })?;
            query_obj.insert(name.clone(), value);
        }

        let mut inreq = Map::new();
        if !path_obj.is_empty() {
            inreq.insert("path".to_string(), Value::Object(path_obj.clone()));
        }
        if !query_obj.is_empty() {
            inreq.insert("query".to_string(), Value::Object(query_obj.clone()));
        }
        if let Some(b) = &body {
            inreq.insert("body".to_string(), b.clone());
        }
        let inreq = Value::Object(inreq);

        let cm = parsed.header_nonempty("laf-cm");
        if inner.cm.requires_ticket(&op.lone, &op.operation_id) && cm.is_none() {
            return Err(ApiError::with_context(
                "Please provide a valid change management ticket",
                400,
                Some(&op.lone),
                Some(&op.operation_id),
                pk.as_deref(),
                Some(&inreq),
                Some(&identity.user),
                Some(&identity.host),
            ));
        }

        let key = format!("{}::{}", op.lone, op.operation_id);
        if let Some(validators) = inner.validators.get(&key) {
            if let Some(err) = schema_error(&validators.input, &inreq) {
                return Err(ApiError::with_context(
                    err,
                    400,
                    Some(&op.lone),
                    Some(&op.operation_id),
                    pk.as_deref(),
                    Some(&inreq),
                    Some(&identity.user),
                    Some(&identity.host),
                ));
            }
        }

        // Merge path (minus primary_key), query and body into the handler
        // input.
        let mut obj = Map::new();
        for (k, v) in &path_obj {
            if k != "primary_key" {
                obj.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in &query_obj {
            obj.insert(k.clone(), v.clone());
        }
        if let Some(b) = &body {
            obj.insert("body".to_string(), b.clone());
        }

        let mut req_data = Map::new();
        req_data.insert("lone".to_string(), json!(op.lone));
        req_data.insert("verb".to_string(), json!(op.operation_id.to_lowercase()));
        req_data.insert("pk".to_string(), json!(pk));
        req_data.insert("user".to_string(), json!(identity.user));
        req_data.insert("host".to_string(), json!(identity.host));
        req_data.insert("txid".to_string(), json!(parsed.header_nonempty("laf-tx-id")));
        req_data.insert("role".to_string(), json!(parsed.header_nonempty("laf-role")));
        req_data.insert("obo".to_string(), json!(parsed.header_nonempty("laf-obo")));
        req_data.insert("cm".to_string(), json!(cm));
        req_data.insert("obj".to_string(), Value::Object(obj.clone()));
        if let Some(b) = &body {
            req_data.insert("body".to_string(), b.clone());
        }
        if !path_obj.is_empty() {
            req_data.insert("urlvars".to_string(), Value::Object(path_obj.clone()));
        }
        if !query_obj.is_empty() {
            req_data.insert("queryvars".to_string(), Value::Object(query_obj.clone()));
        }
        let mut final_req = Value::Object(req_data);

        // Optional external validation; the service may augment the request.
        if let Some(sock) = &inner.validation_socket {
            let (validated, status) = services::validate(&final_req, sock);
            if let Some(err) = validated.get("_error") {
                return Err(ApiError::with_context(
                    err.clone(),
                    status.unwrap_or(400),
                    Some(&op.lone),
                    Some(&op.operation_id),
                    pk.as_deref(),
                    Some(&inreq),
                    Some(&identity.user),
                    Some(&identity.host),
                ));
            }
            final_req = validated;
        }
        debug!(final_req = %final_req, "final request");

        let request = Request::new(parts_from_map(&final_req));
        info!(txid = %request.txid, lone = %request.lone, verb = %request.verb, "request validated");

        // Internal lones short-circuit before touching the fabric.
        if INTERNAL_LONES.contains(&request.lone.as_str()) {
            info!(lone = %request.lone, "internal lone");
            return Ok(Reply {
                status: 200,
                payload: Value::Null,
                headers: Vec::new(),
            });
        }

        let auth = match &inner.authorization_socket {
            Some(sock) => Some(services::authorize_request(
                &request,
                &op.major_version,
                sock,
            )?),
            None => None,
        };

        let (mut resp, mut status) = self.dispatch(&request, auth, &op.major_version)?;
        if ![200, 202, 204, 503].contains(&status) {
            return Err(ApiError::with_context(
                resp,
                status,
                Some(&request.lone),
                Some(&request.verb),
                request.pk.as_deref(),
                request.obj.as_ref(),
                Some(&request.user),
                Some(&request.host),
            ));
        }
        if parsed.method == Method::DELETE && status == 200 {
            status = 204;
        }

        // Collection GET: synthesize pagination links.
        let lonepath = format!("/{}", op.lone);
        if parsed.raw_path.trim_end_matches('/') == lonepath
            && parsed.method == Method::GET
            && status != 503
        {
            if resp.get("_elem").is_some() {
                let url = match inner.config.url_prefix() {
                    Some(prefix) => format!("http://{prefix}{lonepath}"),
                    None => {
                        let host = parsed.get_header("host").unwrap_or("localhost");
                        format!("http://{host}{lonepath}")
                    }
                };
                resp = add_pagination_info(&url, &Value::Object(obj), &resp, &request.txid);
            } else {
                return Err(ApiError::with_context(
                    "Response should be dictionary",
                    500,
                    Some(&request.lone),
                    Some(&request.verb),
                    request.pk.as_deref(),
                    request.obj.as_ref(),
                    Some(&request.user),
                    Some(&request.host),
                ));
            }
        }

        // Response validation is best-effort: a mismatch is logged, never
        // fatal.
        if let Some(validators) = inner.validators.get(&key) {
            let wrapped = json!({ status.to_string(): resp });
            if let Some(err) = schema_error(&validators.response, &wrapped) {
                info!(txid = %request.txid, error = %err, "response validation error");
            }
        }

        let mut headers = Vec::new();
        let payload = if status == 202 {
            if let Some(location) = resp.as_str() {
                headers.push(("Location".to_string(), location.to_string()));
            }
            json!({ "status": "Task in progress" })
        } else {
            resp
        };

        info!(txid = %request.txid, status = status, "request finished");
        Ok(Reply {
            status,
            payload,
            headers,
        })
    }
}

/// Rebuild envelope parts from the (possibly augmented) request map.
fn parts_from_map(map: &Value) -> RequestParts {
    let get_str = |key: &str| {
        map.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let get_map = |key: &str| map.get(key).and_then(Value::as_object).cloned();
    RequestParts {
        lone: get_str("lone").unwrap_or_default(),
        verb: get_str("verb").unwrap_or_default(),
        pk: get_str("pk"),
        obj: map.get("obj").filter(|v| !v.is_null()).cloned(),
        body: map.get("body").filter(|v| !v.is_null()).cloned(),
        path: get_str("path"),
        urlvars: get_map("urlvars"),
        queryvars: get_map("queryvars"),
        user: get_str("user"),
        host: get_str("host"),
        obo: get_str("obo"),
        role: get_str("role"),
        cm: get_str("cm"),
        txid: get_str("txid"),
        subhandler: get_str("subhandler"),
        mode: Some(Mode::Server),
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: may_minihttp::Request, res: &mut Response) -> io::Result<()> {
        let start = std::time::Instant::now();
        let parsed = match parse_request(req) {
            Ok(p) => p,
            Err(bad_method) => {
                write_payload(
                    res,
                    400,
                    "application/json",
                    &[],
                    json!({"_error": format!("Invalid HTTP method: {bad_method}")}).to_string(),
                );
                return Ok(());
            }
        };

        // Raw surfaces that bypass the negotiated encoders.
        if parsed.method == Method::GET {
            let trimmed = parsed.raw_path.trim_end_matches('/');
            if let Some(lone) = trimmed
                .strip_prefix('/')
                .and_then(|p| p.strip_suffix("/_docs"))
            {
                if let Some(html) = self.docs_page(lone) {
                    write_payload(res, 200, "text/html", &[], html);
                    return Ok(());
                }
            }
            if let Some(rest) = trimmed.strip_prefix('/') {
                if let Some((lone, file)) = rest.split_once("/_static/") {
                    match self.static_spec(lone, file) {
                        Some(bytes) => {
                            write_payload(
                                res,
                                200,
                                "application/json",
                                &[],
                                String::from_utf8_lossy(&bytes).into_owned(),
                            );
                        }
                        None => {
                            write_payload(
                                res,
                                404,
                                "application/json",
                                &[],
                                json!({"_error": "Spec not found"}).to_string(),
                            );
                        }
                    }
                    return Ok(());
                }
            }
        }

        let negotiated = match negotiate_accept(parsed.get_header("accept"), &parsed.method) {
            Ok(n) => n,
            Err(e) => {
                // No encoder was negotiated; errors fall back to JSON.
                write_payload(
                    res,
                    e.status,
                    "application/json",
                    &[],
                    serde_json::to_string(&e.error_message()).unwrap_or_default(),
                );
                return Ok(());
            }
        };

        match self.handle(&parsed, &negotiated) {
            Ok(reply) => {
                let body = if reply.status == 204 {
                    String::new()
                } else {
                    negotiated.encoder.encode(&reply.payload)
                };
                write_payload(res, reply.status, &negotiated.accept, &reply.headers, body);
            }
            Err(err) => {
                let body = negotiated.encoder.encode(&err.error_message());
                write_payload(res, err.status, &negotiated.accept, &[], body);
            }
        }
        debug!(
            method = %parsed.method,
            path = %parsed.raw_path,
            duration_ms = start.elapsed().as_millis() as u64,
            "request completed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts_from_map() {
        let map = json!({
            "lone": "foo",
            "verb": "update_foo",
            "pk": "abc",
            "user": "alice",
            "host": "edge1",
            "txid": "tx-9",
            "obo": "",
            "obj": {"val": 1},
            "urlvars": {"primary_key": "abc"},
        });
        let parts = parts_from_map(&map);
        assert_eq!(parts.lone, "foo");
        assert_eq!(parts.verb, "update_foo");
        assert_eq!(parts.pk.as_deref(), Some("abc"));
        assert_eq!(parts.txid.as_deref(), Some("tx-9"));
        // Empty strings count as absent.
        assert!(parts.obo.is_none());
        assert!(parts.urlvars.is_some());
        let req = Request::new(parts);
        assert_eq!(req.txid, "tx-9");
        assert_eq!(req.effective_user, "alice");
    }
}
