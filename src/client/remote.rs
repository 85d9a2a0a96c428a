//! Dispatching of lone operations to a remote gateway.
//!
//! Each envelope becomes one HTTP call. Collection GETs stream pages to
//! stdout following `_links._next`; a 202 acceptance turns into a poll loop
//! against the status endpoint. SIGINT/SIGTERM set a shared cancellation
//! flag checked at every suspension point.

use super::{get_http_method, HTTP_VERBS};
use crate::cli::FrameworkOptions;
use crate::config::FamilyConfig;
use crate::request::Request;
use crate::spec::{encode_query_value, LoneSpec};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause between long-running status polls.
const LR_REQ_PAUSE: Duration = Duration::from_secs(5);

/// Client-side authentication, selected by the `defaultauth` file under
/// `LAF_CONFIG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAuth {
    None,
    /// Kerberos with a principal and mutual-authentication level. Kept as
    /// configuration data; the transport itself degrades to
    /// unauthenticated with a warning.
    Kerberos {
        principal: Option<String>,
        mutual_authentication: Option<i64>,
    },
}

impl ClientAuth {
    /// Read the auth mechanism from `$LAF_CONFIG/defaultauth`.
    pub fn from_env() -> ClientAuth {
        let Ok(config_dir) = std::env::var("LAF_CONFIG") else {
            return ClientAuth::None;
        };
        let path = std::path::Path::new(&config_dir).join("defaultauth");
        let Ok(content) = std::fs::read_to_string(&path) else {
            return ClientAuth::None;
        };
        parse_defaultauth(&content)
    }

    fn apply(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        if let ClientAuth::Kerberos { principal, .. } = self {
            warn!(
                principal = ?principal,
                "kerberos client auth configured but not supported, continuing unauthenticated"
            );
        }
        builder
    }
}

/// Minimal INI reader for the `defaultauth` file:
/// `[auth_mechanism]` naming the mechanism, `[auth_args]` with its settings.
fn parse_defaultauth(content: &str) -> ClientAuth {
    let mut section = String::new();
    let mut mechanism_kerberos = false;
    let mut principal = None;
    let mut mutual = None;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = name.to_string();
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (line, ""),
        };
        match (section.as_str(), key) {
            ("auth_mechanism", "kerberos") => mechanism_kerberos = true,
            ("auth_args", "principal") => principal = Some(value.to_string()),
            ("auth_args", "mutual_authentication") => mutual = value.parse().ok(),
            _ => {}
        }
    }
    if mechanism_kerberos {
        ClientAuth::Kerberos {
            principal,
            mutual_authentication: mutual,
        }
    } else {
        ClientAuth::None
    }
}

/// Resolve the gateway address: `--servers http:<addr>` wins over the
/// deployment's `url_prefix`.
pub fn get_url_prefix(
    config: &FamilyConfig,
    _options: &FrameworkOptions,
) -> anyhow::Result<String> {
    if let Some(servers) = &config.servers {
        let addrs = servers
            .get("http")
            .ok_or_else(|| anyhow::anyhow!("no http server specified on the command line"))?;
        return addrs
            .first()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("empty http server list"));
    }
    config
        .url_prefix()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("no url_prefix configured for this deployment"))
}

/// Build the request URL.
///
/// Sub-path pieces that are not schema names are percent-quoted and joined
/// with a literal `%2f` onto the preceding key segment; custom verbs append
/// `:<verb>`. When a sub path is present the body replaces the merged
/// object as the payload.
pub fn generate_url(urlprefix: &str, req: &mut Request, schema_names: &[String]) -> String {
    let mut url = format!("http://{}/{}", urlprefix, req.lone);
    if let Some(pk) = &req.pk {
        url.push('/');
        url.push_str(&urlencoding::encode(pk));
    }
    if !HTTP_VERBS.contains(&req.verb.as_str()) {
        url.push(':');
        url.push_str(&req.verb);
    }
    if HTTP_VERBS.contains(&req.verb.as_str()) && req.pk.is_some() {
        if let Some(path) = req.path.clone() {
            url = append_sub_path(url, &path, schema_names);
            req.obj = req.body.clone();
        }
    }
    url
}

fn append_sub_path(mut url: String, path: &str, schema_names: &[String]) -> String {
    let mut in_value = false;
    for piece in path.trim_start_matches('/').split('/') {
        if schema_names.iter().any(|s| s == piece) {
            url.push('/');
            url.push_str(piece);
            in_value = false;
        } else if in_value {
            url.push_str("%2f");
            url.push_str(&urlencoding::encode(piece));
        } else {
            url.push('/');
            url.push_str(&urlencoding::encode(piece));
            in_value = true;
        }
    }
    url
}

/// Serialize the merged object onto a query string, form style, keeping
/// only keys declared as shared parameters in the lone's spec.
pub fn query_string_for(obj: &Value, parameter_names: &[String]) -> Option<String> {
    let map = obj.as_object()?;
    let parts: Vec<String> = map
        .iter()
        .filter(|(k, _)| parameter_names.iter().any(|p| p == *k))
        .filter_map(|(k, v)| encode_query_value(k, v))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("&"))
    }
}

/// Ask the gateway for a long-running request's status.
pub fn get_request_status(
    rqid: &str,
    hostport: &str,
    auth: &ClientAuth,
    client: &reqwest::blocking::Client,
) -> Value {
    let url = format!("http://{hostport}/status/{rqid}");
    let builder = client.get(&url).header("Accept", "application/json");
    let response = match auth.apply(builder).send() {
        Ok(r) => r,
        Err(e) => return json!({"_error": format!("HTTP Error {e}")}),
    };
    let status = response.status().as_u16();
    if status == 102 {
        return Value::String("Task in Progress".to_string());
    }
    if status == 404 {
        return json!({"_error": "Task not found"});
    }
    response
        .json()
        .unwrap_or_else(|_| json!({"_error": format!("HTTP Error {status}")}))
}

/// Run every envelope of one invocation against the gateway.
pub fn remote_handler(
    requests: Vec<Request>,
    config: &FamilyConfig,
    options: &FrameworkOptions,
    spec: Option<&LoneSpec>,
) -> Vec<Option<Value>> {
    requests
        .into_iter()
        .map(|req| run_handler(req, config, options, spec))
        .collect()
}

fn build_headers(req: &Request, accept: &str, has_body: bool) -> Vec<(&'static str, String)> {
    let mut headers = vec![("Accept", accept.to_string())];
    if has_body {
        headers.push(("Content-Type", accept.to_string()));
    }
    headers.push(("LAF-TX-ID", req.txid.clone()));
    if let Some(role) = &req.role {
        headers.push(("LAF-ROLE", role.clone()));
    }
    if let Some(cm) = &req.cm {
        headers.push(("LAF-CM", cm.clone()));
    }
    if let Some(obo) = &req.obo {
        headers.push(("LAF-OBO", obo.clone()));
    }
    headers
}

/// One envelope, one cooperative scheduler: the HTTP call, the poll loop
/// and the notification subscriber all watch the same cancellation flag.
fn run_handler(
    mut req: Request,
    config: &FamilyConfig,
    options: &FrameworkOptions,
    spec: Option<&LoneSpec>,
) -> Option<Value> {
    // Outbound calls go straight at the gateway.
    std::env::remove_var("http_proxy");
    std::env::remove_var("https_proxy");

    let urlprefix = match get_url_prefix(config, options) {
        Ok(p) => p,
        Err(e) => return Some(json!({"_error": e.to_string()})),
    };
    let auth = ClientAuth::from_env();
    let client = match reqwest::blocking::Client::builder().no_proxy().build() {
        Ok(c) => c,
        Err(e) => return Some(json!({"_error": format!("HTTP Error {e}")})),
    };

    if let Some(rqid) = &options.status {
        return Some(get_request_status(rqid, &urlprefix, &auth, &client));
    }

    let cancel = Arc::new(AtomicBool::new(false));
    #[cfg(unix)]
    {
        let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, cancel.clone());
        let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, cancel.clone());
    }

    if let Some(notification) = config.notification() {
        spawn_notification_subscriber(notification, &req.txid, cancel.clone());
    }

    let accept = spec
        .map(|s| s.vendor_mime(&config.family, "json"))
        .unwrap_or_else(|| "application/json".to_string());
    let method = get_http_method(req.pk.as_deref(), &req.verb);
    let schema_names: Vec<String> = spec.map(|s| s.schema_names.clone()).unwrap_or_default();
    let parameter_names: Vec<String> = spec.map(|s| s.parameter_names.clone()).unwrap_or_default();
    let url = generate_url(&urlprefix, &mut req, &schema_names);

    if method == "get" && req.pk.is_none() {
        paginated_get(&req, &url, &accept, &auth, &client, &parameter_names, &cancel)
    } else {
        single_call(&req, &url, method, &accept, &auth, &client, &urlprefix, &cancel)
    }
}

/// Collection GET: stream every page's `_elem` to stdout and return the
/// final page.
#[allow(clippy::too_many_arguments)]
fn paginated_get(
    req: &Request,
    url: &str,
    accept: &str,
    auth: &ClientAuth,
    client: &reqwest::blocking::Client,
    parameter_names: &[String],
    cancel: &AtomicBool,
) -> Option<Value> {
    let query = req
        .obj
        .as_ref()
        .and_then(|obj| query_string_for(obj, parameter_names));
    let mut url = match &query {
        Some(q) => format!("{url}?{q}"),
        None => url.to_string(),
    };
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Some(json!({"_error": "Interrupted"}));
        }
        println!("URL is {url}");
        let mut builder = client.get(&url);
        for (name, value) in build_headers(req, accept, false) {
            builder = builder.header(name, value);
        }
        let response = match auth.apply(builder).send() {
            Ok(r) => r,
            Err(e) => return Some(json!({"_error": format!("HTTP Error {e}")})),
        };
        let status = response.status().as_u16();
        let resp: Value = match response.json() {
            Ok(v) => v,
            Err(_) => return Some(json!({"_error": format!("HTTP Error {status}")})),
        };
        let Some(elem) = resp.get("_elem") else {
            return Some(resp);
        };
        match resp.pointer("/_links/_next/href").and_then(Value::as_str) {
            Some(next) => {
                print!("{}", serde_yaml::to_string(elem).unwrap_or_default());
                url = match &query {
                    Some(q) => format!("{next}&{q}"),
                    None => next.to_string(),
                };
            }
            None => return Some(elem.clone()),
        }
    }
}

/// A single call: send the payload, then handle 202 acceptance with the
/// status poll loop.
#[allow(clippy::too_many_arguments)]
fn single_call(
    req: &Request,
    url: &str,
    method: &str,
    accept: &str,
    auth: &ClientAuth,
    client: &reqwest::blocking::Client,
    hostport: &str,
    cancel: &AtomicBool,
) -> Option<Value> {
    println!("URL is {url}");
    let http_method: reqwest::Method = method
        .to_uppercase()
        .parse()
        .unwrap_or(reqwest::Method::POST);
    let mut builder = client.request(http_method, url);
    for (name, value) in build_headers(req, accept, req.obj.is_some()) {
        builder = builder.header(name, value);
    }
    if let Some(obj) = &req.obj {
        builder = builder.body(serde_json::to_vec(obj).unwrap_or_default());
    }
    let response = match auth.apply(builder).send() {
        Ok(r) => r,
        Err(e) => return Some(json!({"_error": format!("HTTP Error {e}")})),
    };

    let status = response.status().as_u16();
    if status == 202 {
        let location = response
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let poll_url = if location.starts_with("http") {
            location
        } else {
            format!("http://{hostport}{location}")
        };
        info!(url = %poll_url, "request accepted, polling");
        return poll_until_done(&poll_url, auth, client, cancel);
    }
    if status == 204 {
        return None;
    }
    let resp: Value = response
        .json()
        .unwrap_or_else(|_| json!({"_error": format!("HTTP Error {status}")}));
    Some(resp)
}

fn poll_until_done(
    url: &str,
    auth: &ClientAuth,
    client: &reqwest::blocking::Client,
    cancel: &AtomicBool,
) -> Option<Value> {
    loop {
        // Sleep in short slices so a signal interrupts the wait promptly.
        let waited = std::time::Instant::now();
        while waited.elapsed() < LR_REQ_PAUSE {
            if cancel.load(Ordering::Relaxed) {
                return Some(json!({"_error": "Interrupted"}));
            }
            std::thread::sleep(Duration::from_millis(250));
        }
        let builder = client.get(url).header("Accept", "application/json");
        let response = match auth.apply(builder).send() {
            Ok(r) => r,
            Err(e) => return Some(json!({"_error": format!("HTTP Error {e}")})),
        };
        let status = response.status().as_u16();
        if status == 102 {
            debug!(url = %url, "task still in progress");
            continue;
        }
        if status == 200 {
            let resp: Value = match response.json() {
                Ok(v) => v,
                Err(_) => return Some(json!({"_error": format!("HTTP Error {status}")})),
            };
            return Some(resp.get("payload").cloned().unwrap_or(resp));
        }
        if status == 204 {
            return None;
        }
        let resp: Value = response
            .json()
            .unwrap_or_else(|_| json!({"_error": format!("HTTP Error {status}")}));
        return Some(resp);
    }
}

/// Print progress frames for our transaction as they arrive. The
/// notification stream carries length-prefixed `topic + JSON` frames,
/// topic being the transaction id.
fn spawn_notification_subscriber(notification: &str, txid: &str, cancel: Arc<AtomicBool>) {
    let Some((kind, addr)) = notification.split_once("://") else {
        warn!(notification = %notification, "unparseable notification endpoint");
        return;
    };
    if kind != "unix" {
        warn!(kind = %kind, "unknown notification mechanism");
        return;
    }
    let addr = addr.to_string();
    let txid = txid.to_string();
    std::thread::spawn(move || {
        use std::os::unix::net::UnixStream;
        let Ok(mut stream) = UnixStream::connect(&addr) else {
            debug!(addr = %addr, "notification socket unreachable");
            return;
        };
        let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));
        loop {
            if cancel.load(Ordering::Relaxed) {
                return;
            }
            match crate::framing::read_frame(&mut stream) {
                Ok(Some(frame)) => {
                    let text = String::from_utf8_lossy(&frame);
                    if let Some(body) = text.strip_prefix(txid.as_str()) {
                        println!("[status] {body}");
                    }
                }
                Ok(None) => return,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(_) => return,
            }
        }
    });
}
