//! Clients for the external policy services.
//!
//! Authorization and the journal speak HTTP over unix-domain sockets; the
//! validation and notification services speak raw length-prefixed JSON over
//! `SOCK_STREAM`. All of them are collaborators with a narrow interface:
//! this module only shapes requests and replies.

use crate::error::ApiError;
use crate::request::Request;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, info, warn};

/// Minimal HTTP/1.1 client over a unix-domain socket.
///
/// The dependent daemons listen on local sockets, not TCP; one short-lived
/// connection per call with `Connection: close` keeps the protocol trivial.
pub mod unixhttp {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::path::Path;
    use std::time::Duration;

    use serde_json::Value;

    const IO_TIMEOUT: Duration = Duration::from_secs(30);

    fn request(
        sock: &Path,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> anyhow::Result<(u16, Value)> {
        let mut stream = UnixStream::connect(sock)
            .map_err(|e| anyhow::anyhow!("cannot connect to {}: {e}", sock.display()))?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;

        let payload = body.map(serde_json::to_vec).transpose()?.unwrap_or_default();
        let mut head = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nAccept: application/json\r\nConnection: close\r\n"
        );
        if body.is_some() {
            head.push_str("Content-Type: application/json\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", payload.len()));
        stream.write_all(head.as_bytes())?;
        stream.write_all(&payload)?;
        stream.flush()?;

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw)?;
        parse_response(&raw)
    }

    fn parse_response(raw: &[u8]) -> anyhow::Result<(u16, Value)> {
        let header_end = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or_else(|| anyhow::anyhow!("malformed HTTP response"))?;
        let head = std::str::from_utf8(&raw[..header_end])?;
        let status_line = head
            .lines()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty HTTP response"))?;
        let status: u16 = status_line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| anyhow::anyhow!("malformed status line: {status_line}"))?
            .parse()?;

        let mut body = &raw[header_end + 4..];
        // Honor Content-Length when present; daemons close the connection
        // anyway, so the remainder is the body otherwise.
        for line in head.lines().skip(1) {
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    if let Ok(len) = value.trim().parse::<usize>() {
                        body = &body[..len.min(body.len())];
                    }
                }
            }
        }
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(body).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(body).into_owned())
            })
        };
        Ok((status, value))
    }

    pub fn post_json(sock: &Path, path: &str, body: &Value) -> anyhow::Result<(u16, Value)> {
        request(sock, "POST", path, Some(body))
    }

    pub fn get_json(sock: &Path, path: &str) -> anyhow::Result<(u16, Value)> {
        request(sock, "GET", path, None)
    }

}

fn auth_request_body(req: &Request, version: &str) -> Value {
    json!({
        "req": {
            "lone": req.lone,
            "verb": req.verb,
            "pk": req.pk,
            "user": auth_user(req),
            "host": req.host,
            "txid": req.txid,
            "role": req.role,
            "obo": req.obo,
            "cm": req.cm,
            "obj": req.obj,
            "urlvars": req.urlvars,
            "queryvars": req.queryvars,
            "body": req.body,
        },
        "version": version,
    })
}

fn auth_user(req: &Request) -> &str {
    req.user.split('@').next().unwrap_or(&req.user)
}

fn auth_call(req: &Request, version: &str, sock: &Path, prefix: &str) -> Result<Value, ApiError> {
    let url_path = format!("{prefix}/{}/{}/{}", auth_user(req), req.lone, req.verb);
    info!(txid = %req.txid, path = %url_path, "authorization call");
    let (status, response) = unixhttp::post_json(sock, &url_path, &auth_request_body(req, version))
        .map_err(|e| {
            ApiError::with_context(
                format!("authorization service unreachable: {e}"),
                500,
                Some(&req.lone),
                Some(&req.verb),
                req.pk.as_deref(),
                req.obj.as_ref(),
                Some(&req.user),
                Some(&req.host),
            )
        })?;
    if status != 200 {
        let message = response
            .get("message")
            .cloned()
            .unwrap_or_else(|| response.clone());
        return Err(ApiError::with_context(
            message,
            status,
            Some(&req.lone),
            Some(&req.verb),
            req.pk.as_deref(),
            req.obj.as_ref(),
            Some(&req.user),
            Some(&req.host),
        ));
    }
    Ok(response)
}

/// Ask the authorization service about this caller.
pub fn authorize(req: &Request, version: &str, sock: &Path) -> Result<Value, ApiError> {
    auth_call(req, version, sock, "")
}

/// On-behalf-of authorization; only called when `obo` is set.
pub fn obo_authorize(req: &Request, version: &str, sock: &Path) -> Result<Value, ApiError> {
    auth_call(req, version, sock, "/obo")
}

/// Run the full authorization step for one request.
///
/// A not-authorized verdict surfaces as a 500 carrying the service payload.
pub fn authorize_request(req: &Request, version: &str, sock: &Path) -> Result<Value, ApiError> {
    let mut result = serde_json::Map::new();
    if req.obo.is_some() {
        let obo_result = obo_authorize(req, version, sock)?;
        result.insert("oboauth".to_string(), obo_result);
    }
    let auth = authorize(req, version, sock)?;
    debug!(txid = %req.txid, auth = ?auth, "auth result");
    let authorized = auth
        .get("authorized")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !authorized {
        info!(txid = %req.txid, "request not authorized");
        return Err(ApiError::with_context(
            auth.to_string(),
            500,
            Some(&req.lone),
            Some(&req.verb),
            req.pk.as_deref(),
            req.obj.as_ref(),
            Some(&req.user),
            Some(&req.host),
        ));
    }
    info!(txid = %req.txid, "request authorized");
    result.insert("auth".to_string(), auth);
    Ok(Value::Object(result))
}

/// Send the request to the validation microservice.
///
/// Length-prefixed JSON both ways. The reply is either the augmented
/// request object or `{_error: ...}`; a connect failure yields
/// `({_error: "Internal server error"}, Some(500))`.
pub fn validate(req: &Value, sock: &Path) -> (Value, Option<u16>) {
    use std::os::unix::net::UnixStream;

    let mut stream = match UnixStream::connect(sock) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "validation service unreachable");
            return (json!({"_error": "Internal server error"}), Some(500));
        }
    };
    let result = crate::framing::write_json_frame(&mut stream, req)
        .and_then(|()| crate::framing::read_json_frame::<_, Value>(&mut stream));
    match result {
        Ok(Some(reply)) => (reply, None),
        Ok(None) => (json!({"_error": "Internal server error"}), Some(500)),
        Err(e) => {
            warn!(error = %e, "validation service failed");
            (json!({"_error": "Internal server error"}), Some(500))
        }
    }
}

/// Publish a progress message; topic is the transaction id. Best-effort and
/// silent on failure.
pub fn publish(txid: &str, message: &Value) {
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    let Ok(sock) = std::env::var("NOTIFICATION_SOCK") else {
        return;
    };
    let body = serde_json::to_string(message).unwrap_or_default();
    let msg = format!("{txid}{body}");
    let Ok(mut stream) = UnixStream::connect(&sock) else {
        return;
    };
    let framed_len = (msg.len() as u32).to_be_bytes();
    let _ = stream
        .write_all(&framed_len)
        .and_then(|()| stream.write_all(msg.as_bytes()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestParts;

    #[test]
    fn test_auth_user_strips_realm() {
        let req = Request::new(RequestParts {
            lone: "foo".to_string(),
            verb: "get".to_string(),
            user: Some("alice@REALM".to_string()),
            ..RequestParts::default()
        });
        assert_eq!(auth_user(&req), "alice");
    }

    #[test]
    fn test_auth_request_body_shape() {
        let req = Request::new(RequestParts {
            lone: "foo".to_string(),
            verb: "update".to_string(),
            pk: Some("abc".to_string()),
            user: Some("alice".to_string()),
            ..RequestParts::default()
        });
        let body = auth_request_body(&req, "v3");
        assert_eq!(body["version"], "v3");
        assert_eq!(body["req"]["lone"], "foo");
        assert_eq!(body["req"]["pk"], "abc");
        assert_eq!(body["req"]["user"], "alice");
    }

    #[test]
    fn test_validate_unreachable_socket() {
        let (reply, status) = validate(
            &json!({"lone": "foo"}),
            Path::new("/nonexistent/validation.sock"),
        );
        assert_eq!(reply, json!({"_error": "Internal server error"}));
        assert_eq!(status, Some(500));
    }
}
