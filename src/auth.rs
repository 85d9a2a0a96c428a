//! Gateway authentication plugins: the "who is the caller?" hook.
//!
//! The framework never authenticates by itself; a named plugin inspects the
//! inbound request and reports the caller's identity. `noauth` is the
//! vanilla plugin reporting the process owner.

use crate::error::ApiError;
use crate::util::{hostname, username};
use serde_json::Value;
use std::sync::Arc;

/// The identity a plugin vouches for.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: String,
    pub host: String,
}

pub trait AuthPlugin: Send + Sync {
    /// Identify the caller from the request headers, or reject the request.
    fn identify(&self, headers: &[(String, String)]) -> Result<Identity, ApiError>;
}

/// No authentication: the invoking user and local host.
pub struct NoAuth;

impl AuthPlugin for NoAuth {
    fn identify(&self, _headers: &[(String, String)]) -> Result<Identity, ApiError> {
        Ok(Identity {
            user: username(),
            host: hostname(),
        })
    }
}

/// Trusted-header plugin: a fronting proxy asserts the identity via
/// `X-Remote-User` (and optionally `X-Remote-Host`).
pub struct HeaderAuth {
    user_header: String,
    host_header: String,
}

impl HeaderAuth {
    pub fn new(data: Option<&Value>) -> HeaderAuth {
        let get = |key: &str, default: &str| -> String {
            data.and_then(|d| d.get(key))
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_ascii_lowercase()
        };
        HeaderAuth {
            user_header: get("user_header", "x-remote-user"),
            host_header: get("host_header", "x-remote-host"),
        }
    }
}

impl AuthPlugin for HeaderAuth {
    fn identify(&self, headers: &[(String, String)]) -> Result<Identity, ApiError> {
        let find = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };
        let user = find(&self.user_header)
            .ok_or_else(|| ApiError::new("Missing authentication header", 401))?;
        let host = find(&self.host_header).unwrap_or_else(hostname);
        Ok(Identity { user, host })
    }
}

/// Resolve a plugin by mechanism name.
pub fn get_authentication_plugin(
    mechanism: &str,
    data: Option<&Value>,
) -> anyhow::Result<Arc<dyn AuthPlugin>> {
    match mechanism {
        "noauth" => Ok(Arc::new(NoAuth)),
        "header" => Ok(Arc::new(HeaderAuth::new(data))),
        other => anyhow::bail!("Unknown authentication plugin '{other}'"),
    }
}
