//! Error taxonomy and the `_error` reply envelope.
//!
//! Every failure that reaches a surface (CLI stdout or HTTP response) is
//! shaped into the same envelope:
//!
//! ```yaml
//! _error:
//!   why:   <message or object>
//!   who:   <user>
//!   where: <deployment/family/lone>
//!   when:  <YYYY-MM-DD HH:MM:SS GMT>
//!   verb:  <verb>
//!   pk:    <primary key or null>
//!   in:    <input object>
//!   from:  <host>
//! ```

use crate::util::gmt_time;
use serde_json::{json, Value};

/// Application-level error carried through the request pipeline.
///
/// Holds the reply payload, the HTTP status, and as much request context as
/// the failing layer had at hand. The gateway serializes it through the
/// negotiated encoder; the CLI prints it as YAML and exits 0.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub message: Value,
    pub status: u16,
    pub lone: Option<String>,
    pub verb: Option<String>,
    pub pk: Option<String>,
    pub obj: Option<Value>,
    pub user: Option<String>,
    pub host: Option<String>,
}

impl ApiError {
    pub fn new(message: impl Into<Value>, status: u16) -> Self {
        ApiError {
            message: message.into(),
            status,
            lone: None,
            verb: None,
            pk: None,
            obj: None,
            user: None,
            host: None,
        }
    }

    /// Attach request context for the envelope.
    #[allow(clippy::too_many_arguments)]
    pub fn with_context(
        message: impl Into<Value>,
        status: u16,
        lone: Option<&str>,
        verb: Option<&str>,
        pk: Option<&str>,
        obj: Option<&Value>,
        user: Option<&str>,
        host: Option<&str>,
    ) -> Self {
        ApiError {
            message: message.into(),
            status,
            lone: lone.map(str::to_string),
            verb: verb.map(str::to_string),
            pk: pk.map(str::to_string),
            obj: obj.cloned(),
            user: user.map(str::to_string),
            host: host.map(str::to_string),
        }
    }

    /// Render the `_error` envelope. Without verb context the message is
    /// wrapped bare: `{_error: <message>}`.
    pub fn error_message(&self) -> Value {
        match &self.verb {
            Some(verb) => gen_error(
                self.message.clone(),
                self.lone.as_deref().unwrap_or(""),
                Some(verb),
                self.pk.as_deref(),
                self.obj.as_ref(),
                self.user.as_deref(),
                self.host.as_deref(),
            ),
            None => json!({ "_error": self.message }),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "api error ({}): {}", self.status, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Build the `_error` reporting envelope.
pub fn gen_error(
    why: Value,
    where_: &str,
    verb: Option<&str>,
    pk: Option<&str>,
    obj: Option<&Value>,
    user: Option<&str>,
    host: Option<&str>,
) -> Value {
    json!({
        "_error": {
            "why": why,
            "who": user,
            "where": where_,
            "when": gmt_time(),
            "verb": verb,
            "pk": pk,
            "in": obj,
            "from": host,
        }
    })
}

/// `where` component for a lone running under a family config:
/// `deployment/family/lone`.
pub fn where_of(deployment: &str, family: &str, lone: &str) -> String {
    format!("{deployment}/{family}/{lone}")
}

/// Reply payload the broker synthesizes when no worker is idle.
pub fn busy_reply() -> Value {
    json!({ "status": "Try again server busy" })
}

/// Reply payload the broker synthesizes when a worker dies mid-request.
pub fn worker_died_reply() -> Value {
    json!({ "status": "internal server error" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let err = ApiError::with_context(
            "boom",
            400,
            Some("foo"),
            Some("create"),
            Some("abc"),
            Some(&json!({"val": 1})),
            Some("alice"),
            Some("host1"),
        );
        let env = err.error_message();
        let inner = env.get("_error").unwrap();
        assert_eq!(inner["why"], "boom");
        assert_eq!(inner["who"], "alice");
        assert_eq!(inner["verb"], "create");
        assert_eq!(inner["pk"], "abc");
        assert_eq!(inner["in"], json!({"val": 1}));
        assert_eq!(inner["from"], "host1");
        assert!(inner["when"].as_str().unwrap().ends_with("GMT"));
    }

    #[test]
    fn test_bare_envelope_without_verb() {
        let err = ApiError::new("nope", 406);
        assert_eq!(err.error_message(), json!({"_error": "nope"}));
    }

    #[test]
    fn test_where_of() {
        assert_eq!(where_of("prod", "acme/infra", "foo"), "prod/acme/infra/foo");
    }
}
