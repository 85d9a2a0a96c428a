//! Media type negotiation and payload encoding.
//!
//! The gateway speaks `application/yaml`, `application/json` and the
//! versioned vendor form `application/vnd.<family>.<lone>.v<x>.<y>.<z>+{yaml|json}`.
//! The `Accept` header picks the encoder; `Content-Type` picks the decoder
//! when a body is present.

use crate::error::ApiError;
use http::Method;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static MIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^application/(.+)\+(yaml|json)$").expect("mime regex must compile")
});

pub const DEFAULT_MIME_TYPES: [&str; 2] = ["application/yaml", "application/json"];

/// Concrete wire encoding derived from a media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Json,
    Yaml,
}

impl MediaType {
    /// Map a media type string to an encoding, accepting the vendor form.
    pub fn from_mime(mime: &str) -> Option<MediaType> {
        match mime {
            "application/json" => Some(MediaType::Json),
            "application/yaml" => Some(MediaType::Yaml),
            other => MIME_RE.captures(other).and_then(|caps| {
                match caps.get(2).map(|m| m.as_str()) {
                    Some("json") => Some(MediaType::Json),
                    Some("yaml") => Some(MediaType::Yaml),
                    _ => None,
                }
            }),
        }
    }

    pub fn encode(&self, value: &Value) -> String {
        match self {
            MediaType::Json => serde_json::to_string(value).unwrap_or_default(),
            MediaType::Yaml => serde_yaml::to_string(value).unwrap_or_default(),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> anyhow::Result<Value> {
        match self {
            MediaType::Json => Ok(serde_json::from_slice(bytes)?),
            MediaType::Yaml => Ok(serde_yaml::from_slice(bytes)?),
        }
    }
}

/// Result of `Accept` negotiation: the encoder plus the literal accept
/// string to echo back in `Content-Type`.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub encoder: MediaType,
    pub accept: String,
}

/// Negotiate the response encoding from the `Accept` header.
///
/// `*/*` (or a missing header) defaults to YAML for `GET`/`OPTIONS`;
/// anything else unrecognized is a 406.
pub fn negotiate_accept(accept: Option<&str>, method: &Method) -> Result<Negotiated, ApiError> {
    let accept = accept.unwrap_or("*/*");
    if let Some(encoder) = MediaType::from_mime(accept) {
        return Ok(Negotiated {
            encoder,
            accept: accept.to_string(),
        });
    }
    if accept.contains("*/*") && (method == Method::GET || method == Method::OPTIONS) {
        return Ok(Negotiated {
            encoder: MediaType::Yaml,
            accept: "application/yaml".to_string(),
        });
    }
    Err(ApiError::new("Oops. Unrecognizable Accept MIME", 406))
}

/// Negotiate the request decoder from `Content-Type`; only consulted when a
/// body is present. Unrecognized types are a 415.
pub fn negotiate_content_type(content_type: Option<&str>) -> Result<MediaType, ApiError> {
    content_type
        .and_then(MediaType::from_mime)
        .ok_or_else(|| ApiError::new("Oops. Unrecognizable Content-Type MIME", 415))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_mimes() {
        assert_eq!(
            MediaType::from_mime("application/json"),
            Some(MediaType::Json)
        );
        assert_eq!(
            MediaType::from_mime("application/yaml"),
            Some(MediaType::Yaml)
        );
        assert_eq!(MediaType::from_mime("text/html"), None);
    }

    #[test]
    fn test_vendor_mimes() {
        assert_eq!(
            MediaType::from_mime("application/vnd.acme_infra.foo.v3.0.1+json"),
            Some(MediaType::Json)
        );
        assert_eq!(
            MediaType::from_mime("application/vnd.acme_infra.foo.v3.0.1+yaml"),
            Some(MediaType::Yaml)
        );
    }

    #[test]
    fn test_wildcard_accept_defaults_to_yaml_for_get() {
        let neg = negotiate_accept(Some("*/*"), &Method::GET).unwrap();
        assert_eq!(neg.encoder, MediaType::Yaml);
        assert_eq!(neg.accept, "application/yaml");
    }

    #[test]
    fn test_wildcard_accept_rejected_for_post() {
        let err = negotiate_accept(Some("*/*"), &Method::POST).unwrap_err();
        assert_eq!(err.status, 406);
    }

    #[test]
    fn test_unknown_content_type_is_415() {
        let err = negotiate_content_type(Some("text/plain")).unwrap_err();
        assert_eq!(err.status, 415);
    }

    #[test]
    fn test_encode_decode() {
        let v = json!({"a": 1});
        let enc = MediaType::Json.encode(&v);
        assert_eq!(MediaType::Json.decode(enc.as_bytes()).unwrap(), v);
        let enc = MediaType::Yaml.encode(&v);
        assert_eq!(MediaType::Yaml.decode(enc.as_bytes()).unwrap(), v);
    }
}
