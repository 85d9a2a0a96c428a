//! The per-invocation request envelope.
//!
//! One envelope is produced per merged input object and travels unchanged
//! from the CLI or gateway through the fabric to the handler. Invariants:
//! `rqid` is fresh per envelope, `txid` defaults to `rqid`, and
//! `effective_user` is the obo target when impersonating, else the caller.

use crate::config::Mode;
use crate::ids::RequestId;
use crate::util::{hostname, username};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields supplied by the caller; everything else is derived.
#[derive(Debug, Clone, Default)]
pub struct RequestParts {
    pub lone: String,
    pub verb: String,
    pub pk: Option<String>,
    pub obj: Option<Value>,
    pub body: Option<Value>,
    pub path: Option<String>,
    pub urlvars: Option<Map<String, Value>>,
    pub queryvars: Option<Map<String, Value>>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub obo: Option<String>,
    pub role: Option<String>,
    pub cm: Option<String>,
    pub txid: Option<String>,
    pub subhandler: Option<String>,
    pub mode: Option<Mode>,
}

/// The request envelope carried through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub lone: String,
    pub verb: String,
    pub pk: Option<String>,
    pub path: Option<String>,
    pub urlvars: Option<Map<String, Value>>,
    pub queryvars: Option<Map<String, Value>>,
    pub body: Option<Value>,
    /// The merged input handed to the handler.
    pub obj: Option<Value>,
    pub user: String,
    pub effective_user: String,
    pub obo: Option<String>,
    pub role: Option<String>,
    pub cm: Option<String>,
    pub host: String,
    pub txid: String,
    pub rqid: String,
    pub subhandler: Option<String>,
    pub mode: Mode,
}

impl Request {
    pub fn new(parts: RequestParts) -> Request {
        let rqid = RequestId::new().to_string();
        let txid = parts.txid.unwrap_or_else(|| rqid.clone());
        let user = parts.user.unwrap_or_else(username);
        let host = parts.host.unwrap_or_else(hostname);
        let effective_user = match &parts.obo {
            Some(obo) if !obo.is_empty() => obo.clone(),
            _ => user.clone(),
        };
        Request {
            lone: parts.lone,
            verb: parts.verb,
            pk: parts.pk,
            path: parts.path,
            urlvars: parts.urlvars,
            queryvars: parts.queryvars,
            body: parts.body,
            obj: parts.obj,
            user,
            effective_user,
            obo: parts.obo,
            role: parts.role,
            cm: parts.cm,
            host,
            txid,
            rqid,
            subhandler: parts.subhandler,
            mode: parts.mode.unwrap_or(Mode::Server),
        }
    }

    /// The merged input as an object map; `None` or non-object inputs give
    /// an empty map.
    pub fn obj_map(&self) -> Map<String, Value> {
        match &self.obj {
            Some(Value::Object(m)) => m.clone(),
            _ => Map::new(),
        }
    }

    /// Input rendered as YAML, for display surfaces.
    pub fn obj_yaml(&self) -> String {
        match &self.obj {
            Some(v) => serde_yaml::to_string(v).unwrap_or_default(),
            None => String::new(),
        }
    }
}
