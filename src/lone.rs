//! Resource handler ("lone") registration.
//!
//! A lone is a named resource with a table of handlers keyed by operation
//! name. Custom verbs and `_<subhandler>` suffixed entries are plain table
//! entries. Long-running and journaled markers are registration flags.

use crate::config::FamilyConfig;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Handler result: a successful payload (or nothing), or a domain error
/// carrying its own payload and status.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(Option<Value>),
    Domain(Value, u16),
}

impl Outcome {
    pub fn ok(value: Value) -> Outcome {
        Outcome::Success(Some(value))
    }

    pub fn none() -> Outcome {
        Outcome::Success(None)
    }

    pub fn domain(payload: impl Into<Value>, status: u16) -> Outcome {
        Outcome::Domain(payload.into(), status)
    }
}

/// The handler invocation contract: primary key plus the merged input.
pub type HandlerFn = Arc<dyn Fn(Option<&str>, &Map<String, Value>) -> Outcome + Send + Sync>;

#[derive(Clone)]
pub struct HandlerEntry {
    pub func: HandlerFn,
    /// Replies 202 immediately in server mode; the caller polls the status
    /// endpoint.
    pub long_running: bool,
    /// Forces journaling even when the verb stem alone would not.
    pub journaled: bool,
}

/// A lone: the registration table plus its documentation string.
#[derive(Clone, Default)]
pub struct Lone {
    name: String,
    doc: String,
    handlers: HashMap<String, HandlerEntry>,
}

impl Lone {
    pub fn new(name: impl Into<String>) -> Lone {
        Lone {
            name: name.into(),
            doc: String::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Lone {
        self.doc = doc.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.doc
    }

    /// Register a plain handler under a verb or operation id.
    pub fn register<F>(&mut self, verb: impl Into<String>, func: F)
    where
        F: Fn(Option<&str>, &Map<String, Value>) -> Outcome + Send + Sync + 'static,
    {
        self.handlers.insert(
            verb.into(),
            HandlerEntry {
                func: Arc::new(func),
                long_running: false,
                journaled: false,
            },
        );
    }

    /// Register a long-running handler.
    pub fn register_long_running<F>(&mut self, verb: impl Into<String>, func: F)
    where
        F: Fn(Option<&str>, &Map<String, Value>) -> Outcome + Send + Sync + 'static,
    {
        self.handlers.insert(
            verb.into(),
            HandlerEntry {
                func: Arc::new(func),
                long_running: true,
                journaled: false,
            },
        );
    }

    /// Register a handler whose steps are always journaled.
    pub fn register_journaled<F>(&mut self, verb: impl Into<String>, func: F)
    where
        F: Fn(Option<&str>, &Map<String, Value>) -> Outcome + Send + Sync + 'static,
    {
        self.handlers.insert(
            verb.into(),
            HandlerEntry {
                func: Arc::new(func),
                long_running: false,
                journaled: true,
            },
        );
    }

    pub fn handler(&self, verb: &str) -> Option<&HandlerEntry> {
        self.handlers.get(verb)
    }

    pub fn verbs(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for Lone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lone")
            .field("name", &self.name)
            .field("verbs", &self.verbs())
            .finish()
    }
}

/// Builder the worker calls to produce the lones it serves; user binaries
/// supply their own.
pub type LoneBuilder = dyn Fn(&FamilyConfig) -> anyhow::Result<Vec<Lone>> + Send + Sync;

/// An echoing lone for every verb; the default worker serves these so a
/// deployment can be exercised before real handlers exist.
pub fn echo_lone(name: &str) -> Lone {
    let mut lone = Lone::new(name).with_doc(format!(
        "{name}: echo lone; every verb reflects its input back"
    ));
    for verb in ["get", "create", "update", "delete"] {
        lone.register(verb, move |pk: Option<&str>, obj: &Map<String, Value>| {
            Outcome::ok(serde_json::json!({
                "pk": pk,
                "input": obj,
            }))
        });
    }
    lone
}
