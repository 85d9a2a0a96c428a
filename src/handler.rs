//! The per-request state machine.
//!
//! ```text
//! begin → auth (when an auth result rides along)
//!       → authobo (when obo is set)
//!       → invoke handler
//!         ├─ success  → commit → reply (200/204)
//!         ├─ domain   → abort  → reply (handler status)
//!         └─ internal → abort  → reply (500)
//! ```
//!
//! Each transition writes a journal entry when journaling applies to the
//! request.

use crate::config::{FamilyConfig, Mode};
use crate::journal::{self, Step};
use crate::lone::{HandlerEntry, Lone, Outcome};
use crate::request::Request;
use serde_json::Value;
use tracing::{debug, error, info};

/// Verb stems that imply journaling regardless of handler flags.
const CORE_JOURNAL_VERBS: [&str; 7] = [
    "insert", "create", "delete", "update", "remove", "put", "post",
];

/// Resolve the request's verb, folding in the subhandler suffix.
pub fn get_verb(req: &Request) -> String {
    match req.subhandler.as_deref() {
        Some(sub) if !sub.is_empty() && sub != "default" => format!("{}_{sub}", req.verb),
        _ => req.verb.clone(),
    }
}

/// Look up the handler entry serving this request.
pub fn get_handler<'a>(req: &Request, lone: &'a Lone) -> Option<&'a HandlerEntry> {
    lone.handler(&get_verb(req))
}

/// Whether the request is long-running: only in server mode, only for
/// flagged handlers.
pub fn is_async_request(entry: &HandlerEntry, mode: Mode) -> bool {
    mode == Mode::Server && entry.long_running
}

/// Whether this request's state transitions are journaled.
pub fn journaling_allowed(req: &Request, lone: &Lone, mode: Mode) -> bool {
    let verb = get_verb(req);
    if CORE_JOURNAL_VERBS.iter().any(|stem| verb.contains(stem)) {
        return true;
    }
    match get_handler(req, lone) {
        Some(entry) => entry.journaled || is_async_request(entry, mode),
        None => false,
    }
}

fn write_step(req: &Request, config: &FamilyConfig, lone: &Lone, step: Step, payload: Value) {
    if !journaling_allowed(req, lone, config.mode) {
        return;
    }
    let entry = journal::entry_for(req, config, step, payload);
    if config.mode == Mode::Lone {
        journal::local_write(config, &entry);
    } else {
        journal::write(&entry);
    }
}

/// Run one request through the state machine and return `(payload, status)`.
///
/// `Value::Null` with 204 means no content. The auth result, when present,
/// carries the `auth` (and `oboauth`) payloads journaled between begin and
/// the handler call.
pub fn process_req(
    config: &FamilyConfig,
    lone: &Lone,
    req: &Request,
    auth_result: Option<&Value>,
) -> (Value, u16) {
    let entry = match get_handler(req, lone) {
        Some(entry) => entry.clone(),
        None => {
            error!(
                txid = %req.txid,
                lone = %req.lone,
                verb = %get_verb(req),
                "no handler registered for verb"
            );
            return (
                Value::String(format!(
                    "no handler registered for verb '{}' on lone '{}'",
                    get_verb(req),
                    req.lone
                )),
                500,
            );
        }
    };

    write_step(req, config, lone, Step::Begin, req.obj.clone().unwrap_or(Value::Null));
    if let Some(auth) = auth_result {
        if req.obo.is_some() {
            write_step(
                req,
                config,
                lone,
                Step::AuthObo,
                auth.get("oboauth").cloned().unwrap_or(Value::Null),
            );
        }
        write_step(
            req,
            config,
            lone,
            Step::Auth,
            auth.get("auth").cloned().unwrap_or(Value::Null),
        );
    }

    debug!(txid = %req.txid, verb = %get_verb(req), "invoking handler");
    let obj = req.obj_map();
    let pk = req.pk.as_deref();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        (entry.func)(pk, &obj)
    }));

    match outcome {
        Ok(Outcome::Success(out)) => {
            let payload = out.unwrap_or(Value::Null);
            write_step(req, config, lone, Step::Commit, payload.clone());
            let status = if payload.is_null() { 204 } else { 200 };
            info!(txid = %req.txid, status = status, "handler committed");
            (payload, status)
        }
        Ok(Outcome::Domain(payload, status)) => {
            info!(txid = %req.txid, status = status, "handler domain error");
            write_step(req, config, lone, Step::Abort, payload.clone());
            (payload, status)
        }
        Err(panic) => {
            let out = Value::String(format!("{panic:?}"));
            error!(txid = %req.txid, panic = %out, "handler panicked");
            write_step(req, config, lone, Step::Abort, out.clone());
            (out, 500)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestParts;
    use serde_json::json;
    use std::path::PathBuf;

    fn test_config(mode: Mode) -> FamilyConfig {
        FamilyConfig {
            family: "acme/infra".to_string(),
            deployment: "dev".to_string(),
            mode,
            basedir: PathBuf::from("/tmp"),
            servers: None,
            extra: serde_json::Map::new(),
        }
    }

    fn req(verb: &str, subhandler: Option<&str>) -> Request {
        Request::new(RequestParts {
            lone: "foo".to_string(),
            verb: verb.to_string(),
            subhandler: subhandler.map(str::to_string),
            obj: Some(json!({"val": 1})),
            ..RequestParts::default()
        })
    }

    #[test]
    fn test_get_verb_with_subhandler() {
        assert_eq!(get_verb(&req("get", None)), "get");
        assert_eq!(get_verb(&req("get", Some("default"))), "get");
        assert_eq!(get_verb(&req("get", Some("audit"))), "get_audit");
    }

    #[test]
    fn test_journaling_gate() {
        let mut lone = Lone::new("foo");
        lone.register("get", |_pk, _obj| Outcome::none());
        lone.register("create", |_pk, _obj| Outcome::none());
        lone.register_journaled("get_audit", |_pk, _obj| Outcome::none());
        lone.register_long_running("rebuild", |_pk, _obj| Outcome::none());

        assert!(!journaling_allowed(&req("get", None), &lone, Mode::Server));
        assert!(journaling_allowed(&req("create", None), &lone, Mode::Server));
        assert!(journaling_allowed(
            &req("get", Some("audit")),
            &lone,
            Mode::Server
        ));
        // Long-running journals only in server mode.
        assert!(journaling_allowed(&req("rebuild", None), &lone, Mode::Server));
        assert!(!journaling_allowed(&req("rebuild", None), &lone, Mode::Lone));
    }

    #[test]
    fn test_success_and_no_content() {
        let mut lone = Lone::new("foo");
        lone.register("get", |_pk, _obj| Outcome::ok(json!({"found": true})));
        lone.register("delete", |_pk, _obj| Outcome::none());
        let cfg = test_config(Mode::Lone);

        let (out, status) = process_req(&cfg, &lone, &req("get", None), None);
        assert_eq!(status, 200);
        assert_eq!(out, json!({"found": true}));

        let (out, status) = process_req(&cfg, &lone, &req("delete", None), None);
        assert_eq!(status, 204);
        assert!(out.is_null());
    }

    #[test]
    fn test_domain_error_passthrough() {
        let mut lone = Lone::new("foo");
        lone.register("get", |_pk, _obj| {
            Outcome::domain(json!({"reason": "gone"}), 410)
        });
        let cfg = test_config(Mode::Lone);
        let (out, status) = process_req(&cfg, &lone, &req("get", None), None);
        assert_eq!(status, 410);
        assert_eq!(out, json!({"reason": "gone"}));
    }

    #[test]
    fn test_panic_is_internal_error() {
        let mut lone = Lone::new("foo");
        lone.register("get", |_pk, _obj| panic!("boom"));
        let cfg = test_config(Mode::Lone);
        let (out, status) = process_req(&cfg, &lone, &req("get", None), None);
        assert_eq!(status, 500);
        assert!(out.as_str().unwrap().contains("boom"));
    }

    #[test]
    fn test_missing_handler_is_500() {
        let lone = Lone::new("foo");
        let cfg = test_config(Mode::Lone);
        let (out, status) = process_req(&cfg, &lone, &req("get", None), None);
        assert_eq!(status, 500);
        assert!(out.as_str().unwrap().contains("no handler registered"));
    }

    #[test]
    fn test_handler_receives_pk_and_obj() {
        let mut lone = Lone::new("foo");
        lone.register("update", |pk, obj| {
            Outcome::ok(json!({"pk": pk, "val": obj.get("val").cloned()}))
        });
        let cfg = test_config(Mode::Lone);
        let mut r = req("update", None);
        r.pk = Some("abc".to_string());
        let (out, status) = process_req(&cfg, &lone, &r, None);
        assert_eq!(status, 200);
        assert_eq!(out, json!({"pk": "abc", "val": 1}));
    }
}
