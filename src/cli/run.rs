//! CLI entry point: parse, build envelopes, run them locally or remotely,
//! print YAML results.

use super::cmdline::{get_cmdline, CmdLine};
use super::local::{is_body_required, local_handler};
use crate::client::remote_handler;
use crate::config::{get_family, load_family_config, ConfigOptions, Mode};
use crate::error::gen_error;
use crate::ids::RequestId;
use crate::lone::Lone;
use crate::request::{Request, RequestParts};
use crate::spec::{latest_spec_file, load_lone_spec, LoneSpec};
use crate::util::{hostname, username};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Base directory of the family: lone binaries live in `<basedir>/bin/`.
pub fn get_lone_basedir(argv0: &str) -> PathBuf {
    let path = Path::new(argv0);
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let base = parent.parent().unwrap_or_else(|| Path::new("."));
    base.canonicalize().unwrap_or_else(|_| base.to_path_buf())
}

/// Massage the parsed command line into the list of request envelopes.
///
/// One transaction id spans the whole invocation (`LAF-TX-ID` wins when
/// set); each object gets its own envelope and fresh request id. A stubbed
/// pk (`-` or absent) is taken from the object's `_id` when present.
pub fn make_requests(
    lone_name: &str,
    cmdline: &CmdLine,
    mode: Mode,
) -> anyhow::Result<Vec<Request>> {
    let txid = std::env::var("LAF-TX-ID")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| RequestId::new().to_string());
    let stub_pk = matches!(cmdline.pk.as_deref(), None | Some("-"));
    let options = &cmdline.options;

    let base_parts = |pk: Option<String>, obj: Option<Value>, with_path: bool| RequestParts {
        lone: lone_name.to_string(),
        verb: cmdline.verb.clone(),
        pk,
        obj,
        body: if with_path { cmdline.body.clone() } else { None },
        path: if with_path { cmdline.path.clone() } else { None },
        obo: options.obo.clone(),
        role: options.role.clone(),
        cm: options.cm.clone(),
        txid: Some(txid.clone()),
        mode: Some(mode),
        ..RequestParts::default()
    };

    let Some(objs) = &cmdline.input else {
        // Input was `--- ~` or nothing at all.
        let pk = if stub_pk { None } else { cmdline.pk.clone() };
        return Ok(vec![Request::new(base_parts(pk, None, !stub_pk))]);
    };

    let mut entries = Vec::with_capacity(objs.len());
    for entry in objs {
        if !entry.is_object() {
            anyhow::bail!("Can only be list of scalars or list of dict");
        }
        let pk = if stub_pk {
            entry.get("_id").map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        } else {
            cmdline.pk.clone()
        };
        entries.push(Request::new(base_parts(pk, Some(entry.clone()), true)));
    }
    Ok(entries)
}

fn print_yaml(value: &Value) {
    print!("{}", serde_yaml::to_string(value).unwrap_or_default());
}

fn exit_with_error(
    reason: Value,
    lone_name: &str,
    verb: Option<&str>,
    pk: Option<&str>,
    obj: Option<&Value>,
    luser: &str,
    lhost: &str,
) -> ! {
    let res = gen_error(reason, lone_name, verb, pk, obj, Some(luser), Some(lhost));
    print_yaml(&res);
    std::process::exit(0);
}

fn load_latest_spec(basedir: &Path, family: &str, lone: &str) -> Option<LoneSpec> {
    let openapi_dir = basedir.join(crate::config::OPENAPI_DIR);
    let file = latest_spec_file(&openapi_dir, family, lone).ok().flatten()?;
    load_lone_spec(&openapi_dir, &file).ok()
}

/// Run a lone from the command line. This is the whole client surface:
/// parse the invocation, build the envelopes, apply them locally or
/// remotely, print every result as YAML.
pub fn run(lone: &Lone) -> ! {
    let argv: Vec<String> = std::env::args().collect();
    let basedir = get_lone_basedir(argv.first().map(String::as_str).unwrap_or("."));
    let luser = username();
    let lhost = hostname();
    let lone_name = lone.name().to_string();
    let args: Vec<String> = argv.into_iter().skip(1).collect();

    // Family id is needed for the body-required probe inside cmdline
    // parsing; a missing family file surfaces later with full context.
    let family = get_family(&basedir).unwrap_or_default();

    let cmdline = match get_cmdline(&lone_name, &basedir, &args, |pk, verb, path, obj| {
        is_body_required(
            &basedir, &family, &lone_name, pk, verb, path, obj, &luser, &lhost,
        )
    }) {
        Ok(c) => c,
        Err(err) => exit_with_error(
            err.reason,
            &err.lonename,
            err.verb.as_deref(),
            err.pk.as_deref(),
            err.obj.as_ref(),
            &luser,
            &lhost,
        ),
    };

    if cmdline.verb == "help" {
        println!("{}", lone.help());
        std::process::exit(0);
    }

    let options = &cmdline.options;
    let config_options = ConfigOptions {
        deployment: options.deployment.clone(),
        mode: options.mode,
        servers: options.servers.clone(),
    };
    let config = match load_family_config(&basedir, &config_options) {
        Ok(c) => c,
        Err(err) => exit_with_error(
            Value::String(err.to_string()),
            &lone_name,
            Some(&cmdline.verb),
            cmdline.pk.as_deref(),
            None,
            &luser,
            &lhost,
        ),
    };

    let requests = match make_requests(&lone_name, &cmdline, config.mode) {
        Ok(r) => r,
        Err(err) => exit_with_error(
            Value::String(format!("Error in input:{err}")),
            &lone_name,
            Some(&cmdline.verb),
            cmdline.pk.as_deref(),
            None,
            &luser,
            &lhost,
        ),
    };

    let debug = options.debug.unwrap_or(false);
    if config.mode == Mode::Client {
        crate::logger::init(debug);
        let spec = load_latest_spec(&basedir, &config.family, &lone_name);
        let results = remote_handler(requests, &config, &cmdline.options, spec.as_ref());
        for result in results.into_iter().flatten() {
            print_yaml(&result);
        }
    } else {
        let logfile = PathBuf::from(format!("/tmp/{lone_name}_{luser}.log"));
        crate::logger::init_file(&logfile, debug);
        match local_handler(lone, requests, &config, &luser, &lhost) {
            Ok(results) => {
                for result in results {
                    if !result.is_null() {
                        print_yaml(&result);
                    }
                }
            }
            Err(err_doc) => {
                print_yaml(&err_doc);
                std::process::exit(1);
            }
        }
    }
    std::process::exit(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::FrameworkOptions;
    use serde_json::json;

    fn cmdline(verb: &str, pk: Option<&str>, input: Option<Vec<Value>>) -> CmdLine {
        CmdLine {
            verb: verb.to_string(),
            pk: pk.map(str::to_string),
            input,
            options: FrameworkOptions::default(),
            path: None,
            body: None,
        }
    }

    #[test]
    fn test_one_envelope_per_object() {
        let c = cmdline(
            "update",
            Some("-"),
            Some(vec![json!({"_id": "a", "v": 1}), json!({"_id": "b", "v": 2})]),
        );
        let reqs = make_requests("foo", &c, Mode::Client).unwrap();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].pk.as_deref(), Some("a"));
        assert_eq!(reqs[1].pk.as_deref(), Some("b"));
        // One txid per invocation, fresh rqid per envelope.
        assert_eq!(reqs[0].txid, reqs[1].txid);
        assert_ne!(reqs[0].rqid, reqs[1].rqid);
    }

    #[test]
    fn test_stub_pk_without_id_stays_none() {
        let c = cmdline("create", Some("-"), Some(vec![json!({"v": 1})]));
        let reqs = make_requests("foo", &c, Mode::Client).unwrap();
        assert_eq!(reqs[0].pk, None);
    }

    #[test]
    fn test_cli_pk_wins_over_entries() {
        let c = cmdline("create", Some("abc"), Some(vec![json!({"v": 1})]));
        let reqs = make_requests("foo", &c, Mode::Client).unwrap();
        assert_eq!(reqs[0].pk.as_deref(), Some("abc"));
        assert_eq!(reqs[0].obj, Some(json!({"v": 1})));
    }

    #[test]
    fn test_empty_input_yields_one_bare_envelope() {
        let c = cmdline("get", None, None);
        let reqs = make_requests("foo", &c, Mode::Client).unwrap();
        assert_eq!(reqs.len(), 1);
        assert!(reqs[0].pk.is_none());
        assert!(reqs[0].obj.is_none());
    }

    #[test]
    fn test_pinned_txid_env() {
        std::env::set_var("LAF-TX-ID", "pinned-tx");
        let c = cmdline("get", None, None);
        let reqs = make_requests("foo", &c, Mode::Client).unwrap();
        assert_eq!(reqs[0].txid, "pinned-tx");
        std::env::remove_var("LAF-TX-ID");
    }

    #[test]
    fn test_non_object_entries_rejected() {
        let c = cmdline("create", None, Some(vec![json!([1, 2])]));
        assert!(make_requests("foo", &c, Mode::Client).is_err());
    }
}
