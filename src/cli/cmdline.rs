//! Command line management: framework flags, per-verb getopt flags, inline
//! YAML, and primary-key/path expressions.

use crate::config::{LoneOptions, Mode};
use crate::merge::merge_inputs;
use crate::util::str_to_bool;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use super::io::read_stdin;

pub const HTTP_VERBS: [&str; 4] = ["get", "create", "delete", "update"];

static PK_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<pk>[^\[\]]+)(?:\[(?P<path>[^\[\]]+)\])?$").expect("pk regex must compile")
});

/// Malformed CLI input; surfaced as an `_error` YAML document with exit 0.
#[derive(Debug, Clone)]
pub struct UsageError {
    pub lonename: String,
    pub reason: Value,
    pub verb: Option<String>,
    pub pk: Option<String>,
    pub obj: Option<Value>,
}

impl UsageError {
    pub fn new(lonename: &str, reason: impl Into<Value>) -> UsageError {
        UsageError {
            lonename: lonename.to_string(),
            reason: reason.into(),
            verb: None,
            pk: None,
            obj: None,
        }
    }

    pub fn with_verb(mut self, verb: &str) -> UsageError {
        self.verb = Some(verb.to_string());
        self
    }

    pub fn with_pk(mut self, pk: &str) -> UsageError {
        self.pk = Some(pk.to_string());
        self
    }
}

impl std::fmt::Display for UsageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "usage error for {}: {}", self.lonename, self.reason)
    }
}

impl std::error::Error for UsageError {}

/// Framework-level flags, parsed before anything else and stripped from the
/// remaining argv.
#[derive(Debug, Clone, Default)]
pub struct FrameworkOptions {
    pub debug: Option<bool>,
    pub deployment: Option<String>,
    pub mode: Option<Mode>,
    pub obo: Option<String>,
    pub role: Option<String>,
    pub cm: Option<String>,
    pub status: Option<String>,
    pub servers: Option<HashMap<String, Vec<String>>>,
}

/// Everything one CLI invocation resolved to.
#[derive(Debug, Clone)]
pub struct CmdLine {
    pub verb: String,
    pub pk: Option<String>,
    pub input: Option<Vec<Value>>,
    pub options: FrameworkOptions,
    pub path: Option<String>,
    pub body: Option<Value>,
}

/// Parse the leading `--flag [value]` pairs into framework options,
/// returning the untouched remainder. Unknown leading flags are consumed
/// and dropped with a warning.
pub fn parse_framework_opts(
    lonename: &str,
    args: &[String],
) -> Result<(FrameworkOptions, Vec<String>), UsageError> {
    let mut opts = FrameworkOptions::default();
    let mut servers_raw: Vec<String> = Vec::new();
    let mut rest: Vec<String> = Vec::new();
    let mut iter = args.iter().peekable();

    while let Some(arg) = iter.next() {
        if !arg.starts_with("--") {
            // First non-option parameter: everything from here on belongs
            // to the verb parser.
            rest.push(arg.clone());
            rest.extend(iter.cloned());
            break;
        }
        let (name, inline_value) = match arg.split_once('=') {
            Some((n, v)) => (n.trim_start_matches("--"), Some(v.to_string())),
            None => (arg.trim_start_matches("--"), None),
        };
        let mut take_value = || -> Result<String, UsageError> {
            match inline_value.clone().or_else(|| iter.next().cloned()) {
                Some(v) => Ok(v),
                None => Err(UsageError::new(
                    lonename,
                    format!("Missing value for option --{name}"),
                )),
            }
        };
        match name {
            "debug" => {
                let v = take_value()?;
                opts.debug = Some(
                    str_to_bool(&v).map_err(|e| UsageError::new(lonename, e.to_string()))?,
                );
            }
            "deployment" => opts.deployment = Some(take_value()?),
            "mode" => {
                let v = take_value()?;
                opts.mode = Some(
                    v.parse()
                        .map_err(|e: anyhow::Error| UsageError::new(lonename, e.to_string()))?,
                );
            }
            "obo" => opts.obo = Some(take_value()?),
            "role" => opts.role = Some(take_value()?),
            "cm" => opts.cm = Some(take_value()?),
            "status" => opts.status = Some(take_value()?),
            "servers" => {
                let v = take_value()?;
                servers_raw.extend(v.split(',').map(str::to_string));
            }
            other => {
                let dropped = take_value().ok();
                warn!(flag = %other, value = ?dropped, "unknown framework option ignored");
            }
        }
    }

    if !servers_raw.is_empty() {
        let mut servers: HashMap<String, Vec<String>> = HashMap::new();
        for entry in &servers_raw {
            let (proto, param) = entry.split_once(':').ok_or_else(|| {
                UsageError::new(lonename, format!("Unparseable server entry: '{entry}'"))
            })?;
            servers
                .entry(proto.to_string())
                .or_default()
                .push(param.to_string());
        }
        if servers.len() != 1 {
            return Err(UsageError::new(
                lonename,
                "Multiple server types specified on command line",
            ));
        }
        opts.servers = Some(servers);
    }

    Ok((opts, rest))
}

/// Parse per-verb getopt flags declared in `<lone>.options.yml`.
///
/// Flag kinds: `string` takes one value, `boolean` parses its value, `list`
/// accumulates comma-split values across repeats. Everything unrecognized
/// stays in the remainder, order preserved.
pub fn parse_getopt(
    lonename: &str,
    verb: &str,
    schema: &HashMap<String, String>,
    args: &[String],
) -> Result<(Option<Value>, Vec<String>), UsageError> {
    let mut values: serde_json::Map<String, Value> = serde_json::Map::new();
    let mut rest: Vec<String> = Vec::new();
    let mut iter = args.iter().peekable();

    while let Some(arg) = iter.next() {
        let Some(stripped) = arg.strip_prefix("--") else {
            rest.push(arg.clone());
            continue;
        };
        let (name, inline_value) = match stripped.split_once('=') {
            Some((n, v)) => (n, Some(v.to_string())),
            None => (stripped, None),
        };
        let Some(kind) = schema.get(name) else {
            rest.push(arg.clone());
            continue;
        };
        let value = match inline_value.or_else(|| iter.next().cloned()) {
            Some(v) => v,
            None => {
                return Err(UsageError::new(
                    lonename,
                    format!("Missing value for option --{name}"),
                )
                .with_verb(verb));
            }
        };
        match kind.to_ascii_lowercase().as_str() {
            "string" => {
                values.insert(name.to_string(), Value::String(value));
            }
            "boolean" => {
                let b = str_to_bool(&value)
                    .map_err(|e| UsageError::new(lonename, e.to_string()).with_verb(verb))?;
                values.insert(name.to_string(), Value::Bool(b));
            }
            "list" => {
                let items: Vec<Value> = value
                    .split(',')
                    .map(|s| Value::String(s.to_string()))
                    .collect();
                match values.get_mut(name) {
                    Some(Value::Array(existing)) => existing.extend(items),
                    _ => {
                        values.insert(name.to_string(), Value::Array(items));
                    }
                }
            }
            other => {
                return Err(UsageError::new(
                    lonename,
                    format!("Invalid entry in configuration: verb '{verb}': '{name}: {other}'"),
                )
                .with_verb(verb));
            }
        }
    }

    let input = if values.is_empty() {
        None
    } else {
        Some(Value::Object(values))
    };
    Ok((input, rest))
}

/// Extract the inline YAML document: everything from the first argument
/// starting with `---` onward, joined with spaces.
pub fn extract_cmdline_yaml(args: &[String]) -> anyhow::Result<(Option<Value>, Vec<String>)> {
    for (idx, arg) in args.iter().enumerate() {
        if arg.starts_with("---") {
            let doc = args[idx..].join(" ");
            let value: Value = serde_yaml::from_str(&doc)?;
            return Ok((Some(value), args[..idx].to_vec()));
        }
    }
    Ok((None, args.to_vec()))
}

/// Split a `PK[sub/path]` expression into its pk and path pieces.
pub fn parse_pk_path(pkpath: &str) -> Option<(String, Option<String>)> {
    let caps = PK_PATH_RE.captures(pkpath)?;
    let pk = caps.name("pk")?.as_str().to_string();
    let path = caps.name("path").map(|m| m.as_str().to_string());
    Some((pk, path))
}

/// Wrap an input object along a sub path: expanding `a/b/c` around X
/// yields `{a: {b: {c: X}}}`.
pub fn expand_path(path: &str, input: &Value) -> Value {
    path.split('/')
        .rev()
        .fold(input.clone(), |acc, key| json!({ key: acc }))
}

/// Parse one full CLI invocation into verb, pk, merged input and options.
///
/// `args` excludes argv0. `body_required` resolves whether the operation
/// requires a request body (consulting the openapi documents); it gates the
/// interactive prompt.
pub fn get_cmdline(
    lonename: &str,
    rootdir: &Path,
    args: &[String],
    body_required: impl Fn(Option<&str>, &str, Option<&str>, Option<&[Value]>) -> bool,
) -> Result<CmdLine, UsageError> {
    let (fw_options, rest) = parse_framework_opts(lonename, args)?;

    // --status short-circuits to a status get.
    if fw_options.status.is_some() {
        return Ok(CmdLine {
            verb: "get".to_string(),
            pk: None,
            input: None,
            options: fw_options,
            path: None,
            body: None,
        });
    }

    if rest.is_empty() {
        return Err(UsageError::new(lonename, "usage <verb> <pk>"));
    }
    let verb = rest[0].clone();

    if verb == "help" {
        return Ok(CmdLine {
            verb,
            pk: None,
            input: None,
            options: fw_options,
            path: None,
            body: None,
        });
    }

    // Piped stdin is consumed up front; a TTY is only read at the
    // interactive prompt below.
    let stdin_input = read_stdin(None, false).map_err(|e| {
        UsageError::new(lonename, format!("Error parsing STDIN YAML:\n{e}")).with_verb(&verb)
    })?;
    if let Some(err) = stdin_input.as_ref().and_then(|v| v.get("_error")) {
        return Err(UsageError::new(lonename, err.clone()));
    }

    let lone_config = LoneOptions::load(rootdir, lonename)
        .map_err(|e| UsageError::new(lonename, e.to_string()).with_verb(&verb))?;

    // Per-verb defaults; hardcoded empty for get/delete and custom verbs.
    let mut verbs_default_input = lone_config.default_input.clone();
    verbs_default_input.insert("get".to_string(), json!({}));
    verbs_default_input.insert("delete".to_string(), json!({}));
    if !HTTP_VERBS.contains(&verb.as_str()) {
        verbs_default_input.insert(verb.clone(), json!({}));
    }
    let default_input = verbs_default_input.get(&verb).cloned();

    let schema = lone_config.getopt_schema(&verb);
    let (mut getopt_input, rest) = parse_getopt(lonename, &verb, &schema, &rest)?;

    let (yaml_input, rest) = extract_cmdline_yaml(&rest).map_err(|e| {
        UsageError::new(lonename, format!("Error parsing command line YAML:\n{e}"))
            .with_verb(&verb)
    })?;
    let body = yaml_input.clone();
    let mut yaml_input = yaml_input;

    // The remainder is `verb` or `verb pk[path]`.
    let (pk, path) = match rest.len() {
        0 => {
            return Err(UsageError::new(
                lonename,
                format!("Error parsing command line: {rest:?}"),
            )
            .with_verb(&verb));
        }
        1 => (None, None),
        2 => {
            let (pk, path) = parse_pk_path(&rest[1]).ok_or_else(|| {
                UsageError::new(lonename, format!("Unparseable primary key: '{}'", rest[1]))
                    .with_verb(&verb)
            })?;
            if let Some(path) = &path {
                getopt_input = Some(expand_path(
                    path,
                    &getopt_input.unwrap_or(Value::Null),
                ));
                yaml_input = Some(expand_path(path, &yaml_input.unwrap_or(Value::Null)));
            }
            (Some(pk), path)
        }
        _ => {
            return Err(UsageError::new(
                lonename,
                format!("Unrecognized elements on the command line: '{:?}'", &rest[2..]),
            )
            .with_verb(&verb)
            .with_pk(&rest[1]));
        }
    };

    let merge_all = |stdin: &Option<Value>| -> Result<Option<Vec<Value>>, UsageError> {
        let sources = [
            default_input.clone().unwrap_or(Value::Null),
            stdin.clone().unwrap_or(Value::Null),
            getopt_input.clone().unwrap_or(Value::Null),
            yaml_input.clone().unwrap_or(Value::Null),
        ];
        merge_inputs(&sources).map_err(|e| {
            UsageError::new(lonename, format!("Error merging inputs: {e}")).with_verb(&verb)
        })
    };

    let mut obj = if HTTP_VERBS.contains(&verb.as_str()) {
        merge_all(&stdin_input)?
    } else if let Some(body) = &body {
        Some(vec![body.clone()])
    } else {
        return Ok(CmdLine {
            verb,
            pk,
            input: None,
            options: fw_options,
            path,
            body: None,
        });
    };

    // Interactive mode: nothing merged, or a stubbed pk with no _id to
    // take it from, and the operation requires a body.
    let needs_prompt = match &obj {
        None => true,
        Some(entries) => {
            pk.as_deref() == Some("-")
                && entries
                    .first()
                    .map(|e| e.is_object() && e.get("_id").is_none())
                    .unwrap_or(false)
        }
    };
    if needs_prompt
        && body_required(pk.as_deref(), &verb, path.as_deref(), obj.as_deref())
    {
        let msg = "Enter YAML input and type Ctrl-D (i.e. EOF) to submit:\n";
        let stdin_input = read_stdin(Some(msg), true).map_err(|e| {
            UsageError::new(lonename, format!("Error parsing STDIN YAML:\n{e}")).with_verb(&verb)
        })?;
        if let Some(err) = stdin_input.as_ref().and_then(|v| v.get("_error")) {
            return Err(UsageError::new(lonename, err.clone()));
        }
        obj = merge_all(&stdin_input)?;
    }

    Ok(CmdLine {
        verb,
        pk,
        input: obj,
        options: fw_options,
        path,
        body,
    })
}
