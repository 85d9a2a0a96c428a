//! The resource-handler worker process.
//!
//! A worker holds one persistent connection to the broker backend,
//! announces `Worker-<pid>` + `READY`, then serves requests strictly
//! sequentially: decode the dispatch envelope, run the request state
//! machine, reply, announce `READY` again. A long-running request replies
//! 202 with the status path first and still runs to completion before the
//! next `READY`. When the fabric goes away the worker exits cleanly.

use crate::broker::socket_path;
use crate::config::{load_family_config, ConfigOptions, FamilyConfig, Mode, ServerConfig};
use crate::framing::{read_frame, write_frame, write_json_frame};
use crate::handler;
use crate::lone::{echo_lone, Lone};
use crate::request::Request;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;
use tracing::{debug, error, info};

/// What the gateway sends over the fabric for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEnvelope {
    pub request: Request,
    /// Authorization result riding along for the journal steps.
    pub auth: Option<Value>,
    /// Major API version the gateway resolved, e.g. `v3`.
    pub version: Option<String>,
}

/// What a worker sends back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReply {
    pub resp: Value,
    pub code: u16,
}

pub struct Worker {
    config: FamilyConfig,
    lones: HashMap<String, Lone>,
    socket_url: String,
}

impl Worker {
    /// Load the family config and build the served lones.
    pub fn new(
        basedir: &Path,
        socket_url: &str,
        deployment: &str,
        build_lones: impl Fn(&FamilyConfig, &[String]) -> anyhow::Result<Vec<Lone>>,
    ) -> anyhow::Result<Worker> {
        let options = ConfigOptions {
            deployment: Some(deployment.to_string()),
            mode: Some(Mode::Server),
            servers: None,
        };
        let config = load_family_config(basedir, &options)?;
        let server_config = ServerConfig::load(basedir)?;
        let mut lones = HashMap::new();
        for lone in build_lones(&config, &server_config.lones)? {
            info!(lone = %lone.name(), "loaded lone");
            lones.insert(lone.name().to_string(), lone);
        }
        Ok(Worker {
            config,
            lones,
            socket_url: socket_url.to_string(),
        })
    }

    /// Serve requests until the fabric connection closes.
    pub fn run(&self) -> anyhow::Result<()> {
        let pid = std::process::id();
        info!(pid = pid, socket = %self.socket_url, "worker starting");
        let mut stream = UnixStream::connect(socket_path(&self.socket_url))?;
        write_frame(&mut stream, format!("Worker-{pid}").as_bytes())?;
        write_frame(&mut stream, b"READY")?;

        loop {
            let frame = match read_frame(&mut stream)? {
                Some(f) => f,
                // Fabric torn down: exit cleanly.
                None => {
                    info!(pid = pid, "fabric closed, worker exiting");
                    return Ok(());
                }
            };
            if let Some(reply) = self.serve_one(&frame, &mut stream) {
                write_json_frame(&mut stream, &reply)?;
            }
            write_frame(&mut stream, b"READY")?;
            stream.flush()?;
        }
    }

    /// Handle one framed request. Long-running handlers reply 202 on
    /// `stream` immediately and `None` is returned once they finish; the
    /// terminal step lives in the journal.
    fn serve_one(&self, frame: &[u8], stream: &mut UnixStream) -> Option<WorkerReply> {
        let envelope: DispatchEnvelope = match serde_json::from_slice(frame) {
            Ok(e) => e,
            Err(e) => {
                error!(error = %e, "undecodable dispatch envelope");
                return Some(WorkerReply {
                    resp: Value::String(format!("undecodable request: {e}")),
                    code: 500,
                });
            }
        };
        let req = &envelope.request;
        debug!(txid = %req.txid, lone = %req.lone, verb = %req.verb, "request received");

        let Some(lone) = self.lones.get(&req.lone) else {
            error!(lone = %req.lone, "request for unloaded lone");
            return Some(WorkerReply {
                resp: Value::String(format!("lone '{}' is not served here", req.lone)),
                code: 500,
            });
        };

        let mut long_running = false;
        if let Some(entry) = handler::get_handler(req, lone) {
            if handler::is_async_request(entry, self.config.mode) {
                long_running = true;
                let location = format!("/status/{}", req.rqid);
                info!(txid = %req.txid, location = %location, "long-running request accepted");
                let accepted = WorkerReply {
                    resp: Value::String(location),
                    code: 202,
                };
                if let Err(e) = write_json_frame(stream, &accepted) {
                    error!(txid = %req.txid, error = %e, "cannot send 202 reply");
                }
            }
        }

        let (resp, code) = handler::process_req(&self.config, lone, req, envelope.auth.as_ref());
        if long_running {
            debug!(txid = %req.txid, code = code, "long-running request finished");
            // Subscribers polling on the transaction get the terminal word;
            // the payload itself lives in the journal.
            crate::services::publish(&req.txid, &serde_json::json!({ "status": "done", "code": code }));
            let _ = resp;
            None
        } else {
            Some(WorkerReply { resp, code })
        }
    }
}

/// Default lone builder: echo lones for every configured lone name, with
/// an entry per operation id from the lone's spec (the gateway rewrites
/// verbs to operation ids before dispatching). Real deployments point the
/// broker at their own worker binary.
pub fn echo_lones(config: &FamilyConfig, names: &[String]) -> anyhow::Result<Vec<Lone>> {
    use crate::lone::Outcome;
    use crate::spec::{latest_spec_file, load_lone_spec};

    let openapi_dir = config.openapi_dir();
    let mut lones = Vec::new();
    for name in names {
        let mut lone = echo_lone(name);
        if let Ok(Some(file)) = latest_spec_file(&openapi_dir, &config.family, name) {
            if let Ok(spec) = load_lone_spec(&openapi_dir, &file) {
                for op in &spec.operations {
                    lone.register(op.operation_id.to_lowercase(), |pk, obj| {
                        Outcome::ok(serde_json::json!({ "pk": pk, "input": obj }))
                    });
                }
            }
        }
        lones.push(lone);
    }
    Ok(lones)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let req = Request::new(crate::request::RequestParts {
            lone: "foo".to_string(),
            verb: "get_foo".to_string(),
            ..Default::default()
        });
        let envelope = DispatchEnvelope {
            request: req,
            auth: Some(serde_json::json!({"auth": {"authorized": true}})),
            version: Some("v3".to_string()),
        };
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let back: DispatchEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.request.lone, "foo");
        assert_eq!(back.version.as_deref(), Some("v3"));
    }

    #[test]
    fn test_worker_reply_shape() {
        let reply = WorkerReply {
            resp: serde_json::json!({"status": "Try again server busy"}),
            code: 503,
        };
        let v = serde_json::to_value(&reply).unwrap();
        assert_eq!(v["code"], 503);
        assert_eq!(v["resp"]["status"], "Try again server busy");
    }
}
